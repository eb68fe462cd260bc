//! # EX Bus Telemetry Responder
//!
//! Answers telemetry requests in-band with a reply frame carrying one
//! telemetry record.
//!
//! ## Reply Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | Sync (0x3B, reply) |
//! | 1 | 1 | Bus state (0x01, release) |
//! | 2 | 1 | Frame length |
//! | 3 | 1 | Packet id, echoed from the request |
//! | 4 | 1 | Block id (0x3A) |
//! | 5 | 1 | Block length |
//! | 6 | 1 | Record sync (0x1F) |
//! | 7 | 1 | Record length (bits 0-5), record type (bits 6-7) |
//! | 8 | 2 | Manufacturer id, little-endian |
//! | 10 | 2 | Device id, little-endian |
//! | 12 | 1 | Reserved (0) |
//! | 13 | N | Record payload |
//! | 13+N | 1 | CRC-8 over offsets 7..13+N |
//! | 14+N | 2 | CRC-16 over everything before it |
//!
//! The record length counts the bytes after the first two header bytes up
//! to the end of the payload.
//!
//! ## Multiplexing
//!
//! The first `descriptor_burst` requests are answered with descriptors, and
//! after that every `descriptor_interval`-th request. All other requests are
//! answered with the live value.

use tracing::{debug, trace, warn};

use super::crc::{crc16, crc8};
use super::protocol::*;
use crate::error::{ExBusError, Result};
use crate::serial::TelemetrySink;

/// Telemetry record sync byte
pub const TELEMETRY_RECORD_SYNC: u8 = 0x1F;

/// Size of the telemetry record header (sync through reserved)
pub const TELEMETRY_RECORD_HEADER_LEN: usize = 7;

/// Maximum descriptor label length (5-bit field)
pub const TELEMETRY_MAX_LABEL_LEN: usize = 31;

/// Maximum descriptor unit length (3-bit field)
pub const TELEMETRY_MAX_UNIT_LEN: usize = 7;

/// Largest sensor id (4-bit field in value records)
pub const TELEMETRY_MAX_SENSOR_ID: u8 = 15;

/// Record type: text descriptor
const RECORD_TYPE_TEXT: u8 = 0;

/// Record type: data value
const RECORD_TYPE_DATA: u8 = 1;

/// Encoded width and layout of a numeric telemetry value
///
/// Every width keeps the sign in the top bit and the decimal point
/// position in the two bits below it; the rest is the magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int6,
    Int14,
    Int22,
    Int30,
}

impl ValueType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Int6),
            1 => Some(Self::Int14),
            4 => Some(Self::Int22),
            8 => Some(Self::Int30),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Int6 => 0,
            Self::Int14 => 1,
            Self::Int22 => 4,
            Self::Int30 => 8,
        }
    }

    /// Encoded size in bytes
    pub fn width(self) -> usize {
        match self {
            Self::Int6 => 1,
            Self::Int14 => 2,
            Self::Int22 => 3,
            Self::Int30 => 4,
        }
    }

    fn magnitude_bits(self) -> u32 {
        (self.width() as u32) * 8 - 3
    }
}

/// Numeric telemetry value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryValue {
    pub value_type: ValueType,
    /// Signed value, decimal point not applied
    pub value: i32,
    /// Decimal point position (0-3)
    pub decimals: u8,
}

impl TelemetryValue {
    /// Int30 value with no decimals
    pub fn int30(value: i32) -> Self {
        Self {
            value_type: ValueType::Int30,
            value,
            decimals: 0,
        }
    }

    /// Encode into `out`, returning the number of bytes written
    ///
    /// Magnitudes wider than the type saturate to its maximum.
    fn encode(&self, out: &mut [u8]) -> usize {
        let width = self.value_type.width();
        let bits = self.value_type.magnitude_bits();
        let max = (1u32 << bits) - 1;

        let mut raw = self.value.unsigned_abs().min(max);
        raw |= ((self.decimals & 0x03) as u32) << bits;
        if self.value < 0 {
            raw |= 1 << (bits + 2);
        }

        out[..width].copy_from_slice(&raw.to_le_bytes()[..width]);
        width
    }

    fn decode(value_type: ValueType, bytes: &[u8]) -> Result<Self> {
        let width = value_type.width();
        if bytes.len() < width {
            return Err(ExBusError::Protocol(format!(
                "Telemetry value too short: {} bytes, need {}",
                bytes.len(),
                width
            )));
        }

        let mut le = [0u8; 4];
        le[..width].copy_from_slice(&bytes[..width]);
        let raw = u32::from_le_bytes(le);

        let bits = value_type.magnitude_bits();
        let magnitude = (raw & ((1u32 << bits) - 1)) as i32;
        let decimals = ((raw >> bits) & 0x03) as u8;
        let negative = (raw >> (bits + 2)) & 1 == 1;

        Ok(Self {
            value_type,
            value: if negative { -magnitude } else { magnitude },
            decimals,
        })
    }
}

/// One telemetry record, borrowing its text from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryRecord<'a> {
    /// Name and unit of a sensor
    Descriptor {
        id: u8,
        label: &'a [u8],
        unit: &'a [u8],
    },
    /// Live reading of a sensor
    Value { id: u8, value: TelemetryValue },
}

impl TelemetryRecord<'_> {
    fn record_type(&self) -> u8 {
        match self {
            Self::Descriptor { .. } => RECORD_TYPE_TEXT,
            Self::Value { .. } => RECORD_TYPE_DATA,
        }
    }

    /// Encode the record payload into `out`
    fn encode(&self, out: &mut [u8]) -> Result<usize> {
        match *self {
            Self::Descriptor { id, label, unit } => {
                if label.len() > TELEMETRY_MAX_LABEL_LEN || unit.len() > TELEMETRY_MAX_UNIT_LEN {
                    return Err(ExBusError::Protocol(format!(
                        "Descriptor too long: label {} bytes, unit {} bytes",
                        label.len(),
                        unit.len()
                    )));
                }

                let len = 2 + label.len() + unit.len();
                if out.len() < len {
                    return Err(ExBusError::Protocol("Telemetry buffer too small".to_string()));
                }

                out[0] = id;
                out[1] = ((label.len() as u8) << 3) | (unit.len() as u8);
                out[2..2 + label.len()].copy_from_slice(label);
                out[2 + label.len()..len].copy_from_slice(unit);
                Ok(len)
            }
            Self::Value { id, value } => {
                if id > TELEMETRY_MAX_SENSOR_ID {
                    return Err(ExBusError::Protocol(format!("Sensor id {} out of range", id)));
                }
                if out.len() < 1 + value.value_type.width() {
                    return Err(ExBusError::Protocol("Telemetry buffer too small".to_string()));
                }

                out[0] = (id << 4) | value.value_type.tag();
                Ok(1 + value.encode(&mut out[1..]))
            }
        }
    }
}

/// Decoded telemetry reply frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryReply<'a> {
    pub packet_id: u8,
    pub manufacturer_id: u16,
    pub device_id: u16,
    pub record: TelemetryRecord<'a>,
}

/// Encode a complete telemetry reply frame
///
/// # Arguments
///
/// * `buf` - Output buffer
/// * `packet_id` - Packet id of the request being answered
/// * `manufacturer_id` - Manufacturer id placed in the record header
/// * `device_id` - Device id placed in the record header
/// * `record` - Record to carry
///
/// # Returns
///
/// * `Result<usize>` - Total frame length, CRC included
///
/// # Examples
///
/// ```
/// use exbus_rx::exbus::crc::crc16;
/// use exbus_rx::exbus::telemetry::{encode_telemetry_reply, TelemetryRecord, TelemetryValue};
///
/// let mut buf = [0u8; 128];
/// let record = TelemetryRecord::Value { id: 1, value: TelemetryValue::int30(1000) };
/// let len = encode_telemetry_reply(&mut buf, 0x2A, 0xA410, 0xF3FC, &record).unwrap();
///
/// assert_eq!(buf[0], 0x3B);
/// assert_eq!(crc16(&buf[..len]), 0);
/// ```
pub fn encode_telemetry_reply(
    buf: &mut [u8],
    packet_id: u8,
    manufacturer_id: u16,
    device_id: u16,
    record: &TelemetryRecord<'_>,
) -> Result<usize> {
    const RECORD_START: usize = OFFSET_BLOCK_PAYLOAD;
    const PAYLOAD_START: usize = RECORD_START + TELEMETRY_RECORD_HEADER_LEN;

    if buf.len() < PAYLOAD_START {
        return Err(ExBusError::Protocol("Telemetry buffer too small".to_string()));
    }

    let payload_len = record.encode(&mut buf[PAYLOAD_START..])?;
    let record_len = TELEMETRY_RECORD_HEADER_LEN - 2 + payload_len;
    let crc8_at = PAYLOAD_START + payload_len;
    let frame_len = crc8_at + 1 + EXBUS_CRC_LEN;

    if frame_len > buf.len() || frame_len > u8::MAX as usize {
        return Err(ExBusError::Protocol(format!(
            "Telemetry reply of {} bytes does not fit",
            frame_len
        )));
    }

    buf[0] = SyncByte::Reply.as_byte();
    buf[OFFSET_BUS_STATE] = BusState::Release.as_byte();
    buf[OFFSET_LENGTH] = frame_len as u8;
    buf[OFFSET_PACKET_ID] = packet_id;
    buf[OFFSET_BLOCK_ID] = BlockId::Telemetry.as_byte();
    buf[OFFSET_BLOCK_LENGTH] = (TELEMETRY_RECORD_HEADER_LEN + payload_len + 1) as u8;

    buf[RECORD_START] = TELEMETRY_RECORD_SYNC;
    buf[RECORD_START + 1] = (record.record_type() << 6) | (record_len as u8 & 0x3F);
    buf[RECORD_START + 2..RECORD_START + 4].copy_from_slice(&manufacturer_id.to_le_bytes());
    buf[RECORD_START + 4..RECORD_START + 6].copy_from_slice(&device_id.to_le_bytes());
    buf[RECORD_START + 6] = 0;

    // Record checksum starts at the length byte
    buf[crc8_at] = crc8(&buf[RECORD_START + 1..crc8_at]);

    let crc_at = frame_len - EXBUS_CRC_LEN;
    let crc = crc16(&buf[..crc_at]);
    buf[crc_at..frame_len].copy_from_slice(&crc.to_le_bytes());

    Ok(frame_len)
}

/// Decode a telemetry reply frame, checking both checksums
///
/// # Errors
///
/// Returns error if:
/// - The frame CRC does not resolve to zero
/// - The frame is not a telemetry block
/// - The record header, checksum or payload is malformed
pub fn decode_telemetry_reply(frame: &[u8]) -> Result<TelemetryReply<'_>> {
    if crc16(frame) != 0 {
        return Err(ExBusError::Protocol("Frame CRC mismatch".to_string()));
    }

    let view = FrameView::new(frame)?;
    if view.block_id() != BlockId::Telemetry {
        return Err(ExBusError::Protocol(format!(
            "Not a telemetry block: {:?}",
            view.block_id()
        )));
    }

    let block = view.block_payload();
    if block.len() < TELEMETRY_RECORD_HEADER_LEN + 1 || block[0] != TELEMETRY_RECORD_SYNC {
        return Err(ExBusError::Protocol("Malformed telemetry record header".to_string()));
    }

    let record_len = (block[1] & 0x3F) as usize;
    let record_type = block[1] >> 6;
    let record_end = 2 + record_len;
    if record_len < TELEMETRY_RECORD_HEADER_LEN - 2 || block.len() < record_end + 1 {
        return Err(ExBusError::Protocol(format!(
            "Telemetry record length {} exceeds block",
            record_len
        )));
    }

    let expected = crc8(&block[1..record_end]);
    if block[record_end] != expected {
        return Err(ExBusError::Protocol(format!(
            "Record CRC mismatch: expected 0x{:02X}, got 0x{:02X}",
            expected, block[record_end]
        )));
    }

    let manufacturer_id = u16::from_le_bytes([block[2], block[3]]);
    let device_id = u16::from_le_bytes([block[4], block[5]]);
    let payload = &block[TELEMETRY_RECORD_HEADER_LEN..record_end];

    let record = match record_type {
        RECORD_TYPE_TEXT => decode_descriptor(payload)?,
        RECORD_TYPE_DATA => decode_value(payload)?,
        other => {
            return Err(ExBusError::Protocol(format!(
                "Unsupported record type {}",
                other
            )))
        }
    };

    Ok(TelemetryReply {
        packet_id: view.packet_id(),
        manufacturer_id,
        device_id,
        record,
    })
}

fn decode_descriptor(payload: &[u8]) -> Result<TelemetryRecord<'_>> {
    if payload.len() < 2 {
        return Err(ExBusError::Protocol("Descriptor too short".to_string()));
    }

    let label_len = (payload[1] >> 3) as usize;
    let unit_len = (payload[1] & 0x07) as usize;
    if payload.len() < 2 + label_len + unit_len {
        return Err(ExBusError::Protocol("Descriptor text truncated".to_string()));
    }

    Ok(TelemetryRecord::Descriptor {
        id: payload[0],
        label: &payload[2..2 + label_len],
        unit: &payload[2 + label_len..2 + label_len + unit_len],
    })
}

fn decode_value(payload: &[u8]) -> Result<TelemetryRecord<'static>> {
    let Some((&head, rest)) = payload.split_first() else {
        return Err(ExBusError::Protocol("Value record empty".to_string()));
    };

    let value_type = ValueType::from_tag(head & 0x0F).ok_or_else(|| {
        ExBusError::Protocol(format!("Unknown value type tag {}", head & 0x0F))
    })?;

    Ok(TelemetryRecord::Value {
        id: head >> 4,
        value: TelemetryValue::decode(value_type, rest)?,
    })
}

/// Name and unit of one sensor, as announced in descriptor records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub id: u8,
    pub label: String,
    pub unit: String,
}

/// Fixed parameters of the responder, set once at bring-up
#[derive(Debug, Clone)]
pub struct TelemetryParams {
    pub manufacturer_id: u16,
    pub device_id: u16,
    /// Sensor id carried by value records
    pub value_sensor_id: u8,
    /// Descriptors cycled through in order
    pub descriptors: Vec<SensorDescriptor>,
    /// Requests answered with descriptors before values start
    pub descriptor_burst: u32,
    /// After the burst, every n-th request carries a descriptor
    pub descriptor_interval: u32,
}

impl Default for TelemetryParams {
    fn default() -> Self {
        Self {
            manufacturer_id: 0xA410,
            device_id: 0xF3FC,
            value_sensor_id: 1,
            descriptors: vec![
                SensorDescriptor {
                    id: 0,
                    label: "EXBusRX".to_string(),
                    unit: String::new(),
                },
                SensorDescriptor {
                    id: 1,
                    label: "Alt".to_string(),
                    unit: "m".to_string(),
                },
            ],
            descriptor_burst: 10,
            descriptor_interval: 10,
        }
    }
}

/// Builds and sends telemetry replies
#[derive(Debug)]
pub struct TelemetryResponder {
    params: TelemetryParams,
    request_count: u32,
    next_descriptor: usize,
    tx_buffer: [u8; EXBUS_TX_BUFFER_LEN],
}

impl TelemetryResponder {
    pub fn new(params: TelemetryParams) -> Self {
        Self {
            params,
            request_count: 0,
            next_descriptor: 0,
            tx_buffer: [0u8; EXBUS_TX_BUFFER_LEN],
        }
    }

    /// Number of requests answered so far
    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    fn descriptor_due(&self) -> bool {
        if self.params.descriptors.is_empty() {
            return false;
        }

        let interval = self.params.descriptor_interval.max(1);
        self.request_count < self.params.descriptor_burst
            || self.request_count.wrapping_add(1) % interval == 0
    }

    /// Answer one telemetry request
    ///
    /// Send failures are not retried; the next request produces a fresh
    /// reply.
    ///
    /// # Arguments
    ///
    /// * `packet_id` - Packet id of the request, echoed in the reply
    /// * `value` - Current reading of the value sensor
    /// * `sink` - Non-blocking output
    pub fn respond<S>(&mut self, packet_id: u8, value: i32, sink: &mut S)
    where
        S: TelemetrySink + ?Sized,
    {
        let send_descriptor = self.descriptor_due();
        self.request_count = self.request_count.wrapping_add(1);

        let record = if send_descriptor {
            let descriptor = &self.params.descriptors[self.next_descriptor];
            self.next_descriptor = (self.next_descriptor + 1) % self.params.descriptors.len();
            TelemetryRecord::Descriptor {
                id: descriptor.id,
                label: descriptor.label.as_bytes(),
                unit: descriptor.unit.as_bytes(),
            }
        } else {
            TelemetryRecord::Value {
                id: self.params.value_sensor_id,
                value: TelemetryValue::int30(value),
            }
        };

        let len = match encode_telemetry_reply(
            &mut self.tx_buffer,
            packet_id,
            self.params.manufacturer_id,
            self.params.device_id,
            &record,
        ) {
            Ok(len) => len,
            Err(e) => {
                warn!("Failed to encode telemetry reply: {}", e);
                return;
            }
        };

        match sink.send_nonblocking(&self.tx_buffer[..len]) {
            Ok(_) => trace!("Sent telemetry reply ({} bytes) for packet {}", len, packet_id),
            Err(e) => debug!("Telemetry reply dropped: {}", e),
        }
    }
}
