//! # EX Bus Protocol Constants and Types
//!
//! Core protocol definitions for Jeti EX Bus communication.
//!
//! ## Frame Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | Sync byte (frame sub-type) |
//! | 1 | 1 | Bus state (0x01 = release) |
//! | 2 | 1 | Frame length, sync through CRC inclusive |
//! | 3 | 1 | Packet id (echoed in replies) |
//! | 4 | 1 | Data block id |
//! | 5 | 1 | Data block length |
//! | 6 | N | Data block payload |
//! | len-2 | 2 | CRC-16, low byte first |
//!
//! Fields are read and written by offset; no struct is ever overlaid on a
//! byte buffer.

use crate::error::{ExBusError, Result};

/// Receive buffer capacity, also the largest frame the decoder will assemble
pub const EXBUS_RX_BUFFER_LEN: usize = 128;

/// Transmit buffer capacity for telemetry replies
pub const EXBUS_TX_BUFFER_LEN: usize = 128;

/// Maximum number of decoded channels
pub const EXBUS_MAX_CHANNELS: usize = 24;

/// Bus state byte meaning "sender releases the bus after this frame"
pub const EXBUS_BUS_RELEASE: u8 = 0x01;

/// Bus state byte written when holding the bus
pub const EXBUS_BUS_HOLD: u8 = 0x00;

/// Offset of the bus state byte
pub const OFFSET_BUS_STATE: usize = 1;

/// Offset of the frame length byte
pub const OFFSET_LENGTH: usize = 2;

/// Offset of the packet id byte
pub const OFFSET_PACKET_ID: usize = 3;

/// Offset of the data block id byte
pub const OFFSET_BLOCK_ID: usize = 4;

/// Offset of the data block length byte
pub const OFFSET_BLOCK_LENGTH: usize = 5;

/// Offset of the first data block payload byte
pub const OFFSET_BLOCK_PAYLOAD: usize = 6;

/// Size of the outer header (sync, bus state, length, packet id)
pub const EXBUS_HEADER_LEN: usize = 4;

/// Size of a data block header (id, length)
pub const EXBUS_BLOCK_HEADER_LEN: usize = 2;

/// Size of the trailing frame CRC
pub const EXBUS_CRC_LEN: usize = 2;

/// Bytes consumed once the length field has been read
pub const EXBUS_PREAMBLE_LEN: usize = 3;

/// Shortest frame the decoder accepts: header, data block header and CRC
pub const EXBUS_MIN_FRAME_LEN: usize = EXBUS_HEADER_LEN + EXBUS_BLOCK_HEADER_LEN + EXBUS_CRC_LEN;

/// Frame sub-type carried by the sync byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncByte {
    /// Reply from a device on the bus (0x3B); never parsed as inbound data
    Reply,
    /// Telemetry or JetiBox request (0x3D)
    Request,
    /// Channel data (0x3E)
    Channel,
}

impl SyncByte {
    /// Wire value of the reply sync byte
    pub const REPLY: u8 = 0x3B;
    /// Wire value of the request sync byte
    pub const REQUEST: u8 = 0x3D;
    /// Wire value of the channel sync byte
    pub const CHANNEL: u8 = 0x3E;

    /// Recognise a sync byte, `None` for anything else
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::REPLY => Some(Self::Reply),
            Self::REQUEST => Some(Self::Request),
            Self::CHANNEL => Some(Self::Channel),
            _ => None,
        }
    }

    /// Wire value of this sync byte
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Reply => Self::REPLY,
            Self::Request => Self::REQUEST,
            Self::Channel => Self::CHANNEL,
        }
    }
}

/// Bus arbitration flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusState {
    /// Sender keeps the bus
    #[default]
    Hold,
    /// Sender yields the bus after this frame
    Release,
}

impl BusState {
    /// Interpret a bus state byte; only 0x01 means release
    pub fn from_byte(byte: u8) -> Self {
        if byte == EXBUS_BUS_RELEASE {
            Self::Release
        } else {
            Self::Hold
        }
    }

    /// Wire value of this flag
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Hold => EXBUS_BUS_HOLD,
            Self::Release => EXBUS_BUS_RELEASE,
        }
    }
}

/// Data block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    /// Channel values (0x31)
    Channels,
    /// Telemetry request or reply (0x3A)
    Telemetry,
    /// Any other block (e.g. JetiBox, 0x3B); ignored
    Unknown(u8),
}

impl BlockId {
    /// Wire value of the channel data block id
    pub const CHANNELS: u8 = 0x31;
    /// Wire value of the telemetry block id
    pub const TELEMETRY: u8 = 0x3A;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::CHANNELS => Self::Channels,
            Self::TELEMETRY => Self::Telemetry,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Channels => Self::CHANNELS,
            Self::Telemetry => Self::TELEMETRY,
            Self::Unknown(other) => other,
        }
    }
}

/// Borrowed view over a complete, CRC-checked EX Bus frame
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    bytes: &'a [u8],
    sync: SyncByte,
}

impl<'a> FrameView<'a> {
    /// Wrap a complete frame
    ///
    /// # Arguments
    ///
    /// * `bytes` - Frame bytes from sync through CRC
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The buffer is shorter than a header plus data block header plus CRC
    /// - The sync byte is not recognised
    /// - The length field disagrees with the buffer length
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < EXBUS_MIN_FRAME_LEN {
            return Err(ExBusError::Protocol(format!(
                "Frame too short: {} bytes",
                bytes.len()
            )));
        }

        let sync = SyncByte::from_byte(bytes[0]).ok_or_else(|| {
            ExBusError::Protocol(format!("Invalid sync byte: 0x{:02X}", bytes[0]))
        })?;

        let length = bytes[OFFSET_LENGTH] as usize;
        if length != bytes.len() {
            return Err(ExBusError::Protocol(format!(
                "Length mismatch: header says {} bytes, got {}",
                length,
                bytes.len()
            )));
        }

        Ok(Self { bytes, sync })
    }

    pub fn sync(&self) -> SyncByte {
        self.sync
    }

    pub fn bus_state(&self) -> BusState {
        BusState::from_byte(self.bytes[OFFSET_BUS_STATE])
    }

    pub fn packet_id(&self) -> u8 {
        self.bytes[OFFSET_PACKET_ID]
    }

    pub fn block_id(&self) -> BlockId {
        BlockId::from_byte(self.bytes[OFFSET_BLOCK_ID])
    }

    /// Declared data block length
    pub fn block_length(&self) -> u8 {
        self.bytes[OFFSET_BLOCK_LENGTH]
    }

    /// Data block payload, bounded by both the declared block length and
    /// the bytes actually present before the CRC
    pub fn block_payload(&self) -> &'a [u8] {
        let end = self.bytes.len() - EXBUS_CRC_LEN;
        let declared = OFFSET_BLOCK_PAYLOAD + self.block_length() as usize;
        &self.bytes[OFFSET_BLOCK_PAYLOAD..declared.min(end)]
    }

    /// Trailing CRC as transmitted
    pub fn crc(&self) -> u16 {
        let end = self.bytes.len();
        u16::from_le_bytes([self.bytes[end - 2], self.bytes[end - 1]])
    }
}
