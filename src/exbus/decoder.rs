//! # EX Bus Frame Decoder
//!
//! Byte-synchronous state machine that recovers frame boundaries from the
//! raw receiver stream.
//!
//! ## States
//!
//! ```text
//! Idle -> Bus -> Len -> FillBuf -> Last -> Idle
//!                  \
//!                   -> Discard -> Idle
//! ```
//!
//! Every byte is folded into the running CRC first, then (unless
//! discarding) appended to the receive buffer, then the transition runs.
//! A frame is accepted only if the running CRC is zero after its last byte.
//!
//! Frames are routed to `Discard` when the length field exceeds the buffer,
//! is too short to hold a data block, or when the sync byte marks a reply
//! from another device. Discard swallows exactly `length` bytes counted from
//! the sync byte.

use super::crc::crc16_update;
use super::protocol::*;

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// Waiting for a sync byte
    #[default]
    Idle,
    /// Expecting the bus state byte
    Bus,
    /// Expecting the length byte
    Len,
    /// Collecting frame bytes
    FillBuf,
    /// Skipping a frame that will not be parsed
    Discard,
    /// Expecting the final CRC byte
    Last,
}

/// Result of feeding one byte
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome<'a> {
    /// Frame still in progress, or byte ignored
    Pending,
    /// Frame complete but its CRC did not resolve to zero
    CrcMismatch,
    /// Frame complete and CRC-valid, sync through CRC inclusive
    Frame(&'a [u8]),
}

/// EX Bus frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    bus_state: BusState,
    sync: Option<SyncByte>,
    rx_buffer: [u8; EXBUS_RX_BUFFER_LEN],
    rx_buffer_pos: usize,
    frame_length: usize,
    discard_remaining: usize,
    crc: u16,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            bus_state: BusState::Hold,
            sync: None,
            rx_buffer: [0u8; EXBUS_RX_BUFFER_LEN],
            rx_buffer_pos: 0,
            frame_length: 0,
            discard_remaining: 0,
            crc: 0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Bus state flag of the most recent frame header
    pub fn bus_state(&self) -> BusState {
        self.bus_state
    }

    /// Write cursor into the receive buffer
    pub fn rx_buffer_pos(&self) -> usize {
        self.rx_buffer_pos
    }

    /// Length field latched from the current frame
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Running CRC of the current frame
    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// Free space left in the receive buffer
    ///
    /// While discarding, no buffer is being filled and the full capacity is
    /// reported.
    pub fn headroom(&self) -> usize {
        match self.state {
            DecoderState::Discard => EXBUS_RX_BUFFER_LEN,
            _ => EXBUS_RX_BUFFER_LEN - self.rx_buffer_pos,
        }
    }

    /// Drop any partially received frame and wait for the next sync byte
    ///
    /// # Returns
    ///
    /// * `bool` - Whether a partial frame was dropped
    pub fn abandon_frame(&mut self) -> bool {
        let partial = self.rx_buffer_pos != 0 || self.state != DecoderState::Idle;
        self.reset();
        partial
    }

    fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.rx_buffer_pos = 0;
        self.discard_remaining = 0;
        self.crc = 0;
    }

    /// Feed one received byte
    ///
    /// # Arguments
    ///
    /// * `byte` - Next byte from the receiver
    ///
    /// # Returns
    ///
    /// * `DecodeOutcome` - `Frame` borrows the receive buffer, which stays
    ///   intact until the next byte is pushed
    pub fn push(&mut self, byte: u8) -> DecodeOutcome<'_> {
        self.crc = crc16_update(self.crc, byte);

        if self.state != DecoderState::Discard {
            if self.rx_buffer_pos >= EXBUS_RX_BUFFER_LEN {
                self.reset();
                return DecodeOutcome::Pending;
            }
            self.rx_buffer[self.rx_buffer_pos] = byte;
            self.rx_buffer_pos += 1;
        }

        match self.state {
            DecoderState::Idle => match SyncByte::from_byte(byte) {
                Some(sync) => {
                    self.sync = Some(sync);
                    self.state = DecoderState::Bus;
                }
                None => self.reset(),
            },
            DecoderState::Bus => {
                self.bus_state = BusState::from_byte(byte);
                self.state = DecoderState::Len;
            }
            DecoderState::Len => {
                self.frame_length = byte as usize;

                let oversized = self.frame_length > EXBUS_RX_BUFFER_LEN;
                let undersized = self.frame_length < EXBUS_MIN_FRAME_LEN;
                let reply = self.sync == Some(SyncByte::Reply);

                if oversized || undersized || reply {
                    self.discard_remaining = self.frame_length.saturating_sub(EXBUS_PREAMBLE_LEN);
                    if self.discard_remaining == 0 {
                        self.reset();
                    } else {
                        self.state = DecoderState::Discard;
                    }
                } else {
                    self.state = DecoderState::FillBuf;
                }
            }
            DecoderState::FillBuf => {
                if self.rx_buffer_pos >= self.frame_length - 1 {
                    self.state = DecoderState::Last;
                }
            }
            DecoderState::Discard => {
                self.discard_remaining -= 1;
                if self.discard_remaining == 0 {
                    self.reset();
                }
            }
            DecoderState::Last => {
                let len = self.rx_buffer_pos;
                let valid = self.crc == 0;
                self.reset();

                return if valid {
                    DecodeOutcome::Frame(&self.rx_buffer[..len])
                } else {
                    DecodeOutcome::CrcMismatch
                };
            }
        }

        DecodeOutcome::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exbus::crc::crc16;

    /// Channel frame: sync, release, length, id, block 0x31, channel words, CRC
    fn channel_frame(values: &[u16]) -> Vec<u8> {
        let mut frame = vec![
            SyncByte::CHANNEL,
            EXBUS_BUS_RELEASE,
            (6 + values.len() * 2 + 2) as u8,
            0x00,
            BlockId::CHANNELS,
            (values.len() * 2) as u8,
        ];
        for value in values {
            frame.extend_from_slice(&value.to_le_bytes());
        }
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn feed(decoder: &mut FrameDecoder, bytes: &[u8]) -> (usize, usize) {
        let mut frames = 0;
        let mut crc_errors = 0;
        for &byte in bytes {
            match decoder.push(byte) {
                DecodeOutcome::Pending => {}
                DecodeOutcome::CrcMismatch => crc_errors += 1,
                DecodeOutcome::Frame(_) => frames += 1,
            }
        }
        (frames, crc_errors)
    }

    #[test]
    fn test_initial_state() {
        let decoder = FrameDecoder::new();
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(decoder.rx_buffer_pos(), 0);
        assert_eq!(decoder.headroom(), EXBUS_RX_BUFFER_LEN);
    }

    #[test]
    fn test_non_sync_byte_stays_idle() {
        let mut decoder = FrameDecoder::new();

        for byte in (0..=255u8).filter(|b| SyncByte::from_byte(*b).is_none()) {
            assert_eq!(decoder.push(byte), DecodeOutcome::Pending);
            assert_eq!(decoder.state(), DecoderState::Idle);
            assert_eq!(decoder.rx_buffer_pos(), 0);
            assert_eq!(decoder.crc(), 0);
        }
    }

    #[test]
    fn test_state_progression() {
        let mut decoder = FrameDecoder::new();
        let frame = channel_frame(&[1500, 1500]);

        decoder.push(frame[0]);
        assert_eq!(decoder.state(), DecoderState::Bus);
        decoder.push(frame[1]);
        assert_eq!(decoder.state(), DecoderState::Len);
        assert_eq!(decoder.bus_state(), BusState::Release);
        decoder.push(frame[2]);
        assert_eq!(decoder.state(), DecoderState::FillBuf);
        assert_eq!(decoder.frame_length(), frame.len());

        for &byte in &frame[3..frame.len() - 1] {
            decoder.push(byte);
        }
        assert_eq!(decoder.state(), DecoderState::Last);

        let outcome = decoder.push(frame[frame.len() - 1]);
        assert_eq!(outcome, DecodeOutcome::Frame(&frame[..]));
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(decoder.rx_buffer_pos(), 0);
        assert_eq!(decoder.crc(), 0);
    }

    #[test]
    fn test_crc_mismatch() {
        let mut decoder = FrameDecoder::new();
        let mut frame = channel_frame(&[1500, 1500]);
        frame[7] ^= 0x10;

        assert_eq!(feed(&mut decoder, &frame), (0, 1));
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut decoder = FrameDecoder::new();
        let mut stream = channel_frame(&[1000, 2000]);
        stream.extend(channel_frame(&[3000; 8]));
        stream.extend(channel_frame(&[4000]));

        assert_eq!(feed(&mut decoder, &stream), (3, 0));
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut decoder = FrameDecoder::new();
        let mut stream = vec![0x00, 0xFF, 0x12, 0x55];
        stream.extend(channel_frame(&[1500]));

        assert_eq!(feed(&mut decoder, &stream), (1, 0));
    }

    #[test]
    fn test_oversized_frame_discarded_exactly() {
        let mut decoder = FrameDecoder::new();
        let length = 200usize;

        let mut stream = vec![SyncByte::CHANNEL, EXBUS_BUS_RELEASE, length as u8];
        stream.extend(std::iter::repeat(0xAA).take(length - 3));

        for &byte in &stream[..3] {
            decoder.push(byte);
        }
        assert_eq!(decoder.state(), DecoderState::Discard);
        assert_eq!(decoder.headroom(), EXBUS_RX_BUFFER_LEN);

        for (i, &byte) in stream[3..].iter().enumerate() {
            assert_eq!(decoder.push(byte), DecodeOutcome::Pending);
            if i + 4 < length {
                assert_eq!(decoder.state(), DecoderState::Discard);
            }
        }
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(decoder.rx_buffer_pos(), 0);

        assert_eq!(feed(&mut decoder, &channel_frame(&[1500])), (1, 0));
    }

    #[test]
    fn test_discarded_payload_may_contain_sync_bytes() {
        let mut decoder = FrameDecoder::new();
        let mut stream = vec![SyncByte::CHANNEL, 0x00, 140];
        stream.extend(std::iter::repeat(SyncByte::CHANNEL).take(137));
        stream.extend(channel_frame(&[1234]));

        assert_eq!(feed(&mut decoder, &stream), (1, 0));
    }

    #[test]
    fn test_reply_frame_discarded() {
        let mut decoder = FrameDecoder::new();
        let mut reply = channel_frame(&[1500, 1500]);
        reply[0] = SyncByte::REPLY;
        let crc = crc16(&reply[..reply.len() - 2]);
        let end = reply.len();
        reply[end - 2..].copy_from_slice(&crc.to_le_bytes());

        assert_eq!(feed(&mut decoder, &reply), (0, 0));
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(feed(&mut decoder, &channel_frame(&[1500])), (1, 0));
    }

    #[test]
    fn test_undersized_length_discarded() {
        let mut decoder = FrameDecoder::new();
        let stream = [SyncByte::CHANNEL, 0x01, 0x05, 0x00, 0x00];

        assert_eq!(feed(&mut decoder, &stream), (0, 0));
        assert_eq!(decoder.state(), DecoderState::Idle);

        // Length too small to even cover the preamble
        let stream = [SyncByte::REQUEST, 0x01, 0x02];
        assert_eq!(feed(&mut decoder, &stream), (0, 0));
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn test_maximum_length_frame() {
        let mut decoder = FrameDecoder::new();
        let count = (EXBUS_RX_BUFFER_LEN - 8) / 2;
        let values: Vec<u16> = (0..count as u16).collect();
        let frame = channel_frame(&values);
        assert_eq!(frame.len(), EXBUS_RX_BUFFER_LEN);

        assert_eq!(feed(&mut decoder, &frame), (1, 0));
    }

    #[test]
    fn test_headroom_tracks_cursor() {
        let mut decoder = FrameDecoder::new();
        let frame = channel_frame(&[1500, 1500]);

        for &byte in &frame[..5] {
            decoder.push(byte);
        }
        assert_eq!(decoder.headroom(), EXBUS_RX_BUFFER_LEN - 5);
    }

    #[test]
    fn test_abandon_frame() {
        let mut decoder = FrameDecoder::new();
        let frame = channel_frame(&[1500, 1500]);

        for &byte in &frame[..6] {
            decoder.push(byte);
        }
        assert!(decoder.abandon_frame());
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(decoder.rx_buffer_pos(), 0);
        assert_eq!(decoder.crc(), 0);
        assert!(!decoder.abandon_frame());

        assert_eq!(feed(&mut decoder, &frame), (1, 0));
    }
}
