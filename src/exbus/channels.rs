//! # Channel Store
//!
//! Fixed-capacity store of decoded EX Bus channel values.
//!
//! Each slot is an independent `AtomicU16`, so a reader running alongside
//! the decoder may see old values for some channels and new values for
//! others, but never a torn individual value.
//!
//! ## Writers
//!
//! Only two paths write the store, and both run through `&mut ExBusDevice`:
//! - the frame decoder, after a CRC-valid channel frame
//! - the failsafe supervisor, after sustained loss of valid frames
//!
//! ## Value Units
//!
//! Values are stored as transmitted: 1/8 µs units, so 1.5 ms is 12000.

use std::sync::atomic::{AtomicU16, Ordering};

use super::protocol::EXBUS_MAX_CHANNELS;

/// Value written to every slot on failsafe, and held before the first frame
pub const EXBUS_FAILSAFE_VALUE: u16 = 0;

/// Atomic per-channel value store
#[derive(Debug)]
pub struct ChannelStore {
    slots: [AtomicU16; EXBUS_MAX_CHANNELS],
}

impl Default for ChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStore {
    /// Create a store with every slot at the failsafe value
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU16::new(EXBUS_FAILSAFE_VALUE)),
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Read one channel
    ///
    /// # Arguments
    ///
    /// * `channel` - Channel index, 0-based
    ///
    /// # Returns
    ///
    /// * `Option<u16>` - Stored value, or `None` if the index is out of range
    pub fn get(&self, channel: usize) -> Option<u16> {
        self.slots
            .get(channel)
            .map(|slot| slot.load(Ordering::Acquire))
    }

    /// Copy the current values into a plain array
    pub fn snapshot(&self) -> [u16; EXBUS_MAX_CHANNELS] {
        std::array::from_fn(|i| self.slots[i].load(Ordering::Acquire))
    }

    /// Unpack little-endian channel words from a channel data block payload
    ///
    /// The channel count is half the payload length, clamped to the store
    /// capacity. A trailing odd byte is ignored. Slots past the channel
    /// count are reset to the failsafe value.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of channels written
    pub(crate) fn update_from_payload(&self, payload: &[u8]) -> usize {
        let mut written = 0;

        for (slot, word) in self.slots.iter().zip(payload.chunks_exact(2)) {
            slot.store(u16::from_le_bytes([word[0], word[1]]), Ordering::Release);
            written += 1;
        }

        for slot in &self.slots[written..] {
            slot.store(EXBUS_FAILSAFE_VALUE, Ordering::Release);
        }

        written
    }

    /// Write the same value into every slot
    pub(crate) fn fill(&self, value: u16) {
        for slot in &self.slots {
            slot.store(value, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_holds_failsafe_value() {
        let store = ChannelStore::new();
        assert_eq!(store.capacity(), EXBUS_MAX_CHANNELS);

        for i in 0..EXBUS_MAX_CHANNELS {
            assert_eq!(store.get(i), Some(EXBUS_FAILSAFE_VALUE));
        }
    }

    #[test]
    fn test_get_out_of_range() {
        let store = ChannelStore::new();
        assert_eq!(store.get(EXBUS_MAX_CHANNELS), None);
        assert_eq!(store.get(usize::MAX), None);
    }

    #[test]
    fn test_update_from_payload_little_endian() {
        let store = ChannelStore::new();
        let payload = [0xDC, 0x05, 0xE0, 0x2E, 0x40, 0x1F];

        assert_eq!(store.update_from_payload(&payload), 3);
        assert_eq!(store.get(0), Some(1500));
        assert_eq!(store.get(1), Some(12000));
        assert_eq!(store.get(2), Some(8000));
        assert_eq!(store.get(3), Some(EXBUS_FAILSAFE_VALUE));
    }

    #[test]
    fn test_update_ignores_trailing_odd_byte() {
        let store = ChannelStore::new();
        assert_eq!(store.update_from_payload(&[0xDC, 0x05, 0xFF]), 1);
        assert_eq!(store.get(1), Some(EXBUS_FAILSAFE_VALUE));
    }

    #[test]
    fn test_update_clamps_to_capacity() {
        let store = ChannelStore::new();
        let payload = vec![0x01; (EXBUS_MAX_CHANNELS + 8) * 2];

        assert_eq!(store.update_from_payload(&payload), EXBUS_MAX_CHANNELS);
        assert!(store.snapshot().iter().all(|&v| v == 0x0101));
    }

    #[test]
    fn test_shorter_frame_clears_unused_slots() {
        let store = ChannelStore::new();
        let wide: Vec<u8> = [1500u16; 16].iter().flat_map(|v| v.to_le_bytes()).collect();
        let narrow: Vec<u8> = [1600u16; 8].iter().flat_map(|v| v.to_le_bytes()).collect();

        assert_eq!(store.update_from_payload(&wide), 16);
        assert_eq!(store.update_from_payload(&narrow), 8);

        for i in 0..8 {
            assert_eq!(store.get(i), Some(1600));
        }
        for i in 8..EXBUS_MAX_CHANNELS {
            assert_eq!(store.get(i), Some(EXBUS_FAILSAFE_VALUE));
        }
    }

    #[test]
    fn test_fill() {
        let store = ChannelStore::new();
        store.update_from_payload(&[0xDC, 0x05, 0xDC, 0x05]);
        store.fill(EXBUS_FAILSAFE_VALUE);

        assert!(store.snapshot().iter().all(|&v| v == EXBUS_FAILSAFE_VALUE));
    }
}
