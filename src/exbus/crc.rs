//! # EX Bus Checksums
//!
//! Two independent checksums protect EX Bus traffic:
//!
//! - **Frame CRC**: CRC-16/KERMIT (reflected CCITT polynomial 0x1021,
//!   initial value 0x0000, no final xor). Fed one byte at a time while a
//!   frame arrives; a frame whose trailing CRC is appended low byte first
//!   resolves the running value to zero.
//! - **Block checksum**: CRC-8 with polynomial 0x07 (initial value 0x00),
//!   covering only the telemetry record inside a data block.
//!
//! Both are computed without lookup tables. The decode path and the encode
//! path share [`crc16_update`].

/// CRC-8 polynomial used for telemetry records
const CRC8_POLY: u8 = 0x07;

/// Fold one byte into a running frame CRC
///
/// # Arguments
///
/// * `crc` - Current CRC value (0 at the start of a frame)
/// * `byte` - Next byte on the wire
///
/// # Returns
///
/// * `u16` - Updated CRC value
#[inline]
pub fn crc16_update(crc: u16, byte: u8) -> u16 {
    let mut data = byte ^ (crc as u8);
    data ^= data << 4;

    (((data as u16) << 8) | (crc >> 8)) ^ ((data >> 4) as u16) ^ ((data as u16) << 3)
}

/// Calculate the frame CRC over a complete buffer
///
/// # Examples
///
/// ```
/// use exbus_rx::exbus::crc::crc16;
///
/// assert_eq!(crc16(b"123456789"), 0x2189);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, &byte| crc16_update(crc, byte))
}

/// Fold one byte into a running block checksum
#[inline]
pub fn crc8_update(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;

    for _ in 0..8 {
        if (crc & 0x80) != 0 {
            crc = (crc << 1) ^ CRC8_POLY;
        } else {
            crc <<= 1;
        }
    }

    crc
}

/// Calculate the block checksum over a telemetry record
///
/// # Examples
///
/// ```
/// use exbus_rx::exbus::crc::crc8;
///
/// assert_eq!(crc8(b"123456789"), 0xF4);
/// ```
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &byte| crc8_update(crc, byte))
}
