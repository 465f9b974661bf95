//! Frame checksum
//!
//! The changer firmware uses its own 16-bit running hash rather than a
//! standard CRC. Both sides must reproduce the exact bit operations, so this
//! function must not be "simplified" into a table-driven CRC.

/// Initial value of the running checksum
const CHECKSUM_SEED: u16 = 0xFFFF;

/// Compute the checksum of a frame payload.
///
/// Order dependent: swapping two distinct bytes changes the result.
pub fn checksum(payload: &[u8]) -> u16 {
    let mut crc = CHECKSUM_SEED;
    for &byte in payload {
        let mut data = byte ^ (crc & 0xFF) as u8;
        data ^= (data & 0x0F) << 4;
        let data = data as u16;
        crc = ((data << 8) | (crc >> 8)) ^ (data >> 4) ^ (data << 3);
    }
    crc
}
