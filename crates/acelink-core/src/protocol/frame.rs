//! Frame encoding/decoding
//!
//! Wire format:
//! - 2 bytes: magic `0xFF 0xAA`
//! - 2 bytes: payload length (little-endian)
//! - N bytes: payload (UTF-8 JSON)
//! - 2 bytes: checksum of the payload only (little-endian)
//! - 1 byte: terminator `0xFE`

use byteorder::{ByteOrder, LittleEndian};

use super::checksum::checksum;
use super::{FrameError, MAX_FRAME_SIZE};

/// Frame start marker
pub const MAGIC: [u8; 2] = [0xFF, 0xAA];

/// Frame end marker
pub const TERMINATOR: u8 = 0xFE;

/// Magic + length
pub const HEADER_LEN: usize = 4;

/// Checksum + terminator
pub const TRAILER_LEN: usize = 3;

/// Most bytes a terminator-bounded read can come up short by.
///
/// JSON never contains `0xFE`, but either checksum byte can, so a read that
/// stops at the first `0xFE` may end inside the trailer.
pub const MAX_MISSING_BYTES: usize = 2;

/// A decoded or ready-to-send frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame payload
    pub payload: Vec<u8>,
    /// Checksum of the payload
    pub checksum: u16,
}

impl Frame {
    /// Create a new frame with the given payload.
    ///
    /// Payloads larger than [`MAX_FRAME_SIZE`] are refused, since the
    /// receiving side would reject them anyway.
    pub fn new(payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(payload.len()));
        }
        let checksum = checksum(&payload);
        Ok(Self { payload, checksum })
    }

    /// Bytes still owed by a partially read frame.
    ///
    /// Zero once the declared length has arrived, or when `data` cannot be
    /// the start of a frame at all.
    pub fn pending_bytes(data: &[u8]) -> usize {
        if data.len() < HEADER_LEN {
            let prefix = data.len().min(MAGIC.len());
            if data[..prefix] != MAGIC[..prefix] {
                return 0;
            }
            return HEADER_LEN - data.len();
        }
        if data[0..2] != MAGIC {
            return 0;
        }
        let length = LittleEndian::read_u16(&data[2..4]) as usize;
        if length > MAX_FRAME_SIZE {
            return 0;
        }
        (HEADER_LEN + length + TRAILER_LEN).saturating_sub(data.len())
    }

    /// Decode a frame from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort(data.len()));
        }

        if data[0..2] != MAGIC {
            return Err(FrameError::BadMagic([data[0], data[1]]));
        }

        let length = LittleEndian::read_u16(&data[2..4]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        let expected = HEADER_LEN + length + TRAILER_LEN;
        if data.len() < expected {
            let missing = expected - data.len();
            if missing <= MAX_MISSING_BYTES {
                return Err(FrameError::Incomplete { missing });
            }
            return Err(FrameError::LengthMismatch {
                declared: length,
                received: data.len().saturating_sub(HEADER_LEN + TRAILER_LEN),
            });
        }
        if data.len() > expected {
            return Err(FrameError::LengthMismatch {
                declared: length,
                received: data.len() - HEADER_LEN - TRAILER_LEN,
            });
        }

        let terminator = data[expected - 1];
        if terminator != TERMINATOR {
            return Err(FrameError::BadTerminator(terminator));
        }

        let payload = data[HEADER_LEN..HEADER_LEN + length].to_vec();
        let received = LittleEndian::read_u16(&data[HEADER_LEN + length..expected - 1]);
        let computed = checksum(&payload);
        if received != computed {
            return Err(FrameError::ChecksumMismatch {
                expected: computed,
                actual: received,
            });
        }

        Ok(Self {
            payload,
            checksum: received,
        })
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        bytes.extend_from_slice(&MAGIC);

        let mut len_bytes = [0u8; 2];
        LittleEndian::write_u16(&mut len_bytes, self.payload.len() as u16);
        bytes.extend_from_slice(&len_bytes);

        bytes.extend_from_slice(&self.payload);

        let mut crc_bytes = [0u8; 2];
        LittleEndian::write_u16(&mut crc_bytes, self.checksum);
        bytes.extend_from_slice(&crc_bytes);

        bytes.push(TERMINATOR);
        bytes
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        HEADER_LEN + self.payload.len() + TRAILER_LEN
    }
}

/// Encode a payload into a complete frame
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    Frame::new(payload.to_vec()).map(|frame| frame.to_bytes())
}

/// Decode a complete frame and return its payload
pub fn decode(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    Frame::from_bytes(data).map(|frame| frame.payload)
}
