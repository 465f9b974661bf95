//! Protocol errors

use thiserror::Error;

/// Errors raised while decoding a single wire frame
///
/// A frame that fails to decode is dropped; the next heartbeat resynchronizes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a header
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    /// First two bytes are not `FF AA`
    #[error("Invalid magic bytes: {0:02x?}")]
    BadMagic([u8; 2]),

    /// Last byte is not `FE`
    #[error("Invalid terminator: {0:#04x}")]
    BadTerminator(u8),

    /// Declared or actual payload over the frame limit
    #[error("Payload too large: {0} bytes")]
    TooLarge(usize),

    /// Byte count disagrees with the length field
    #[error("Invalid data length: declared {declared}, received {received}")]
    LengthMismatch {
        /// Payload length from the header
        declared: usize,
        /// Payload bytes actually present
        received: usize,
    },

    /// Read ended inside the trailer
    #[error("Frame incomplete: {missing} byte(s) missing")]
    Incomplete {
        /// Bytes still to read
        missing: usize,
    },

    /// Payload checksum does not match the trailer
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the payload
        expected: u16,
        /// Checksum carried in the trailer
        actual: u16,
    },
}

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Port level failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No channel open
    #[error("Not connected to device")]
    NotConnected,

    /// Could not open the port
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Write attempts exhausted
    #[error("Write failed after {attempts} attempt(s): {reason}")]
    WriteFailed {
        /// Attempts made
        attempts: u32,
        /// Error of the last attempt
        reason: String,
    },

    /// Frame could not be encoded or decoded
    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),

    /// Answer did not match the request in flight
    #[error("Protocol desync: sent id {sent}, received {received:?}")]
    Desync {
        /// Id of the request in flight
        sent: u16,
        /// Id of the answer, if it decoded
        received: Option<u16>,
    },

    /// Request rejected before sending
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Payload is not the expected JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error on the channel
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A response that carried a non-zero `code`
///
/// Surfaced to whoever issued the request; never affects other state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device returned error {code} for '{method}': {msg}")]
pub struct DeviceError {
    /// Method of the failed request
    pub method: String,
    /// Device error code
    pub code: i64,
    /// Device supplied message
    pub msg: String,
}
