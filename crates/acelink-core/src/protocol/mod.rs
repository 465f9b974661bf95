//! Serial Protocol Communication
//!
//! Implements the framed JSON protocol spoken by ACE filament changers:
//! frame codec, transport with reconnect/backoff, request correlation and the
//! single-flight dispatcher.

pub mod checksum;
pub mod commands;
pub mod correlation;
pub mod dispatcher;
mod error;
pub mod frame;
pub mod serial;
pub mod stream;
pub mod transport;

pub use checksum::checksum;
pub use commands::{Command, Request, Response};
pub use correlation::{Completion, PendingCalls};
pub use dispatcher::{
    CommandSink, DispatchReport, Dispatcher, Exchange, QueuedCommand, Resolved, MAX_REQUEST_ID,
};
pub use error::{DeviceError, FrameError, ProtocolError};
pub use frame::{decode, encode, Frame};
pub use serial::{list_ports, PortInfo};
pub use stream::Channel;
pub use transport::{Connector, SerialConnector, Transport, TransportConfig};

/// Default baud rate of the changer
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Largest payload accepted in one frame; also the read budget
pub const MAX_FRAME_SIZE: usize = 4096;
