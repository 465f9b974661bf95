//! Driver-level errors and routing faults

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::persistence::StoreError;
use crate::protocol::{DeviceError, ProtocolError};

/// Filament presence sensors along the path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    /// Just before the extruder gears
    Extruder,
    /// Inside the toolhead, after the gears
    Toolhead,
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensor::Extruder => write!(f, "extruder"),
            Sensor::Toolhead => write!(f, "toolhead"),
        }
    }
}

/// Why a routing sequence stopped and paused the printer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Fault {
    /// A sensor never changed state
    #[error("{sensor} sensor did not change after {attempts} attempts")]
    SensorTimeout { sensor: Sensor, attempts: u32 },

    /// Device stayed busy
    #[error("device not ready after {0:?}")]
    ReadyTimeout(Duration),

    /// Device answered with an error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Request lost to a link reset
    #[error("{method} request lost on the link")]
    CommandLost { method: String },

    /// Feed-assist count never settled
    #[error("park did not settle ({0} ready status polls seen)")]
    ParkTimeout(u32),

    /// Host work failed
    #[error("{task} failed: {reason}")]
    Deferred { task: String, reason: String },

    /// Routing state could not be saved
    #[error("could not save routing state: {0}")]
    Store(String),
}

/// Errors returned by [`crate::Ace`] operations
#[derive(Error, Debug)]
pub enum AceError {
    /// Argument out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested slot has no ready spool
    #[error("slot {0} is empty")]
    EmptySlot(u8),

    /// Another operation is running
    #[error("a {0} sequence is running")]
    Busy(String),

    /// Router paused after a fault
    #[error("paused after fault: {0}")]
    Paused(Fault),

    /// Never connected
    #[error("not connected")]
    NotConnected,

    /// Link failure
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Persistence failure
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result alias for driver operations
pub type Result<T> = std::result::Result<T, AceError>;
