//! # acelink Core Library
//!
//! Host-side driver for ACE multi-slot filament changers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The framed JSON serial protocol (checksum, framing, reconnect/backoff)
//! - A single-flight request dispatcher with heartbeat status polling
//! - A mirror of the device status
//! - Filament routing: park to toolhead, reject and tool change
//! - Persistence of the loaded tool and filament position
//!
//! ## Example
//!
//! ```rust,ignore
//! use acelink_core::{mock::MockPrinter, Ace, AceConfig};
//! use std::time::Instant;
//!
//! let config = AceConfig::load("ace.json")?;
//! let mut ace = Ace::with_serial(config, MockPrinter::new().host())?;
//! ace.connect()?;
//! ace.change_tool(Some(1))?;
//!
//! loop {
//!     let report = ace.tick(Instant::now());
//!     ace.run_deferred();
//!     for event in report.events {
//!         println!("{:?}", event);
//!     }
//!     std::thread::sleep(report.next_in);
//! }
//! ```

pub mod ace;
pub mod config;
pub mod deferred;
pub mod device;
pub mod error;
pub mod events;
pub mod host;
pub mod mock;
pub mod persistence;
pub mod protocol;
pub mod routing;
pub mod sim;

pub use ace::{Ace, TickReport};
pub use config::{AceConfig, ConfigError, TimingConfig};
pub use error::{AceError, Fault, Result, Sensor};
pub use events::AceEvent;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::ace::{Ace, TickReport};
    pub use crate::config::AceConfig;
    pub use crate::deferred::{DeferredKind, DeferredQueue};
    pub use crate::device::{DeviceInfo, DeviceState, DeviceStatus, SlotOverride, SlotState};
    pub use crate::error::{AceError, Fault};
    pub use crate::events::AceEvent;
    pub use crate::host::{FilamentSensor, Host, MacroRunner, Motion, PauseControl};
    pub use crate::persistence::{JsonFileStore, MemoryStore, VariableStore};
    pub use crate::protocol::{Command, Connector, SerialConnector};
    pub use crate::routing::{FilamentPosition, RouterState};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
