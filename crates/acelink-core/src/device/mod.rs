//! Device model
//!
//! Typed status, the `get_info` banner and the mirror that keeps the last
//! values the changer reported.

pub mod mirror;
pub mod status;

pub use mirror::{SlotOverride, StatusMirror};
pub use status::{DeviceInfo, DeviceState, DeviceStatus, DryerStatus, Slot, SlotState};

