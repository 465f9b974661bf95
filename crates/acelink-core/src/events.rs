//! Notifications produced by [`crate::Ace::tick`]

use serde_json::Value;

use crate::error::Fault;
use crate::protocol::DeviceError;
use crate::routing::FilamentPosition;

/// Something the host should know about
#[derive(Debug, Clone, PartialEq)]
pub enum AceEvent {
    /// `get_info` answered after connecting
    Connected { model: String, firmware: String },
    /// The link dropped; these many requests were abandoned
    LinkLost { abandoned: usize },
    /// The link was reopened
    Reconnected,
    /// A request outside any sequence failed on the device
    DeviceError(DeviceError),
    /// Dryer accepted the start
    DryingStarted,
    /// Dryer stopped
    DryingStopped,
    /// Feed-assist running on a slot
    FeedAssistEnabled { index: u8 },
    /// Feed-assist stopped on a slot
    FeedAssistDisabled { index: u8 },
    /// Manual feed accepted
    Fed { index: u8, length: u32 },
    /// Manual retract accepted
    Retracted { index: u8, length: u32 },
    /// Filament moved to a new position
    PositionChanged(FilamentPosition),
    /// Feed-assist stopped advancing at the toolhead
    ParkArrived { index: u8, assist_count: u64 },
    /// Tool change finished
    ToolChanged { from: Option<u8>, to: Option<u8> },
    /// Filament pulled back to the hub
    ToolRejected { index: u8 },
    /// A sequence stopped and the printer was paused
    Fault(Fault),
    /// Answer to a raw debug request
    DebugResponse { method: String, response: Value },
}
