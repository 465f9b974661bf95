//! Park detection
//!
//! While filament is parked at the toolhead the feed-assist motor keeps
//! pushing until it meets resistance. The device counts assist activity in
//! `feed_assist_count`; once that count stops rising for more than the hit
//! window, the filament has arrived.

use crate::device::DeviceStatus;

/// What one heartbeat told us about a park
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkProgress {
    /// No park in progress
    NotParking,
    /// Device not ready, poll ignored
    Waiting,
    /// Count rose, motor still moving filament
    Advancing,
    /// Count unchanged for this many consecutive polls
    Stalled(u32),
    /// Park finished. Reported once per park.
    Arrived { assist_count: u64 },
}

/// Transient park bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParkContext {
    /// Waiting for arrival
    pub in_progress: bool,
    /// Park is the last leg of a tool change
    pub is_toolchange: bool,
    /// Tool unloaded by the tool change
    pub previous_tool: Option<u8>,
    /// Slot being parked
    pub target_index: u8,
    /// Highest count seen so far
    pub last_assist_count: u64,
    /// Consecutive polls without a rise
    pub hit_count: u32,
    /// Ready polls seen since the park began
    pub polls: u32,
}

impl ParkContext {
    /// Start watching for arrival, seeded with the current count
    pub fn begin(
        &mut self,
        target_index: u8,
        is_toolchange: bool,
        previous_tool: Option<u8>,
        assist_count: u64,
    ) {
        *self = Self {
            in_progress: true,
            is_toolchange,
            previous_tool,
            target_index,
            last_assist_count: assist_count,
            hit_count: 0,
            polls: 0,
        };
    }

    /// Feed one heartbeat into the detector
    pub fn observe(&mut self, status: &DeviceStatus, window: u32) -> ParkProgress {
        if !self.in_progress {
            return ParkProgress::NotParking;
        }
        if !status.is_ready() {
            return ParkProgress::Waiting;
        }

        self.polls += 1;
        let count = status.feed_assist_count;
        if count > self.last_assist_count {
            self.last_assist_count = count;
            self.hit_count = 0;
            ParkProgress::Advancing
        } else if self.hit_count < window {
            self.hit_count += 1;
            ParkProgress::Stalled(self.hit_count)
        } else {
            self.hit_count = 0;
            self.in_progress = false;
            ParkProgress::Arrived {
                assist_count: self.last_assist_count,
            }
        }
    }

    /// Forget any park in progress
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
