//! Correlation table
//!
//! Maps in-flight request ids to what should happen when the answer arrives.

use std::collections::HashMap;

use tracing::warn;

/// What to do with a response, decided when the request is queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Status poll issued by the dispatcher
    Heartbeat,
    /// `get_info` banner
    Info,
    /// Dryer started
    DryingStarted,
    /// Dryer stopped
    DryingStopped,
    /// Feed-assist start requested outside a routing sequence
    FeedAssistStarted { index: u8 },
    /// Feed-assist stop requested outside a routing sequence
    FeedAssistStopped { index: u8 },
    /// Manual feed
    Fed { index: u8, length: u32 },
    /// Manual retract
    Retracted { index: u8, length: u32 },
    /// Raw request, answer is reported verbatim
    Debug { method: String },
    /// A step of a routing sequence is waiting on this
    Routine { token: u64 },
}

/// Pending completions keyed by request id
#[derive(Debug, Default)]
pub struct PendingCalls {
    entries: HashMap<u16, Completion>,
}

impl PendingCalls {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion for `id`
    pub fn insert(&mut self, id: u16, completion: Completion) {
        if let Some(previous) = self.entries.insert(id, completion) {
            warn!("request id {} reused while still pending ({:?})", id, previous);
        }
    }

    /// Remove and return the completion for `id`
    pub fn take(&mut self, id: u16) -> Option<Completion> {
        self.entries.remove(&id)
    }

    /// Whether `id` is pending
    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    /// Abandon everything. The completions are returned, not run.
    pub fn clear(&mut self) -> Vec<Completion> {
        self.entries.drain().map(|(_, completion)| completion).collect()
    }

    /// Calls awaiting an answer
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing in flight
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_removes_entry() {
        let mut calls = PendingCalls::new();
        calls.insert(4, Completion::Info);
        assert!(calls.contains(4));
        assert_eq!(calls.take(4), Some(Completion::Info));
        assert!(calls.is_empty());
        assert_eq!(calls.take(4), None);
    }

    #[test]
    fn test_clear_abandons_all() {
        let mut calls = PendingCalls::new();
        calls.insert(1, Completion::Heartbeat);
        calls.insert(2, Completion::Routine { token: 9 });
        let abandoned = calls.clear();
        assert_eq!(abandoned.len(), 2);
        assert!(calls.is_empty());
    }
}
