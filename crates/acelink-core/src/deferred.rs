//! Deferred work queue
//!
//! Extruder moves, motion dwells and macros have to run on the printer's
//! motion context, not inside the protocol tick. Routing steps push them
//! here and wait for the sequence number to be reported done.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::host::Host;

/// Work for the motion context
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredKind {
    /// Let the motion queue idle
    Dwell(Duration),
    /// Relative extruder move in mm at mm/s
    ExtruderMove { distance: f64, speed: f64 },
    /// Run a host macro
    RunMacro(String),
}

impl fmt::Display for DeferredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredKind::Dwell(d) => write!(f, "dwell {:.2}s", d.as_secs_f64()),
            DeferredKind::ExtruderMove { distance, speed } => {
                write!(f, "extruder move {}mm @ {}mm/s", distance, speed)
            }
            DeferredKind::RunMacro(script) => write!(f, "macro '{}'", script),
        }
    }
}

impl DeferredKind {
    /// Execute against the printer
    pub fn run(&self, host: &mut Host) -> Result<(), String> {
        match self {
            DeferredKind::Dwell(duration) => {
                host.motion.dwell(*duration);
                Ok(())
            }
            DeferredKind::ExtruderMove { distance, speed } => {
                let position = host.motion.advance(*distance, *speed);
                debug!("extruder at {:.1}", position);
                Ok(())
            }
            DeferredKind::RunMacro(script) => host.macros.run(script),
        }
    }
}

/// Queued unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredTask {
    /// Sequence number, unique per queue
    pub seq: u64,
    /// Work to do
    pub kind: DeferredKind,
}

/// Where a task is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Queued or running
    Pending,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed(String),
    /// Never issued, or its outcome was already collected
    Unknown,
}

/// FIFO of tasks plus the outcomes of finished ones
#[derive(Debug, Default)]
pub struct DeferredQueue {
    tasks: VecDeque<DeferredTask>,
    running: HashSet<u64>,
    /// Tasks nobody waits on; their outcomes are not kept
    detached: HashSet<u64>,
    outcomes: HashMap<u64, Result<(), String>>,
    next_seq: u64,
}

impl DeferredQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `kind`, returning its sequence number
    pub fn push(&mut self, kind: DeferredKind) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        debug!("deferred #{}: {}", seq, kind);
        self.tasks.push_back(DeferredTask { seq, kind });
        seq
    }

    /// Queue `kind` without keeping its outcome
    pub fn push_detached(&mut self, kind: DeferredKind) -> u64 {
        let seq = self.push(kind);
        self.detached.insert(seq);
        seq
    }

    /// Take the oldest task for execution
    pub fn pop(&mut self) -> Option<DeferredTask> {
        let task = self.tasks.pop_front()?;
        self.running.insert(task.seq);
        Some(task)
    }

    /// Record the outcome of a popped task
    pub fn complete(&mut self, seq: u64, outcome: Result<(), String>) {
        if let Err(reason) = &outcome {
            warn!("deferred #{} failed: {}", seq, reason);
        }
        self.running.remove(&seq);
        if !self.detached.remove(&seq) {
            self.outcomes.insert(seq, outcome);
        }
    }

    /// Where task `seq` is
    pub fn status(&self, seq: u64) -> TaskStatus {
        if let Some(outcome) = self.outcomes.get(&seq) {
            return match outcome {
                Ok(()) => TaskStatus::Done,
                Err(reason) => TaskStatus::Failed(reason.clone()),
            };
        }
        if self.running.contains(&seq) || self.tasks.iter().any(|t| t.seq == seq) {
            TaskStatus::Pending
        } else {
            TaskStatus::Unknown
        }
    }

    /// Collect and forget the outcome of `seq`
    pub fn take_outcome(&mut self, seq: u64) -> Option<Result<(), String>> {
        self.outcomes.remove(&seq)
    }

    /// Drop queued tasks and outcomes; sequence numbers keep counting
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.running.clear();
        self.detached.clear();
        self.outcomes.clear();
    }

    /// Tasks not yet taken
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Nothing queued
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fifo_order() {
        let mut queue = DeferredQueue::new();
        let a = queue.push(DeferredKind::RunMacro("CUT_TIP".into()));
        let b = queue.push(DeferredKind::Dwell(Duration::from_secs(1)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().seq, a);
        assert_eq!(queue.pop().unwrap().seq, b);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_outcomes() {
        let mut queue = DeferredQueue::new();
        let seq = queue.push(DeferredKind::ExtruderMove {
            distance: -20.0,
            speed: 5.0,
        });
        assert_eq!(queue.status(seq), TaskStatus::Pending);
        assert_eq!(queue.status(seq + 1), TaskStatus::Unknown);

        let task = queue.pop().unwrap();
        queue.complete(task.seq, Err("extruder cold".into()));
        assert_eq!(queue.status(seq), TaskStatus::Failed("extruder cold".into()));
        assert_eq!(queue.take_outcome(seq), Some(Err("extruder cold".into())));
        assert_eq!(queue.status(seq), TaskStatus::Unknown);
    }

    #[test]
    fn test_detached_outcome_not_kept() {
        let mut queue = DeferredQueue::new();
        let seq = queue.push_detached(DeferredKind::RunMacro("_ACE_ON_EMPTY_ERROR INDEX=2".into()));
        let task = queue.pop().unwrap();
        queue.complete(task.seq, Ok(()));
        assert_eq!(queue.take_outcome(seq), None);
    }
}
