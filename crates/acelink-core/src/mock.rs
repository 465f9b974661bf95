//! In-memory printer collaborators
//!
//! Used by the tests and by the monitor example when no printer is attached.
//! Every mock is a cheap handle around shared state, so a clone kept by the
//! caller observes what the driver did with the boxed copy.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::host::{FilamentSensor, Host, MacroRunner, Motion, PauseControl};
use crate::persistence::{MemoryStore, VariableStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct SensorScript {
    upcoming: VecDeque<bool>,
    current: bool,
    reads: usize,
}

/// Sensor that replays a scripted sequence, then repeats the last value
#[derive(Debug, Clone, Default)]
pub struct MockSensor(Arc<Mutex<SensorScript>>);

impl MockSensor {
    /// Sensor fixed at `present`
    pub fn new(present: bool) -> Self {
        let sensor = Self::default();
        sensor.set(present);
        sensor
    }

    /// Sensor returning `values` in order, then the last one forever
    pub fn scripted(values: impl IntoIterator<Item = bool>) -> Self {
        let sensor = Self::default();
        sensor.push(values);
        sensor
    }

    /// Report `present` from now on, dropping any script
    pub fn set(&self, present: bool) {
        let mut state = lock(&self.0);
        state.upcoming.clear();
        state.current = present;
    }

    /// Append values to the script
    pub fn push(&self, values: impl IntoIterator<Item = bool>) {
        lock(&self.0).upcoming.extend(values);
    }

    /// Reads so far
    pub fn reads(&self) -> usize {
        lock(&self.0).reads
    }
}

impl FilamentSensor for MockSensor {
    fn present(&self) -> bool {
        let mut state = lock(&self.0);
        state.reads += 1;
        if let Some(next) = state.upcoming.pop_front() {
            state.current = next;
        }
        state.current
    }
}

#[derive(Debug, Default)]
struct MotionLog {
    moves: Vec<(f64, f64)>,
    dwells: Vec<Duration>,
    position: f64,
}

/// Records extruder moves and dwells without waiting
#[derive(Debug, Clone, Default)]
pub struct MockMotion(Arc<Mutex<MotionLog>>);

impl MockMotion {
    /// Fresh mock with nothing recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// `(distance, speed)` of every move so far
    pub fn moves(&self) -> Vec<(f64, f64)> {
        lock(&self.0).moves.clone()
    }

    /// Dwells requested so far
    pub fn dwells(&self) -> Vec<Duration> {
        lock(&self.0).dwells.clone()
    }

    /// Total extruder travel in mm
    pub fn position(&self) -> f64 {
        lock(&self.0).position
    }
}

impl Motion for MockMotion {
    fn advance(&mut self, distance: f64, speed: f64) -> f64 {
        let mut log = lock(&self.0);
        log.moves.push((distance, speed));
        log.position += distance;
        log.position
    }

    fn dwell(&mut self, duration: Duration) {
        lock(&self.0).dwells.push(duration);
    }
}

#[derive(Debug, Default)]
struct PauseState {
    paused: bool,
    triggers: usize,
}

/// Pause switch the test can resume
#[derive(Debug, Clone, Default)]
pub struct MockPause(Arc<Mutex<PauseState>>);

impl MockPause {
    /// Fresh mock with nothing recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator pressed resume
    pub fn resume(&self) {
        lock(&self.0).paused = false;
    }

    /// How many times a pause was requested
    pub fn triggers(&self) -> usize {
        lock(&self.0).triggers
    }
}

impl PauseControl for MockPause {
    fn is_paused(&self) -> bool {
        lock(&self.0).paused
    }

    fn trigger_pause(&mut self) {
        let mut state = lock(&self.0);
        state.paused = true;
        state.triggers += 1;
    }
}

#[derive(Debug, Default)]
struct MacroLog {
    scripts: Vec<String>,
    failing: Vec<String>,
}

/// Records macro invocations
#[derive(Debug, Clone, Default)]
pub struct MockMacros(Arc<Mutex<MacroLog>>);

impl MockMacros {
    /// Fresh mock with nothing recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Macros run so far
    pub fn scripts(&self) -> Vec<String> {
        lock(&self.0).scripts.clone()
    }

    /// Make every script starting with `prefix` fail
    pub fn fail_on(&self, prefix: impl Into<String>) {
        lock(&self.0).failing.push(prefix.into());
    }
}

impl MacroRunner for MockMacros {
    fn run(&mut self, script: &str) -> Result<(), String> {
        let mut log = lock(&self.0);
        log.scripts.push(script.to_string());
        if log.failing.iter().any(|prefix| script.starts_with(prefix.as_str())) {
            return Err(format!("{} failed", script));
        }
        Ok(())
    }
}

/// A full set of mocks with handles kept for inspection
#[derive(Debug, Clone, Default)]
pub struct MockPrinter {
    /// Extruder sensor handle
    pub extruder_sensor: MockSensor,
    /// Toolhead sensor handle
    pub toolhead_sensor: MockSensor,
    /// Motion handle
    pub motion: MockMotion,
    /// Pause handle
    pub pause: MockPause,
    /// Macro handle
    pub macros: MockMacros,
}

impl MockPrinter {
    /// Fresh mock with nothing recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Host wired to these mocks and a fresh [`MemoryStore`]
    pub fn host(&self) -> Host {
        self.host_with_store(Box::new(MemoryStore::new()))
    }

    /// Host over these mocks with a caller supplied store
    pub fn host_with_store(&self, store: Box<dyn VariableStore>) -> Host {
        Host {
            extruder_sensor: Box::new(self.extruder_sensor.clone()),
            toolhead_sensor: Box::new(self.toolhead_sensor.clone()),
            motion: Box::new(self.motion.clone()),
            pause: Box::new(self.pause.clone()),
            macros: Box::new(self.macros.clone()),
            store,
        }
    }
}
