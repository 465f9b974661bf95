//! Printer-side collaborators
//!
//! The driver never talks to printer hardware directly. Sensors, extruder
//! motion, pausing and macro execution are reached through these traits.

use std::time::Duration;

use crate::persistence::VariableStore;

/// Binary filament presence switch
pub trait FilamentSensor: Send {
    fn present(&self) -> bool;
}

/// Extruder motion primitive
pub trait Motion: Send {
    /// Move the extruder axis by `distance` mm at `speed` mm/s and wait for
    /// the move. Returns the new axis position.
    fn advance(&mut self, distance: f64, speed: f64) -> f64;

    /// Let the motion queue idle
    fn dwell(&mut self, duration: Duration);
}

/// Print pause control
pub trait PauseControl: Send {
    fn is_paused(&self) -> bool;
    fn trigger_pause(&mut self);
}

/// Runs host G-code macros such as `CUT_TIP`
pub trait MacroRunner: Send {
    fn run(&mut self, script: &str) -> Result<(), String>;
}

/// Everything the driver needs from the printer
pub struct Host {
    /// Sensor at the extruder inlet
    pub extruder_sensor: Box<dyn FilamentSensor>,
    /// Sensor in the toolhead
    pub toolhead_sensor: Box<dyn FilamentSensor>,
    /// Extruder motion
    pub motion: Box<dyn Motion>,
    /// Print pause control
    pub pause: Box<dyn PauseControl>,
    /// Macro runner
    pub macros: Box<dyn MacroRunner>,
    /// Persistent variables
    pub store: Box<dyn VariableStore>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("paused", &self.pause.is_paused())
            .finish_non_exhaustive()
    }
}
