//! Driver configuration
//!
//! Loaded from a JSON file. Every field has a default, so a partial file (or
//! `{}`) is a valid configuration.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{SerialConnector, TransportConfig, DEFAULT_BAUD_RATE};

/// Configuration failures
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// File is not valid JSON
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Tick and link timing, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Tick interval with nothing special going on
    pub idle_interval_ms: u64,
    /// Tick interval while waiting for a park to settle
    pub park_interval_ms: u64,
    /// Tick interval after a desync or while disconnected
    pub backoff_interval_ms: u64,
    /// Serial read timeout
    pub read_timeout_ms: u64,
    /// Unit of the write retry and reconnect backoff
    pub backoff_unit_ms: u64,
    /// How long a sequence waits for the device to report `ready`
    pub ready_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 500,
            park_interval_ms: 680,
            backoff_interval_ms: 1000,
            read_timeout_ms: 500,
            backoff_unit_ms: 1000,
            ready_timeout_ms: 60_000,
        }
    }
}

impl TimingConfig {
    /// Tick interval when nothing special is going on
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    /// Tick interval while parking
    pub fn park_interval(&self) -> Duration {
        Duration::from_millis(self.park_interval_ms)
    }

    /// Tick interval while the link is down
    pub fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_interval_ms)
    }

    /// Serial read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Base unit of the write and reconnect backoff
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    /// Longest wait for the device to report ready
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AceConfig {
    /// Serial device path
    pub serial: String,
    /// Serial baud rate
    pub baud: u32,
    /// Number of slots on the changer
    pub slot_count: u8,
    /// Default feed speed in mm/s
    pub feed_speed: u32,
    /// Default retract speed in mm/s
    pub retract_speed: u32,
    /// Bowden length pulled back into the hub when unloading, in mm
    pub toolchange_retract_length: u32,
    /// Upper bound for drying temperature in °C
    pub max_dryer_temperature: u32,
    /// Non-increasing feed-assist polls before a park counts as arrived
    pub park_hit_count: u32,
    /// Feed pulse issued while waiting for the extruder sensor, in mm
    pub park_feed_pulse_length: u32,
    /// Feed pulses before the extruder sensor gives up
    pub max_extruder_attempts: u32,
    /// Extruder advance per toolhead sensor poll, in mm
    pub toolhead_step_length: f64,
    /// Extruder speed for toolhead advances, in mm/s
    pub toolhead_step_speed: f64,
    /// Extruder advances before the toolhead sensor gives up
    pub max_toolhead_attempts: u32,
    /// Retract polls before a reject gives up
    pub max_retract_attempts: u32,
    /// Status polls a park may take before it is given up
    pub max_park_polls: u32,
    /// Stop feed-assist after a tool change park
    pub disable_assist_after_park: bool,
    /// Intervals and timeouts
    pub timing: TimingConfig,
}

impl Default for AceConfig {
    fn default() -> Self {
        Self {
            serial: "/dev/ttyACM0".into(),
            baud: DEFAULT_BAUD_RATE,
            slot_count: 4,
            feed_speed: 50,
            retract_speed: 50,
            toolchange_retract_length: 100,
            max_dryer_temperature: 55,
            park_hit_count: 5,
            park_feed_pulse_length: 10,
            max_extruder_attempts: 30,
            toolhead_step_length: 1.0,
            toolhead_step_speed: 5.0,
            max_toolhead_attempts: 100,
            max_retract_attempts: 20,
            max_park_polls: 300,
            disable_assist_after_park: false,
            timing: TimingConfig::default(),
        }
    }
}

impl AceConfig {
    /// Longest a park may wait for the assist count to settle
    pub fn park_timeout(&self) -> Duration {
        self.timing.park_interval() * self.max_park_polls
    }

    /// Load and validate a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: AceConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.trim().is_empty() {
            return Err(invalid("serial", "must not be empty"));
        }
        if self.baud == 0 {
            return Err(invalid("baud", "must be positive"));
        }
        if self.slot_count == 0 {
            return Err(invalid("slot_count", "must be at least 1"));
        }
        if self.feed_speed == 0 {
            return Err(invalid("feed_speed", "must be positive"));
        }
        if self.retract_speed == 0 {
            return Err(invalid("retract_speed", "must be positive"));
        }
        if self.toolchange_retract_length <= 5 {
            return Err(invalid("toolchange_retract_length", "must be longer than 5 mm"));
        }
        if self.max_dryer_temperature == 0 {
            return Err(invalid("max_dryer_temperature", "must be positive"));
        }
        if self.park_feed_pulse_length == 0 {
            return Err(invalid("park_feed_pulse_length", "must be positive"));
        }
        if self.toolhead_step_length.is_nan() || self.toolhead_step_length <= 0.0 {
            return Err(invalid("toolhead_step_length", "must be positive"));
        }
        if self.toolhead_step_speed.is_nan() || self.toolhead_step_speed <= 0.0 {
            return Err(invalid("toolhead_step_speed", "must be positive"));
        }

        let attempts = [
            ("park_hit_count", self.park_hit_count),
            ("max_extruder_attempts", self.max_extruder_attempts),
            ("max_toolhead_attempts", self.max_toolhead_attempts),
            ("max_retract_attempts", self.max_retract_attempts),
            ("max_park_polls", self.max_park_polls),
        ];
        for (field, value) in attempts {
            if value == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }

        let t = &self.timing;
        let intervals = [
            ("timing.idle_interval_ms", t.idle_interval_ms),
            ("timing.park_interval_ms", t.park_interval_ms),
            ("timing.backoff_interval_ms", t.backoff_interval_ms),
            ("timing.read_timeout_ms", t.read_timeout_ms),
            ("timing.ready_timeout_ms", t.ready_timeout_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(invalid(field, "must be positive"));
            }
        }

        Ok(())
    }

    /// Transport tuning derived from the timing block
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            backoff_unit: self.timing.backoff_unit(),
            read_timeout: self.timing.read_timeout(),
            ..TransportConfig::default()
        }
    }

    /// Connector for the configured serial port
    pub fn serial_connector(&self) -> SerialConnector {
        SerialConnector::new(&self.serial, self.baud, self.timing.read_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: AceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AceConfig::default());
        assert_eq!(config.serial, "/dev/ttyACM0");
        assert_eq!(config.timing.park_interval(), Duration::from_millis(680));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_override() {
        let config: AceConfig =
            serde_json::from_str(r#"{ "park_hit_count": 8, "timing": { "ready_timeout_ms": 5000 } }"#)
                .unwrap();
        assert_eq!(config.park_hit_count, 8);
        assert_eq!(config.timing.ready_timeout(), Duration::from_secs(5));
        assert_eq!(config.timing.idle_interval_ms, 500);
    }

    #[test]
    fn test_validate_rejects_short_retract() {
        let config = AceConfig {
            toolchange_retract_length: 5,
            ..AceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "toolchange_retract_length",
                ..
            })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ace.json");
        let config = AceConfig {
            serial: "/dev/ttyACM1".into(),
            disable_assist_after_park: true,
            ..AceConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AceConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_transport_config() {
        let mut config = AceConfig::default();
        config.timing.backoff_unit_ms = 10;
        let transport = config.transport_config();
        assert_eq!(transport.backoff_unit, Duration::from_millis(10));
        assert_eq!(transport.write_attempts, 3);
    }
}
