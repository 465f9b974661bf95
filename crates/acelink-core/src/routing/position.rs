//! Filament position model and its persisted form

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::persistence::{StoreError, VariableStore};

/// Variable holding the loaded tool, `-1` when none
pub const CURRENT_INDEX_KEY: &str = "ace_current_index";
/// Variable holding the filament position
pub const FILAMENT_POS_KEY: &str = "ace_filament_pos";

/// How far the active filament reaches, from the hub to the nozzle
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
/// Furthest point the loaded filament has reached
#[serde(rename_all = "lowercase")]
pub enum FilamentPosition {
    /// Parked in the changer's splitter
    #[default]
    Spliter,
    /// In the tube between changer and extruder
    Bowden,
    /// Gripped by the extruder, reaching the toolhead sensor
    Toolhead,
    /// Loaded through to the nozzle
    Nozzle,
}

impl FilamentPosition {
    /// Persisted name
    pub fn as_str(&self) -> &'static str {
        match self {
            FilamentPosition::Spliter => "spliter",
            FilamentPosition::Bowden => "bowden",
            FilamentPosition::Toolhead => "toolhead",
            FilamentPosition::Nozzle => "nozzle",
        }
    }
}

/// Path diagram shown by the filament status command
pub fn path_diagram(
    position: FilamentPosition,
    extruder_present: bool,
    toolhead_present: bool,
) -> &'static str {
    match position {
        FilamentPosition::Nozzle => "ACE>>>>>>>>>>|*>>|Ex>>|*>>|Nz>>",
        FilamentPosition::Toolhead if toolhead_present => "ACE>>>>>>>>>>|*>>|Ex>>|*>>|Nz--",
        FilamentPosition::Toolhead => "ACE>>>>>>>>>>|*>>|Ex>>|*--|Nz--",
        FilamentPosition::Bowden if extruder_present => "ACE>>>>>>>>>>|*>>|Ex--|*--|Nz--",
        FilamentPosition::Bowden => "ACE>>>>>>>>>>|*--|Ex--|*--|Nz--",
        FilamentPosition::Spliter => "ACE----------|*--|Ex--|*----|Nz--",
    }
}

impl fmt::Display for FilamentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilamentPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches('"') {
            "spliter" => Ok(FilamentPosition::Spliter),
            "bowden" => Ok(FilamentPosition::Bowden),
            "toolhead" => Ok(FilamentPosition::Toolhead),
            "nozzle" => Ok(FilamentPosition::Nozzle),
            other => Err(format!("unknown filament position '{}'", other)),
        }
    }
}

/// Active tool plus filament position, as kept in the variable store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingState {
    /// Loaded tool
    pub active_tool: Option<u8>,
    /// Where its filament is
    pub position: FilamentPosition,
}

impl RoutingState {
    /// Read the persisted state. Missing or unreadable values fall back to
    /// no tool at the splitter.
    pub fn load(store: &dyn VariableStore) -> Self {
        let active_tool = store
            .get(CURRENT_INDEX_KEY)
            .map(|v| tool_from_value(&v))
            .unwrap_or(None);

        let position = match store.get(FILAMENT_POS_KEY) {
            Some(Value::String(s)) => s.parse().unwrap_or_else(|e| {
                warn!("{}; assuming spliter", e);
                FilamentPosition::Spliter
            }),
            Some(other) => {
                warn!("ignoring {} = {}", FILAMENT_POS_KEY, other);
                FilamentPosition::Spliter
            }
            None => FilamentPosition::Spliter,
        };

        Self {
            active_tool,
            position,
        }
    }

    /// Write both variables and flush the store
    pub fn commit(&self, store: &mut dyn VariableStore) -> Result<(), StoreError> {
        store.set(CURRENT_INDEX_KEY, tool_to_value(self.active_tool))?;
        store.set(FILAMENT_POS_KEY, json!(self.position.as_str()))?;
        store.flush()
    }
}

/// `-1` for no tool, as the variable is stored
pub fn tool_to_value(tool: Option<u8>) -> Value {
    match tool {
        Some(index) => json!(index),
        None => json!(-1),
    }
}

/// Parse a persisted tool number; `-1` means none
pub fn tool_from_value(value: &Value) -> Option<u8> {
    value.as_i64().and_then(|i| u8::try_from(i).ok())
}

/// Tool number as shown in macros, `-1` for none
pub fn tool_label(tool: Option<u8>) -> i32 {
    tool.map(i32::from).unwrap_or(-1)
}
