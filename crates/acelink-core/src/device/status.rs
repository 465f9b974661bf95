//! Device status model
//!
//! Typed view of the `get_status` result. Updates are merged fieldwise: a
//! key absent from a response leaves the mirrored value untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Number of slots on a stock changer
pub const DEFAULT_SLOT_COUNT: usize = 4;

/// Overall device state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceState {
    /// Idle and accepting motion
    Ready,
    /// Executing a command
    Busy,
    /// Reporting a fault
    Error,
    /// Any other state the firmware reports
    Other(String),
}

impl From<String> for DeviceState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ready" => DeviceState::Ready,
            "busy" => DeviceState::Busy,
            "error" => DeviceState::Error,
            _ => DeviceState::Other(value),
        }
    }
}

impl From<DeviceState> for String {
    fn from(value: DeviceState) -> Self {
        match value {
            DeviceState::Ready => "ready".into(),
            DeviceState::Busy => "busy".into(),
            DeviceState::Error => "error".into(),
            DeviceState::Other(s) => s,
        }
    }
}

/// Whether a slot holds a usable spool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SlotState {
    /// No spool
    Empty,
    Ready,
    /// Any state this driver does not know
    Other(String),
}

impl From<String> for SlotState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "empty" => SlotState::Empty,
            "ready" => SlotState::Ready,
            _ => SlotState::Other(value),
        }
    }
}

impl From<SlotState> for String {
    fn from(value: SlotState) -> Self {
        match value {
            SlotState::Empty => "empty".into(),
            SlotState::Ready => "ready".into(),
            SlotState::Other(s) => s,
        }
    }
}

/// One filament bay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot number
    pub index: u8,
    /// Spool state
    pub status: SlotState,
    /// Spool SKU from RFID
    #[serde(default)]
    pub sku: String,
    /// Material type, e.g. "PLA"
    #[serde(default, rename = "type")]
    pub material: String,
    /// RGB color of the loaded spool
    #[serde(default)]
    pub color: [u8; 3],
}

impl Slot {
    /// An empty slot
    pub fn empty(index: u8) -> Self {
        Self {
            index,
            status: SlotState::Empty,
            sku: String::new(),
            material: String::new(),
            color: [0, 0, 0],
        }
    }

    /// Ready to feed
    pub fn is_ready(&self) -> bool {
        self.status == SlotState::Ready
    }

    fn merge(&mut self, obj: &Map<String, Value>) {
        merge_field(&mut self.status, obj, "status");
        merge_field(&mut self.sku, obj, "sku");
        merge_field(&mut self.material, obj, "type");
        merge_field(&mut self.color, obj, "color");
    }
}

/// Dryer sub-status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryerStatus {
    /// `drying` or `stop`
    pub status: String,
    /// Target temperature in °C
    pub target_temp: f64,
    /// Minutes
    pub duration: u32,
    /// Minutes
    pub remain_time: f64,
}

impl Default for DryerStatus {
    fn default() -> Self {
        Self {
            status: "stop".into(),
            target_temp: 0.0,
            duration: 0,
            remain_time: 0.0,
        }
    }
}

impl DryerStatus {
    fn merge(&mut self, obj: &Map<String, Value>) {
        merge_field(&mut self.status, obj, "status");
        merge_field(&mut self.target_temp, obj, "target_temp");
        merge_field(&mut self.duration, obj, "duration");
        merge_field(&mut self.remain_time, obj, "remain_time");
    }
}

/// Last-known device status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Overall device state
    pub status: DeviceState,
    /// Dryer state
    pub dryer: DryerStatus,
    /// Chamber temperature in °C
    pub temp: f64,
    /// RFID reading enabled
    pub enable_rfid: i64,
    /// Dryer fan speed
    pub fan_speed: u32,
    /// Incremented by the firmware while the feed-assist motor moves filament
    pub feed_assist_count: u64,
    /// Continuous feed-assist time
    pub cont_assist_time: f64,
    /// Per-slot state
    pub slots: Vec<Slot>,
    /// Keys the firmware sent that are not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::with_slots(DEFAULT_SLOT_COUNT)
    }
}

impl DeviceStatus {
    /// Defaults used until the first heartbeat arrives
    pub fn with_slots(count: usize) -> Self {
        Self {
            status: DeviceState::Ready,
            dryer: DryerStatus::default(),
            temp: 0.0,
            enable_rfid: 1,
            fan_speed: 7000,
            feed_assist_count: 0,
            cont_assist_time: 0.0,
            slots: (0..count).map(|i| Slot::empty(i as u8)).collect(),
            extra: Map::new(),
        }
    }

    /// Device accepts commands
    pub fn is_ready(&self) -> bool {
        self.status == DeviceState::Ready
    }

    /// Slot by index
    pub fn slot(&self, index: u8) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.index == index)
    }

    /// Slot by index, mutably
    pub fn slot_mut(&mut self, index: u8) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.index == index)
    }

    /// Merge a `get_status` result into this status.
    ///
    /// Only keys present in `result` are overwritten. Slots are matched by
    /// their `index`; slots not mentioned keep their previous values. Values
    /// of the wrong type are logged and ignored.
    pub fn merge(&mut self, result: &Value) {
        let Some(obj) = result.as_object() else {
            warn!("status result is not an object: {}", result);
            return;
        };

        for (key, value) in obj {
            match key.as_str() {
                "status" => merge_field(&mut self.status, obj, key),
                "temp" => merge_field(&mut self.temp, obj, key),
                "enable_rfid" => merge_field(&mut self.enable_rfid, obj, key),
                "fan_speed" => merge_field(&mut self.fan_speed, obj, key),
                "feed_assist_count" => merge_field(&mut self.feed_assist_count, obj, key),
                "cont_assist_time" => merge_field(&mut self.cont_assist_time, obj, key),
                "dryer" => match value.as_object() {
                    Some(dryer) => self.dryer.merge(dryer),
                    None => warn!("ignoring malformed dryer status: {}", value),
                },
                "slots" => self.merge_slots(value),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    fn merge_slots(&mut self, value: &Value) {
        let Some(slots) = value.as_array() else {
            warn!("ignoring malformed slot list: {}", value);
            return;
        };

        for (position, entry) in slots.iter().enumerate() {
            let Some(obj) = entry.as_object() else {
                continue;
            };
            let index = obj
                .get("index")
                .and_then(Value::as_u64)
                .and_then(|i| u8::try_from(i).ok())
                .unwrap_or(position as u8);

            match self.slot_mut(index) {
                Some(slot) => slot.merge(obj),
                None => {
                    let mut slot = Slot::empty(index);
                    slot.merge(obj);
                    self.slots.push(slot);
                    self.slots.sort_by_key(|s| s.index);
                }
            }
        }
    }
}

fn merge_field<T: DeserializeOwned>(field: &mut T, obj: &Map<String, Value>, key: &str) {
    if let Some(value) = obj.get(key) {
        match T::deserialize(value) {
            Ok(parsed) => *field = parsed,
            Err(e) => warn!("ignoring status field '{}' = {}: {}", key, value, e),
        }
    }
}

/// `get_info` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Product name
    #[serde(default)]
    pub model: String,
    /// Firmware version
    #[serde(default)]
    pub firmware: String,
    /// Other keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
