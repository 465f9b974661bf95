//! Device state mirror
//!
//! Holds the last status and banner the device reported. It is only ever
//! updated from responses that passed framing and checksum checks.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;

use super::status::{DeviceInfo, DeviceStatus};
use crate::persistence::{StoreError, VariableStore};

fn override_key(index: u8, field: &str) -> String {
    format!("ace_slot_{}_{}", index, field)
}

/// Cosmetic slot fields set by the operator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotOverride {
    /// Material name
    pub material: Option<String>,
    /// Spool SKU
    pub sku: Option<String>,
    /// RGB colour
    pub color: Option<[u8; 3]>,
}

impl SlotOverride {
    /// Overrides nothing
    pub fn is_empty(&self) -> bool {
        self.material.is_none() && self.sku.is_none() && self.color.is_none()
    }
}

/// Last-known device state
#[derive(Debug, Clone)]
pub struct StatusMirror {
    status: DeviceStatus,
    info: Option<DeviceInfo>,
    last_update: Option<Instant>,
}

impl StatusMirror {
    /// Mirror with `slot_count` empty slots
    pub fn new(slot_count: usize) -> Self {
        Self {
            status: DeviceStatus::with_slots(slot_count),
            info: None,
            last_update: None,
        }
    }

    /// Merge a `get_status` result
    pub fn apply_status(&mut self, result: &Value, now: Instant) {
        self.status.merge(result);
        self.last_update = Some(now);
    }

    /// Record the `get_info` banner
    pub fn set_info(&mut self, result: &Value, now: Instant) -> Option<&DeviceInfo> {
        match serde_json::from_value::<DeviceInfo>(result.clone()) {
            Ok(info) => {
                self.info = Some(info);
                self.last_update = Some(now);
            }
            Err(e) => warn!("ignoring malformed device info: {}", e),
        }
        self.info.as_ref()
    }

    /// Raw mirrored status, without overrides
    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    /// Device identity, once `get_info` answered
    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// When the last good response arrived
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Status with persisted cosmetic overrides applied
    pub fn snapshot(&self, store: &dyn VariableStore) -> DeviceStatus {
        let mut status = self.status.clone();
        for slot in &mut status.slots {
            let overrides = load_override(store, slot.index);
            if let Some(material) = overrides.material {
                slot.material = material;
            }
            if let Some(sku) = overrides.sku {
                slot.sku = sku;
            }
            if let Some(color) = overrides.color {
                slot.color = color;
            }
        }
        status
    }

    /// Persist cosmetic overrides for a slot. `None` fields are left as they are.
    pub fn set_slot_override(
        &self,
        store: &mut dyn VariableStore,
        index: u8,
        overrides: &SlotOverride,
    ) -> Result<(), StoreError> {
        if let Some(material) = &overrides.material {
            store.set(&override_key(index, "type"), json!(material))?;
        }
        if let Some(sku) = &overrides.sku {
            store.set(&override_key(index, "sku"), json!(sku))?;
        }
        if let Some(color) = overrides.color {
            store.set(&override_key(index, "color"), json!(color))?;
        }
        store.flush()
    }
}

fn load_override(store: &dyn VariableStore, index: u8) -> SlotOverride {
    let text = |field: &str| {
        store
            .get(&override_key(index, field))
            .and_then(|v| v.as_str().map(str::to_string))
    };
    SlotOverride {
        material: text("type"),
        sku: text("sku"),
        color: store
            .get(&override_key(index, "color"))
            .and_then(|v| serde_json::from_value(v).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_apply_status_tracks_time() {
        let mut mirror = StatusMirror::new(4);
        assert!(mirror.last_update().is_none());
        let now = Instant::now();
        mirror.apply_status(&json!({ "temp": 24.5 }), now);
        assert_eq!(mirror.status().temp, 24.5);
        assert_eq!(mirror.last_update(), Some(now));
    }

    #[test]
    fn test_info_keeps_unknown_fields() {
        let mut mirror = StatusMirror::new(4);
        let info = mirror
            .set_info(
                &json!({ "model": "ACE", "firmware": "V1.3.84", "boot_firmware": "V1.0.1" }),
                Instant::now(),
            )
            .cloned()
            .unwrap();
        assert_eq!(info.model, "ACE");
        assert_eq!(info.firmware, "V1.3.84");
        assert_eq!(info.extra["boot_firmware"], "V1.0.1");
    }

    #[test]
    fn test_snapshot_applies_overrides() {
        let mut mirror = StatusMirror::new(4);
        let mut store = MemoryStore::new();
        mirror.apply_status(
            &json!({ "slots": [{ "index": 1, "status": "ready", "type": "PLA", "sku": "", "color": [0, 0, 0] }] }),
            Instant::now(),
        );

        mirror
            .set_slot_override(
                &mut store,
                1,
                &SlotOverride {
                    material: Some("PETG".into()),
                    color: Some([10, 20, 30]),
                    ..Default::default()
                },
            )
            .unwrap();

        let snapshot = mirror.snapshot(&store);
        let slot = snapshot.slot(1).unwrap();
        assert_eq!(slot.material, "PETG");
        assert_eq!(slot.color, [10, 20, 30]);
        assert_eq!(slot.sku, "");
        // raw mirror untouched
        assert_eq!(mirror.status().slot(1).unwrap().material, "PLA");
        assert_eq!(store.flush_count(), 1);
    }
}
