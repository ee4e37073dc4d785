use std::collections::BTreeMap;
use std::time::SystemTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Everything remembered about a single device, keyed by its address in [`DeviceConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfigEntry {
    #[serde(default)]
    pub paired: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,

    /// RFC 3339 timestamp of the last successful connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<String>,

    // keys written by other versions of this application
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A partial update of a [`DeviceConfigEntry`]. Fields left at `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceConfigUpdate {
    pub paired: Option<bool>,
    /// `Some(None)` forgets a remembered pin
    pub pin: Option<Option<String>>,
    pub last_connected: Option<SystemTime>,
}

impl DeviceConfigUpdate {
    pub fn connected_at(time: SystemTime) -> Self {
        DeviceConfigUpdate {
            last_connected: Some(time),
            ..Default::default()
        }
    }

    pub fn paired(pin: Option<String>, time: SystemTime) -> Self {
        DeviceConfigUpdate {
            paired: Some(true),
            pin: Some(pin),
            last_connected: Some(time),
        }
    }

    pub fn forget_pin() -> Self {
        DeviceConfigUpdate {
            pin: Some(None),
            ..Default::default()
        }
    }
}

impl DeviceConfigEntry {
    pub fn apply(&mut self, update: DeviceConfigUpdate) {
        if let Some(paired) = update.paired {
            self.paired = paired;
        }
        if let Some(pin) = update.pin {
            self.pin = pin;
        }
        if let Some(time) = update.last_connected {
            self.last_connected = Some(humantime::format_rfc3339_seconds(time).to_string());
        }
    }
}

/// The persisted config file: a flat mapping from device address to entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceConfig {
    pub devices: BTreeMap<String, DeviceConfigEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn partial_update_keeps_unspecified_fields() {
        let mut entry = DeviceConfigEntry {
            paired: false,
            pin: Some("0000".to_string()),
            last_connected: Some("2024-01-01T00:00:00Z".to_string()),
            extra: Map::new(),
        };

        entry.apply(DeviceConfigUpdate { paired: Some(true), ..Default::default() });

        assert!(entry.paired);
        assert_eq!(entry.pin.as_deref(), Some("0000"));
        assert_eq!(entry.last_connected.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn forgetting_the_pin_clears_it() {
        let mut entry = DeviceConfigEntry { pin: Some("1234".to_string()), ..Default::default() };
        entry.apply(DeviceConfigUpdate::paired(None, UNIX_EPOCH));

        assert!(entry.paired);
        assert_eq!(entry.pin, None);
        assert_eq!(entry.last_connected.as_deref(), Some("1970-01-01T00:00:00Z"));
    }

    #[test]
    fn forget_pin_keeps_pairing_state() {
        let mut entry = DeviceConfigEntry {
            paired: true,
            pin: Some("1234".to_string()),
            last_connected: Some("2024-01-01T00:00:00Z".to_string()),
            extra: Map::new(),
        };
        entry.apply(DeviceConfigUpdate::forget_pin());

        assert!(entry.paired);
        assert_eq!(entry.pin, None);
        assert_eq!(entry.last_connected.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let mut entry = DeviceConfigEntry::default();
        entry.apply(DeviceConfigUpdate::connected_at(UNIX_EPOCH + Duration::from_secs(1_700_000_000)));
        assert_eq!(entry.last_connected.as_deref(), Some("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn unknown_keys_survive_a_rewrite() {
        let json = r#"{
            "AA:BB:CC:DD:EE:FF": {"paired": true, "pin": "1234", "nickname": "kitchen"},
            "11:22:33:44:55:66": {}
        }"#;

        let mut config: DeviceConfig = serde_json::from_str(json).unwrap();
        let entry = config.devices.get_mut("AA:BB:CC:DD:EE:FF").unwrap();
        entry.apply(DeviceConfigUpdate::connected_at(UNIX_EPOCH));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["AA:BB:CC:DD:EE:FF"]["nickname"], "kitchen");
        assert_eq!(value["AA:BB:CC:DD:EE:FF"]["pin"], "1234");
        assert_eq!(value["AA:BB:CC:DD:EE:FF"]["last_connected"], "1970-01-01T00:00:00Z");
        assert_eq!(value["11:22:33:44:55:66"]["paired"], false);
        assert!(value["11:22:33:44:55:66"].get("pin").is_none());
    }

    #[test]
    fn null_pin_reads_as_absent() {
        let config: DeviceConfig = serde_json::from_str(r#"{"A": {"paired": true, "pin": null}}"#).unwrap();
        assert_eq!(config.devices["A"].pin, None);
        assert!(config.devices["A"].paired);
    }
}
