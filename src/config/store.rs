use log::{error, info};

use crate::config::io::ConfigIO;
use crate::config::types::{DeviceConfig, DeviceConfigEntry, DeviceConfigUpdate};

/// Per-device metadata (pairing state, remembered pin, last connection time).
///
/// The in-memory copy is authoritative. Every update rewrites the whole file; a failed write is
/// logged and otherwise ignored, so the file may lag behind until the next successful write.
pub struct DeviceConfigStore {
    io: Option<ConfigIO>,
    config: DeviceConfig,
}

impl DeviceConfigStore {
    pub fn new(io: ConfigIO, config: DeviceConfig) -> Self {
        DeviceConfigStore { io: Some(io), config }
    }

    /// A store that is never written to disk.
    pub fn in_memory(config: DeviceConfig) -> Self {
        DeviceConfigStore { io: None, config }
    }

    /// Reads the config file, starting empty (and reporting why) if it can not be parsed.
    pub async fn load(io: ConfigIO) -> (Self, Option<String>) {
        match io.read().await {
            Ok(config) => {
                info!("Loaded config for {} devices", config.devices.len());
                (Self::new(io, config), None)
            },
            Err(err) => {
                error!("Failed to load config: {:?}", &err);
                let message = format!("Failed to load device config, starting empty: {}", &err);
                (Self::new(io, DeviceConfig::default()), Some(message))
            },
        }
    }

    pub fn get(&self, address: &str) -> DeviceConfigEntry {
        self.config.devices.get(address).cloned().unwrap_or_default()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub async fn update(&mut self, address: &str, update: DeviceConfigUpdate) {
        self.config.devices
            .entry(address.to_string())
            .or_default()
            .apply(update);

        if let Some(io) = &self.io {
            if let Err(err) = io.save(&self.config).await {
                error!("Failed to save config for {}: {:?}", address, &err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[tokio::test]
    async fn get_unknown_address_is_empty() {
        let store = DeviceConfigStore::in_memory(DeviceConfig::default());
        assert_eq!(store.get("00:11:22:33:44:55"), DeviceConfigEntry::default());
    }

    #[tokio::test]
    async fn update_merges_into_existing_entry() {
        let mut store = DeviceConfigStore::in_memory(DeviceConfig::default());
        store.update("AA", DeviceConfigUpdate::connected_at(UNIX_EPOCH)).await;
        store.update("AA", DeviceConfigUpdate { paired: Some(true), ..Default::default() }).await;

        let entry = store.get("AA");
        assert!(entry.paired);
        assert_eq!(entry.last_connected.as_deref(), Some("1970-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn update_is_written_through_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let (mut store, notice) = DeviceConfigStore::load(ConfigIO::open(&path).unwrap()).await;
        assert_eq!(notice, None);
        store.update("AA", DeviceConfigUpdate::paired(Some("1234".to_string()), UNIX_EPOCH)).await;

        let (reloaded, _) = DeviceConfigStore::load(ConfigIO::open(&path).unwrap()).await;
        let entry = reloaded.get("AA");
        assert!(entry.paired);
        assert_eq!(entry.pin.as_deref(), Some("1234"));
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty_with_notice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let (store, notice) = DeviceConfigStore::load(ConfigIO::open(&path).unwrap()).await;
        assert!(store.config().devices.is_empty());
        assert!(notice.is_some());
    }
}
