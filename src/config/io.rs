use std::env::{current_exe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use directories_next::{ProjectDirs};
use tokio::fs::{File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::OpenOptions;
use std::str;
use log::{info, warn};

use crate::config::types::DeviceConfig;
use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "ble-monitor.json";

// `<exe>.json` next to the executable, used instead of the per-user file if it exists
// (e.g. when running from a usb stick)
fn portable_config_path() -> Option<PathBuf> {
    let mut path = current_exe()
        .map_err(|err| warn!("Failed to get current exe path: {:?}", err))
        .ok()?;

    if !path.set_extension("json") {
        warn!("Current exe has no file name: {}", path.to_string_lossy());
        return None;
    }

    std::fs::metadata(&path)
        .map_or(false, |attr| attr.is_file())
        .then_some(path)
}

// %AppData%, ~/.config, ~/Library/Application Support, ...
fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "ble-monitor", "ble-monitor")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn config_path() -> Result<PathBuf, ConfigError> {
    portable_config_path()
        .or_else(user_config_path)
        .ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

/// Handle to the device config file. The file stays open for the lifetime of the process.
#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = config_path()?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    fn inner(&self) -> MutexGuard<'_, ConfigIOInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The lock taken through this guards the file against a second running instance.
    pub fn locker(&mut self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner();

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // a duplicate handle of the same open file, dropping it keeps the lock alive
    fn file(&self) -> Result<File, ConfigError> {
        Ok(File::from_std(self.inner().file.try_clone()?))
    }

    pub async fn read(&self) -> Result<DeviceConfig, ConfigError> {
        let mut file = self.file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(DeviceConfig::default());
        }

        let content = str::from_utf8(&content)?;
        let config: DeviceConfig = serde_json::from_str(content)?;
        Ok(config)
    }

    /// Replaces the whole file content. There is no partial-write recovery.
    pub async fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let mut file = self.file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
