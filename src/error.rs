use std::io;
use thiserror::Error;
use msgbox::IconType;
use std::fmt::Display;
use std::str::Utf8Error;
use btleplug;
use iced;
use serde_json;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (iced): {source}")]
    Iced { #[from] source: iced::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },
}

/// Failures reported by a [`crate::device::transport::BleTransport`].
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Device {0} was not found by the last scan")]
    UnknownDevice(String),

    #[error("No device is connected")]
    NotConnected,

    #[error("Characteristic {0} is not available on the connected device")]
    MissingCharacteristic(Uuid),

    #[error("Pairing is not supported by this bluetooth backend")]
    PairingUnsupported,
}

/// Outcome of a failed user operation. These never travel past the controller; they are
/// turned into status text.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Scan failed: {source}")]
    ScanFailure { source: DeviceError },

    #[error("Connecting to {address} failed: {reason}")]
    ConnectFailure { address: String, reason: String },

    #[error("Pairing with {address} failed: wrong PIN or pairing not supported by the device")]
    PairingFailure { address: String },

    #[error("Automatic pairing is not supported on this system, pair {address} manually in the system settings")]
    UnsupportedPlatform { address: String },

    #[error("Service discovery failed: {source}")]
    DiscoveryFailure { source: DeviceError },

    #[error("Subscribing to {characteristic} failed: {source}")]
    SubscribeFailure { characteristic: Uuid, source: DeviceError },

    #[error("Unsubscribing from {characteristic} failed: {source}")]
    UnsubscribeFailure { characteristic: Uuid, source: DeviceError },

    #[error("Pairing with {address} was cancelled")]
    UserCancelled { address: String },

    #[error("Already connected to {address}")]
    AlreadyConnected { address: String },

    #[error("Device {address} is not in the last scan result, scan again")]
    UnknownDevice { address: String },

    #[error("No device is connected")]
    NotConnected,

    #[error("Characteristic {characteristic} was not discovered on the connected device")]
    UnknownCharacteristic { characteristic: Uuid },

    #[error("Characteristic {characteristic} is already subscribed")]
    AlreadySubscribed { characteristic: Uuid },

    #[error("Characteristic {characteristic} is not subscribed")]
    NotSubscribed { characteristic: Uuid },
}

impl ControllerError {
    /// A cancelled prompt is a normal abort path, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ControllerError::UserCancelled { .. })
    }
}

pub fn error_msgbox<T: Display>(message: &'static str, error: &T) {
    let message = format!("{}: {}", message, error);
    eprintln!("{}", &message);
    if let Err(err) = msgbox::create(concat!("BLE Monitor ", env!("CARGO_PKG_VERSION")), &message, IconType::Error) {
        eprintln!("Failed to create msgbox: {:?}", err);
    }
}
