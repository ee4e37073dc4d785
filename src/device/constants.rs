use std::time::Duration;

/**
 * How long a scan listens for advertisements.
 */
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/**
 * How many advertised services are shown next to a device in the device list.
 */
pub const LISTED_SERVICES: usize = 2;

/**
 * How many received payloads the data log keeps.
 */
pub const DATA_LOG_CAPACITY: usize = 500;

/**
 * Channel capacity between the controller and the window.
 */
pub const UI_EVENT_CAPACITY: usize = 64;

/**
 * How long closing the window waits for the controller to disconnect.
 */
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);
