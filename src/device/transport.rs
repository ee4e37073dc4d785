use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::UnboundedSender;
use log::warn;
use uuid::Uuid;

use crate::device::types::{DeviceRecord, ServiceDescriptor};
use crate::error::DeviceError;

/// Receives the pushed values of exactly one characteristic.
pub trait NotificationHandler: Send + Sync {
    fn characteristic(&self) -> Uuid;

    fn on_notification(&self, payload: Vec<u8>);
}

/// A payload pushed by the device, tagged with the characteristic it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

/// Forwards payloads of one characteristic into the controller's queue, so that they are
/// handled in between user operations.
pub struct NotificationForwarder {
    characteristic: Uuid,
    sender: UnboundedSender<Notification>,
}

impl NotificationForwarder {
    pub fn new(characteristic: Uuid, sender: UnboundedSender<Notification>) -> Self {
        NotificationForwarder { characteristic, sender }
    }
}

impl NotificationHandler for NotificationForwarder {
    fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    fn on_notification(&self, payload: Vec<u8>) {
        let notification = Notification { characteristic: self.characteristic, payload };
        if self.sender.unbounded_send(notification).is_err() {
            warn!("Dropping notification for {}, controller has stopped", self.characteristic);
        }
    }
}

/// The bluetooth stack as seen by the controller. A transport holds at most one connected
/// device; `connect` replaces nothing, callers disconnect first.
#[async_trait]
pub trait BleTransport: Send {
    /// Listens for advertisements for `timeout` and returns every device seen.
    async fn scan(&mut self, timeout: Duration) -> Result<Vec<DeviceRecord>, DeviceError>;

    /// Returns `Ok(false)` when the device refuses the connection until it is paired.
    async fn connect(&mut self, device: &DeviceRecord) -> Result<bool, DeviceError>;

    async fn pair(&mut self, pin: &str) -> Result<bool, DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;

    async fn list_services(&mut self) -> Result<Vec<ServiceDescriptor>, DeviceError>;

    async fn start_notify(&mut self, characteristic: Uuid, handler: Arc<dyn NotificationHandler>) -> Result<(), DeviceError>;

    async fn stop_notify(&mut self, characteristic: Uuid) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::channel::mpsc::unbounded;

    #[tokio::test]
    async fn forwarder_tags_payloads_with_its_characteristic() {
        let (sender, mut receiver) = unbounded();
        let forwarder = NotificationForwarder::new(Uuid::from_u128(7), sender);

        forwarder.on_notification(vec![1]);
        forwarder.on_notification(vec![2]);

        assert_eq!(receiver.next().await, Some(Notification { characteristic: Uuid::from_u128(7), payload: vec![1] }));
        assert_eq!(receiver.next().await, Some(Notification { characteristic: Uuid::from_u128(7), payload: vec![2] }));
    }

    #[test]
    fn forwarder_survives_a_closed_queue() {
        let (sender, receiver) = unbounded();
        drop(receiver);
        NotificationForwarder::new(Uuid::nil(), sender).on_notification(vec![0xff]);
    }
}
