use std::sync::Arc;
use indexmap::IndexMap;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::parser::PayloadParser;
use crate::device::transport::{BleTransport, Notification, NotificationHandler};
use crate::device::types::Session;
use crate::error::ControllerError;

pub struct SubscriptionEntry {
    pub handler: Arc<dyn NotificationHandler>,
    pub last_raw: Option<Vec<u8>>,
    // what the parser matches on: "<name> (<uuid>)", or just the uuid
    pub identifier: String,
}

/// A decoded payload, ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedData {
    pub characteristic: Uuid,
    pub text: String,
    pub raw: Vec<u8>,
}

/// Characteristics with a live notification handler. Entries only exist while the session they
/// were created for is connected.
pub struct SubscriptionRegistry {
    entries: IndexMap<Uuid, SubscriptionEntry>,
    parser: PayloadParser,
}

impl SubscriptionRegistry {
    pub fn new(parser: PayloadParser) -> Self {
        SubscriptionRegistry { entries: IndexMap::new(), parser }
    }

    pub fn is_subscribed(&self, characteristic: &Uuid) -> bool {
        self.entries.contains_key(characteristic)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Uuid> {
        self.entries.keys()
    }

    pub fn last_raw(&self, characteristic: &Uuid) -> Option<&[u8]> {
        self.entries.get(characteristic)?.last_raw.as_deref()
    }

    pub async fn subscribe<T: BleTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        session: &Session,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), ControllerError> {
        let characteristic = handler.characteristic();

        let Some(descriptor) = session.characteristic(&characteristic) else {
            return Err(ControllerError::UnknownCharacteristic { characteristic });
        };
        if self.is_subscribed(&characteristic) {
            return Err(ControllerError::AlreadySubscribed { characteristic });
        }

        info!("Subscribing to characteristic {}", characteristic);
        transport.start_notify(characteristic, handler.clone()).await
            .map_err(|source| ControllerError::SubscribeFailure { characteristic, source })?;

        let identifier = match &descriptor.name {
            Some(name) => format!("{} ({})", name, characteristic),
            None => characteristic.to_string(),
        };
        self.entries.insert(characteristic, SubscriptionEntry { handler, last_raw: None, identifier });
        Ok(())
    }

    /// The entry is removed even if the transport fails to cancel the registration.
    pub async fn unsubscribe<T: BleTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        characteristic: Uuid,
    ) -> Result<(), ControllerError> {
        if self.entries.shift_remove(&characteristic).is_none() {
            return Err(ControllerError::NotSubscribed { characteristic });
        }

        info!("Unsubscribing from characteristic {}", characteristic);
        transport.stop_notify(characteristic).await
            .map_err(|source| ControllerError::UnsubscribeFailure { characteristic, source })
    }

    /// Cancels every registration, continuing past failures. Returns how many failed.
    pub async fn cancel_all<T: BleTransport + ?Sized>(&mut self, transport: &mut T) -> usize {
        let mut failures = 0;

        for (characteristic, _) in self.entries.drain(..) {
            if let Err(err) = transport.stop_notify(characteristic).await {
                warn!("Failed to unsubscribe from {}: {:?}", characteristic, err);
                failures += 1;
            }
        }

        failures
    }

    /// Forgets all entries without talking to the transport.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Records and decodes a payload. Payloads for characteristics that are no longer
    /// subscribed are dropped.
    pub fn dispatch(&mut self, notification: Notification) -> Option<ParsedData> {
        let Notification { characteristic, payload } = notification;

        let Some(entry) = self.entries.get_mut(&characteristic) else {
            debug!("Ignoring payload for unsubscribed characteristic {}", characteristic);
            return None;
        };

        debug!("Payload from {}: {:?}", characteristic, payload);
        entry.last_raw = Some(payload.clone());
        let text = self.parser.parse(&entry.identifier, &payload);
        Some(ParsedData { characteristic, text, raw: payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_for_unknown_characteristic_is_dropped() {
        let mut registry = SubscriptionRegistry::new(PayloadParser::default());
        let dispatched = registry.dispatch(Notification { characteristic: Uuid::from_u128(1), payload: vec![1, 2] });

        assert_eq!(dispatched, None);
        assert!(registry.is_empty());
    }
}
