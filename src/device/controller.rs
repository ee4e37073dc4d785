use std::sync::Arc;
use std::time::SystemTime;
use futures::StreamExt;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::store::DeviceConfigStore;
use crate::config::types::DeviceConfigUpdate;
use crate::device::constants::{LISTED_SERVICES, SCAN_TIMEOUT};
use crate::device::parser::PayloadParser;
use crate::device::presenter::{ActionSet, ListEntry, PinEntry, PinReply, Presenter};
use crate::device::subscriptions::SubscriptionRegistry;
use crate::device::transport::{BleTransport, Notification, NotificationForwarder};
use crate::device::types::{notifiable_catalog, DeviceRecord, LinkState, Session};
use crate::error::{ControllerError, DeviceError};

/// A user intent raised by the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    Scan,
    Select(String),
    Connect(String),
    Disconnect,
    Subscribe(Uuid),
    Unsubscribe(Uuid),
}

/// The window's side of the controller task.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: UnboundedSender<ControllerCommand>,
    pins: UnboundedSender<PinReply>,
    // cancelled once the task has finished its shutdown disconnect
    stopped: CancellationToken,
}

impl ControllerHandle {
    pub fn send(&self, command: ControllerCommand) {
        if self.commands.unbounded_send(command).is_err() {
            warn!("Controller has stopped, command ignored");
        }
    }

    pub fn reply_pin(&self, reply: PinReply) {
        if self.pins.unbounded_send(reply).is_err() {
            warn!("Controller has stopped, pin reply ignored");
        }
    }

    /// Resolves after the controller task has ended, including its final disconnect.
    pub async fn stopped(self) {
        self.stopped.cancelled().await
    }
}

/// Owns the single connection: scan → select → connect → (pair) → discover → ready, and back.
///
/// All state lives in this value and is only touched from the task running [`BleController::run`],
/// one message at a time.
pub struct BleController<T: BleTransport> {
    transport: T,
    store: DeviceConfigStore,
    presenter: Presenter,
    registry: SubscriptionRegistry,
    devices: IndexMap<String, DeviceRecord>,
    selected: Option<String>,
    session: Option<Session>,
    state: LinkState,
    pin_replies: UnboundedReceiver<PinReply>,
    notification_sender: UnboundedSender<Notification>,
}

impl<T: BleTransport> BleController<T> {
    /// Returns the controller and the queue its notification handlers push into.
    pub fn new(
        transport: T,
        store: DeviceConfigStore,
        presenter: Presenter,
        parser: PayloadParser,
        pin_replies: UnboundedReceiver<PinReply>,
    ) -> (Self, UnboundedReceiver<Notification>) {
        let (notification_sender, notifications) = unbounded();

        let controller = BleController {
            transport,
            store,
            presenter,
            registry: SubscriptionRegistry::new(parser),
            devices: IndexMap::new(),
            selected: None,
            session: None,
            state: LinkState::Idle,
            pin_replies,
            notification_sender,
        };

        (controller, notifications)
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &DeviceConfigStore {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn actions(&self) -> ActionSet {
        let idle = matches!(self.state, LinkState::Idle | LinkState::DeviceSelected);
        let ready = self.state == LinkState::Ready;
        let has_characteristics = self.session.as_ref()
            .map_or(false, |session| session.characteristics().next().is_some());

        ActionSet {
            scan: idle && self.session.is_none(),
            connect: idle && self.session.is_none() && !self.devices.is_empty(),
            disconnect: ready,
            subscribe: ready && has_characteristics,
            unsubscribe: ready && !self.registry.is_empty(),
        }
    }

    fn publish_actions(&self) {
        self.presenter.set_actions(self.actions());
        self.presenter.set_subscriptions(self.registry.characteristics().copied().collect());
    }

    fn report(&self, err: &ControllerError) {
        if err.is_cancellation() {
            info!("{}", err);
        } else {
            warn!("{:?}", err);
        }
        self.presenter.set_status(err.to_string());
    }

    /// Runs one user intent to completion. Failures end up in the status line.
    pub async fn handle_command(&mut self, command: ControllerCommand) {
        debug!("Handling {:?}", command);

        let result = match command {
            ControllerCommand::Scan => self.scan().await.map(|_| ()),
            ControllerCommand::Select(address) => self.select_device(&address),
            ControllerCommand::Connect(address) => self.connect(&address).await,
            ControllerCommand::Disconnect => self.disconnect().await,
            ControllerCommand::Subscribe(characteristic) => self.subscribe(characteristic).await,
            ControllerCommand::Unsubscribe(characteristic) => self.unsubscribe(characteristic).await,
        };

        if let Err(err) = result {
            self.report(&err);
        }
        self.publish_actions();
    }

    pub fn handle_notification(&mut self, notification: Notification) {
        if let Some(data) = self.registry.dispatch(notification) {
            self.presenter.data_received(data);
        }
    }

    fn device_entries(&self) -> Vec<ListEntry<String>> {
        self.devices.values()
            .map(|device| {
                let paired = if self.store.get(&device.address).paired { "✓ " } else { "" };
                let name = device.name.as_deref().unwrap_or("Unknown device");
                let services: String = device.services.iter()
                    .take(LISTED_SERVICES)
                    .map(|uuid| format!(" [{}]", uuid))
                    .collect();

                ListEntry {
                    id: device.address.clone(),
                    text: format!("{}{} ({}){}", paired, name, device.address, services),
                }
            })
            .collect()
    }

    fn characteristic_entries(&self) -> Vec<ListEntry<Uuid>> {
        let Some(session) = &self.session else {
            return Vec::new();
        };

        session.characteristics()
            .map(|characteristic| ListEntry {
                id: characteristic.uuid,
                text: format!(
                    "{} [{}] - supports: {}",
                    characteristic.name.as_deref().unwrap_or("Unknown characteristic"),
                    characteristic.uuid,
                    characteristic.property_names().join(", "),
                ),
            })
            .collect()
    }

    /// Replaces the device list with the devices heard during one scan window.
    pub async fn scan(&mut self) -> Result<usize, ControllerError> {
        if let Some(session) = &self.session {
            return Err(ControllerError::AlreadyConnected { address: session.address.clone() });
        }

        self.state = LinkState::Scanning;
        self.devices.clear();
        self.selected = None;
        self.presenter.set_devices(Vec::new());
        self.presenter.set_status("Scanning for devices...");
        self.publish_actions();

        info!("Scanning for {:?}", SCAN_TIMEOUT);
        let result = self.transport.scan(SCAN_TIMEOUT).await;
        self.state = LinkState::Idle;

        let records = result.map_err(|source| ControllerError::ScanFailure { source })?;
        for record in records {
            // repeated advertisements of one device: the last one wins
            self.devices.insert(record.address.clone(), record);
        }

        info!("Scan found {} devices", self.devices.len());
        self.presenter.set_devices(self.device_entries());
        self.presenter.set_status(format!("Scan finished, found {} devices", self.devices.len()));
        Ok(self.devices.len())
    }

    pub fn select_device(&mut self, address: &str) -> Result<(), ControllerError> {
        if !self.devices.contains_key(address) {
            return Err(ControllerError::UnknownDevice { address: address.to_string() });
        }

        self.selected = Some(address.to_string());
        if self.state == LinkState::Idle {
            self.state = LinkState::DeviceSelected;
        }
        Ok(())
    }

    pub async fn connect(&mut self, address: &str) -> Result<(), ControllerError> {
        if let Some(session) = &self.session {
            return Err(ControllerError::AlreadyConnected { address: session.address.clone() });
        }
        let device = self.devices.get(address)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownDevice { address: address.to_string() })?;

        self.selected = Some(device.address.clone());
        self.state = LinkState::Connecting;
        self.presenter.set_status(format!("Connecting to {}...", address));
        self.publish_actions();

        if let Err(err) = self.establish(&device).await {
            self.release_transport().await;
            self.state = LinkState::Idle;
            return Err(err);
        }

        info!("Connected to {}", address);
        self.store.update(address, DeviceConfigUpdate::connected_at(SystemTime::now())).await;
        self.session = Some(Session {
            address: device.address.clone(),
            is_connected: true,
            catalog: IndexMap::new(),
        });

        self.discover().await;
        Ok(())
    }

    // Connects, pairing once if the device asks for it.
    async fn establish(&mut self, device: &DeviceRecord) -> Result<(), ControllerError> {
        let address = device.address.as_str();
        let connect_failure = |source: DeviceError| ControllerError::ConnectFailure {
            address: address.to_string(),
            reason: source.to_string(),
        };

        info!("Connecting to {}", address);
        if self.transport.connect(device).await.map_err(connect_failure)? {
            return Ok(());
        }

        self.state = LinkState::PairingRequired;
        self.presenter.set_status(format!("{} requires pairing, requesting PIN...", address));

        let stored_pin = self.store.get(address).pin;
        let from_store = stored_pin.is_some();
        let PinEntry { pin, remember } = match stored_pin {
            Some(pin) => PinEntry { pin, remember: true },
            None => self.prompt_pin(address).await
                .ok_or_else(|| ControllerError::UserCancelled { address: address.to_string() })?,
        };

        self.state = LinkState::Pairing;
        self.presenter.set_status(format!("Pairing with {}...", address));
        self.publish_actions();

        info!("Pairing with {}", address);
        let rejected = match self.transport.pair(&pin).await {
            Ok(true) => false,
            Ok(false) => true,
            Err(DeviceError::PairingUnsupported) => {
                return Err(ControllerError::UnsupportedPlatform { address: address.to_string() });
            },
            Err(err) => {
                warn!("Pairing with {} failed: {:?}", address, err);
                true
            },
        };

        if rejected {
            // a remembered pin the device rejects is dropped, the next connect prompts
            if from_store {
                info!("Forgetting the remembered pin of {}", address);
                self.store.update(address, DeviceConfigUpdate::forget_pin()).await;
            }
            return Err(ControllerError::PairingFailure { address: address.to_string() });
        }

        let remembered = if remember { Some(pin) } else { None };
        self.store.update(address, DeviceConfigUpdate::paired(remembered, SystemTime::now())).await;

        self.state = LinkState::Connecting;
        if self.transport.connect(device).await.map_err(connect_failure)? {
            Ok(())
        } else {
            Err(ControllerError::ConnectFailure {
                address: address.to_string(),
                reason: "the device still requires pairing after pairing succeeded".to_string(),
            })
        }
    }

    async fn prompt_pin(&mut self, address: &str) -> Option<PinEntry> {
        while let Ok(Some(_)) = self.pin_replies.try_next() {
            debug!("Discarding stale pin reply");
        }

        self.presenter.request_pin(address);

        match self.pin_replies.next().await {
            Some(PinReply(Some(entry))) if !entry.pin.trim().is_empty() => Some(PinEntry {
                pin: entry.pin.trim().to_string(),
                remember: entry.remember,
            }),
            _ => None,
        }
    }

    async fn release_transport(&mut self) {
        if let Err(err) = self.transport.disconnect().await {
            warn!("Failed to release connection: {:?}", err);
        }
    }

    async fn discover(&mut self) {
        self.state = LinkState::Discovering;
        self.presenter.set_status("Discovering services and characteristics...");
        self.publish_actions();

        let result = self.transport.list_services().await;

        if let Some(session) = self.session.as_mut() {
            match result {
                Ok(services) => {
                    let service_count = services.len();
                    session.catalog = notifiable_catalog(services);
                    let characteristic_count = session.characteristics().count();

                    info!("Discovered {} services, {} notifiable characteristics", service_count, characteristic_count);
                    self.presenter.set_status(format!(
                        "Connected to {}: {} services, {} notifiable characteristics",
                        session.address, service_count, characteristic_count,
                    ));
                },
                Err(source) => {
                    let err = ControllerError::DiscoveryFailure { source };
                    warn!("{:?}", err);
                    self.presenter.set_status(err.to_string());
                },
            }
        }

        self.state = LinkState::Ready;
        self.presenter.set_characteristics(self.characteristic_entries());
    }

    /// Best-effort teardown: every subscription is cancelled individually, then the transport is
    /// closed. The session is dropped no matter which of these steps fail.
    pub async fn disconnect(&mut self) -> Result<(), ControllerError> {
        let Some(session) = &self.session else {
            info!("Disconnect requested without a connection");
            self.presenter.set_status("No device connected");
            return Ok(());
        };
        let address = session.address.clone();

        self.state = LinkState::Disconnecting;
        self.publish_actions();

        if !self.registry.is_empty() {
            self.presenter.set_status("Unsubscribing...");
            let failures = self.registry.cancel_all(&mut self.transport).await;
            if failures > 0 {
                warn!("{} subscriptions could not be cancelled", failures);
            }
        }

        info!("Disconnecting from {}", address);
        let result = self.transport.disconnect().await;

        self.registry.clear();
        self.session = None;
        self.state = LinkState::Idle;
        self.presenter.set_characteristics(Vec::new());

        match result {
            Ok(()) => self.presenter.set_status(format!("Disconnected from {}", address)),
            Err(err) => {
                warn!("Disconnecting from {} failed: {:?}", address, err);
                self.presenter.set_status(format!("Disconnected from {} ({})", address, err));
            },
        }
        Ok(())
    }

    pub async fn subscribe(&mut self, characteristic: Uuid) -> Result<(), ControllerError> {
        let session = match &self.session {
            Some(session) if session.is_connected && self.state == LinkState::Ready => session,
            _ => return Err(ControllerError::NotConnected),
        };

        let handler = Arc::new(NotificationForwarder::new(characteristic, self.notification_sender.clone()));
        self.registry.subscribe(&mut self.transport, session, handler).await?;

        self.presenter.set_status(format!("Subscribed to {}", characteristic));
        Ok(())
    }

    pub async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), ControllerError> {
        self.registry.unsubscribe(&mut self.transport, characteristic).await?;

        self.presenter.set_status(format!("Unsubscribed from {}", characteristic));
        Ok(())
    }

    /// Processes commands and notification payloads until cancelled, then disconnects.
    pub async fn run(
        mut self,
        mut commands: UnboundedReceiver<ControllerCommand>,
        mut notifications: UnboundedReceiver<Notification>,
        cancel: CancellationToken,
    ) {
        self.publish_actions();

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                command = commands.next() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break 'mainloop,
                },
                Some(notification) = notifications.next() => {
                    self.handle_notification(notification);
                },
            }
        }

        info!("Controller stopping");
        if let Err(err) = self.disconnect().await {
            warn!("Disconnect on shutdown failed: {:?}", err);
        }
    }
}

/// Starts the controller task. The returned handle is how the window talks to it.
pub fn spawn_controller<T: BleTransport + 'static>(
    transport: T,
    store: DeviceConfigStore,
    presenter: Presenter,
    parser: PayloadParser,
    cancel: CancellationToken,
) -> (ControllerHandle, JoinHandle<()>) {
    let (commands, command_receiver) = unbounded();
    let (pins, pin_receiver) = unbounded();
    let (controller, notifications) = BleController::new(transport, store, presenter, parser, pin_receiver);
    let stopped = CancellationToken::new();

    let stopped_guard = stopped.clone().drop_guard();
    let handle = spawn(async move {
        let _stopped_guard = stopped_guard;
        controller.run(command_receiver, notifications, cancel).await;
    });
    (ControllerHandle { commands, pins, stopped }, handle)
}
