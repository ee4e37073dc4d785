#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use btleplug::api::CharPropFlags;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use ble_monitor::config::store::DeviceConfigStore;
use ble_monitor::config::types::DeviceConfig;
use ble_monitor::device::controller::BleController;
use ble_monitor::device::parser::PayloadParser;
use ble_monitor::device::presenter::{PinReply, Presenter, UiEvent};
use ble_monitor::device::transport::{BleTransport, Notification, NotificationHandler};
use ble_monitor::device::types::{CharacteristicDescriptor, DeviceRecord, ServiceDescriptor};
use ble_monitor::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Scan,
    Connect(String),
    Pair(String),
    Disconnect,
    ListServices,
    StartNotify(Uuid),
    StopNotify(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    Accept,
    Reject,
    Unsupported,
}

pub type Handlers = Arc<Mutex<HashMap<Uuid, Arc<dyn NotificationHandler>>>>;

/// Scripted transport that records every call.
pub struct MockTransport {
    pub calls: Vec<Call>,
    pub scan_devices: Vec<DeviceRecord>,
    pub scan_fails: bool,
    // popped per connect call, `true` once exhausted
    pub connect_results: VecDeque<bool>,
    pub connect_fails: bool,
    pub pairing: Pairing,
    pub services: Vec<ServiceDescriptor>,
    pub discovery_fails: bool,
    pub start_notify_fails: bool,
    pub failing_stop_notify: HashSet<Uuid>,
    pub disconnect_fails: bool,
    pub handlers: Handlers,
}

impl Default for MockTransport {
    fn default() -> Self {
        MockTransport {
            calls: Vec::new(),
            scan_devices: vec![device("AA:AA:AA:AA:AA:AA", Some("Thermometer"))],
            scan_fails: false,
            connect_results: VecDeque::new(),
            connect_fails: false,
            pairing: Pairing::Accept,
            services: sensor_services(),
            discovery_fails: false,
            start_notify_fails: false,
            failing_stop_notify: HashSet::new(),
            disconnect_fails: false,
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl MockTransport {
    pub fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn connect_calls(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, Call::Connect(_))).count()
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn scan(&mut self, _timeout: Duration) -> Result<Vec<DeviceRecord>, DeviceError> {
        self.calls.push(Call::Scan);
        if self.scan_fails {
            return Err(DeviceError::NoAdapter);
        }
        Ok(self.scan_devices.clone())
    }

    async fn connect(&mut self, device: &DeviceRecord) -> Result<bool, DeviceError> {
        self.calls.push(Call::Connect(device.address.clone()));
        if self.connect_fails {
            return Err(DeviceError::NotConnected);
        }
        Ok(self.connect_results.pop_front().unwrap_or(true))
    }

    async fn pair(&mut self, pin: &str) -> Result<bool, DeviceError> {
        self.calls.push(Call::Pair(pin.to_string()));
        match self.pairing {
            Pairing::Accept => Ok(true),
            Pairing::Reject => Ok(false),
            Pairing::Unsupported => Err(DeviceError::PairingUnsupported),
        }
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.calls.push(Call::Disconnect);
        self.handlers.lock().unwrap().clear();
        if self.disconnect_fails {
            return Err(DeviceError::NotConnected);
        }
        Ok(())
    }

    async fn list_services(&mut self) -> Result<Vec<ServiceDescriptor>, DeviceError> {
        self.calls.push(Call::ListServices);
        if self.discovery_fails {
            return Err(DeviceError::NotConnected);
        }
        Ok(self.services.clone())
    }

    async fn start_notify(&mut self, characteristic: Uuid, handler: Arc<dyn NotificationHandler>) -> Result<(), DeviceError> {
        self.calls.push(Call::StartNotify(characteristic));
        if self.start_notify_fails {
            return Err(DeviceError::MissingCharacteristic(characteristic));
        }
        self.handlers.lock().unwrap().insert(characteristic, handler);
        Ok(())
    }

    async fn stop_notify(&mut self, characteristic: Uuid) -> Result<(), DeviceError> {
        self.calls.push(Call::StopNotify(characteristic));
        self.handlers.lock().unwrap().remove(&characteristic);
        if self.failing_stop_notify.contains(&characteristic) {
            return Err(DeviceError::MissingCharacteristic(characteristic));
        }
        Ok(())
    }
}

pub const SERVICE: Uuid = Uuid::from_u128(0x1000);
pub const NOTIFY_A: Uuid = Uuid::from_u128(0x1001);
pub const READ_ONLY: Uuid = Uuid::from_u128(0x1002);
pub const INDICATE_B: Uuid = Uuid::from_u128(0x1003);
pub const NOTIFY_C: Uuid = Uuid::from_u128(0x1004);
pub const OTHER_SERVICE: Uuid = Uuid::from_u128(0x2000);
pub const WRITE_ONLY: Uuid = Uuid::from_u128(0x2001);

pub fn device(address: &str, name: Option<&str>) -> DeviceRecord {
    DeviceRecord {
        address: address.to_string(),
        name: name.map(str::to_string),
        services: vec![SERVICE],
    }
}

fn characteristic(uuid: Uuid, properties: CharPropFlags) -> (Uuid, CharacteristicDescriptor) {
    (uuid, CharacteristicDescriptor { uuid, name: None, properties })
}

pub fn sensor_services() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor {
            uuid: SERVICE,
            name: None,
            characteristics: [
                characteristic(NOTIFY_A, CharPropFlags::READ | CharPropFlags::NOTIFY),
                characteristic(READ_ONLY, CharPropFlags::READ),
                characteristic(INDICATE_B, CharPropFlags::INDICATE),
                characteristic(NOTIFY_C, CharPropFlags::NOTIFY),
            ].into_iter().collect(),
        },
        ServiceDescriptor {
            uuid: OTHER_SERVICE,
            name: None,
            characteristics: [
                characteristic(WRITE_ONLY, CharPropFlags::WRITE),
            ].into_iter().collect(),
        },
    ]
}

pub struct Harness {
    pub controller: BleController<MockTransport>,
    pub ui: UnboundedReceiver<UiEvent>,
    pub pins: UnboundedSender<PinReply>,
    pub notifications: UnboundedReceiver<Notification>,
}

pub fn harness_with(transport: MockTransport, config: DeviceConfig) -> Harness {
    let (ui_sender, ui) = unbounded();
    let (pins, pin_receiver) = unbounded();
    let (controller, notifications) = BleController::new(
        transport,
        DeviceConfigStore::in_memory(config),
        Presenter::new(ui_sender),
        PayloadParser::default(),
        pin_receiver,
    );

    Harness { controller, ui, pins, notifications }
}

pub fn harness(transport: MockTransport) -> Harness {
    harness_with(transport, DeviceConfig::default())
}

/// Everything published so far.
pub fn drain(ui: &mut UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = ui.try_next() {
        events.push(event);
    }
    events
}

pub fn last_status(events: &[UiEvent]) -> Option<&str> {
    events.iter().rev().find_map(|event| match event {
        UiEvent::Status(status) => Some(status.as_str()),
        _ => None,
    })
}
