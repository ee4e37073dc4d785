use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, ValueNotification};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::transport::{BleTransport, NotificationHandler};
use crate::device::types::{CharacteristicDescriptor, DeviceRecord, ServiceDescriptor};
use crate::error::DeviceError;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// [`BleTransport`] on top of the platform bluetooth stack.
pub struct BtleplugTransport {
    manager: Manager,
    // peripherals of the last scan, by address
    peripherals: HashMap<String, Peripheral>,
    connected: Option<Peripheral>,
    notify_tasks: HashMap<Uuid, CancellationToken>,
}

impl BtleplugTransport {
    pub async fn new() -> Result<Self, DeviceError> {
        Ok(BtleplugTransport {
            manager: Manager::new().await?,
            peripherals: HashMap::new(),
            connected: None,
            notify_tasks: HashMap::new(),
        })
    }

    fn connected(&self) -> Result<&Peripheral, DeviceError> {
        self.connected.as_ref().ok_or(DeviceError::NotConnected)
    }

    fn stop_notify_tasks(&mut self) {
        for (_, cancel) in self.notify_tasks.drain() {
            cancel.cancel();
        }
    }
}

// the part of `Central` that starting and stopping a scan needs
#[async_trait]
trait ScanControl: Send + Sync {
    async fn start(&self) -> Result<(), btleplug::Error>;

    async fn stop(&self) -> Result<(), btleplug::Error>;
}

#[async_trait]
impl ScanControl for Adapter {
    async fn start(&self) -> Result<(), btleplug::Error> {
        info!("Scanning using adapter {}...", self.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        self.start_scan(ScanFilter::default()).await
    }

    async fn stop(&self) -> Result<(), btleplug::Error> {
        self.stop_scan().await
    }
}

async fn stop_scanning<A: ScanControl>(adapters: &[A]) {
    for adapter in adapters {
        if let Err(err) = adapter.stop().await {
            warn!("Failed to stop scanning: {:?}", err);
        }
    }
}

// a failing adapter stops the ones already started
async fn start_each<A: ScanControl>(adapters: Vec<A>) -> Result<Vec<A>, DeviceError> {
    if adapters.is_empty() {
        return Err(DeviceError::NoAdapter);
    }

    let mut scanning = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        if let Err(err) = adapter.start().await {
            stop_scanning(&scanning).await;
            return Err(err.into());
        }
        scanning.push(adapter);
    }

    Ok(scanning)
}

async fn start_scanning(manager: &Manager) -> Result<Vec<Adapter>, DeviceError> {
    start_each(manager.adapters().await?).await
}

// macOS does not expose hardware addresses, use the platform id there
fn device_address(peripheral: &Peripheral, properties: &PeripheralProperties) -> String {
    if properties.address.into_inner() == [0; 6] {
        peripheral.id().to_string()
    } else {
        properties.address.to_string()
    }
}

async fn collect_peripherals(adapters: &[Adapter]) -> Vec<(DeviceRecord, Peripheral)> {
    let mut found = Vec::new();
    stop_scanning(adapters).await;

    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {
                    debug!("Peripheral has no properties");
                },
                Ok(Some(properties)) => {
                    let record = DeviceRecord {
                        address: device_address(&peripheral, &properties),
                        name: properties.local_name,
                        services: properties.services,
                    };
                    debug!("Found peripheral {} {:?} {:?}", record.address, record.name, record.services);
                    found.push((record, peripheral));
                },
            }
        }
    }

    found
}

fn read_notifications_task(cancel: CancellationToken, mut notification_stream: NotificationStream, handler: Arc<dyn NotificationHandler>) -> JoinHandle<()> {
    let characteristic = handler.characteristic();

    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    // the stream carries every characteristic of the peripheral
                    Some(data) => if data.uuid == characteristic {
                        handler.on_notification(data.value);
                    },
                    None => {
                        info!("Notification stream for {} ended", characteristic);
                        break 'mainloop;
                    },
                },
            }
        }
    })
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn scan(&mut self, timeout: Duration) -> Result<Vec<DeviceRecord>, DeviceError> {
        let adapters = start_scanning(&self.manager).await?;
        sleep(timeout).await;

        let found = collect_peripherals(&adapters).await;
        self.peripherals = found.iter()
            .map(|(record, peripheral)| (record.address.clone(), peripheral.clone()))
            .collect();

        Ok(found.into_iter().map(|(record, _)| record).collect())
    }

    async fn connect(&mut self, device: &DeviceRecord) -> Result<bool, DeviceError> {
        let peripheral = self.peripherals.get(&device.address)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice(device.address.clone()))?;

        self.connected = Some(peripheral.clone());
        peripheral.connect().await?;
        Ok(peripheral.is_connected().await?)
    }

    async fn pair(&mut self, _pin: &str) -> Result<bool, DeviceError> {
        // btleplug leaves pairing to the operating system
        Err(DeviceError::PairingUnsupported)
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.stop_notify_tasks();

        if let Some(peripheral) = self.connected.take() {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn list_services(&mut self) -> Result<Vec<ServiceDescriptor>, DeviceError> {
        let peripheral = self.connected()?;

        info!("Discovering services...");
        peripheral.discover_services().await?;

        Ok(peripheral.services()
            .into_iter()
            .map(|service| ServiceDescriptor {
                uuid: service.uuid,
                name: None,
                characteristics: service.characteristics
                    .into_iter()
                    .map(|characteristic| (characteristic.uuid, CharacteristicDescriptor {
                        uuid: characteristic.uuid,
                        name: None,
                        properties: characteristic.properties,
                    }))
                    .collect(),
            })
            .collect())
    }

    async fn start_notify(&mut self, characteristic: Uuid, handler: Arc<dyn NotificationHandler>) -> Result<(), DeviceError> {
        let peripheral = self.connected()?;
        let target = peripheral.characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(DeviceError::MissingCharacteristic(characteristic))?;

        // open the stream first so no early value is missed
        let notification_stream = peripheral.notifications().await?;
        peripheral.subscribe(&target).await?;

        let cancel = CancellationToken::new();
        read_notifications_task(cancel.clone(), notification_stream, handler);
        if let Some(previous) = self.notify_tasks.insert(characteristic, cancel) {
            previous.cancel();
        }
        Ok(())
    }

    async fn stop_notify(&mut self, characteristic: Uuid) -> Result<(), DeviceError> {
        if let Some(cancel) = self.notify_tasks.remove(&characteristic) {
            cancel.cancel();
        }

        let peripheral = self.connected()?;
        let target = peripheral.characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(DeviceError::MissingCharacteristic(characteristic))?;

        peripheral.unsubscribe(&target).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    struct FakeAdapter {
        id: usize,
        fails: bool,
        events: Arc<Events>,
    }

    #[async_trait]
    impl ScanControl for FakeAdapter {
        async fn start(&self) -> Result<(), btleplug::Error> {
            self.events.0.lock().unwrap().push(format!("start {}", self.id));
            if self.fails {
                return Err(btleplug::Error::NotConnected);
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), btleplug::Error> {
            self.events.0.lock().unwrap().push(format!("stop {}", self.id));
            Ok(())
        }
    }

    fn adapters(failing: Option<usize>, events: &Arc<Events>) -> Vec<FakeAdapter> {
        (0..3)
            .map(|id| FakeAdapter { id, fails: failing == Some(id), events: events.clone() })
            .collect()
    }

    #[tokio::test]
    async fn failing_adapter_stops_the_ones_already_scanning() {
        let events = Arc::new(Events::default());

        let result = start_each(adapters(Some(2), &events)).await;

        assert!(matches!(result, Err(DeviceError::Btle { .. })));
        assert_eq!(*events.0.lock().unwrap(), vec!["start 0", "start 1", "start 2", "stop 0", "stop 1"]);
    }

    #[tokio::test]
    async fn all_adapters_scan_when_none_fail() {
        let events = Arc::new(Events::default());

        let scanning = start_each(adapters(None, &events)).await.unwrap();

        assert_eq!(scanning.len(), 3);
        assert!(events.0.lock().unwrap().iter().all(|event| event.starts_with("start")));
    }

    #[tokio::test]
    async fn no_adapter_is_an_error() {
        let result = start_each(Vec::<FakeAdapter>::new()).await;
        assert!(matches!(result, Err(DeviceError::NoAdapter)));
    }
}
