use btleplug::api::CharPropFlags;
use indexmap::IndexMap;
use uuid::Uuid;

/// A device seen during the most recent scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub address: String,
    pub name: Option<String>,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub name: Option<String>,
    pub properties: CharPropFlags,
}

impl CharacteristicDescriptor {
    pub fn can_notify(&self) -> bool {
        self.properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    }

    pub fn property_names(&self) -> Vec<&'static str> {
        const NAMES: [(CharPropFlags, &str); 8] = [
            (CharPropFlags::BROADCAST, "broadcast"),
            (CharPropFlags::READ, "read"),
            (CharPropFlags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
            (CharPropFlags::WRITE, "write"),
            (CharPropFlags::NOTIFY, "notify"),
            (CharPropFlags::INDICATE, "indicate"),
            (CharPropFlags::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
            (CharPropFlags::EXTENDED_PROPERTIES, "extended-properties"),
        ];

        NAMES.iter()
            .filter(|(flag, _)| self.properties.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub name: Option<String>,
    pub characteristics: IndexMap<Uuid, CharacteristicDescriptor>,
}

/// Discovered services of the connected device, in discovery order.
pub type Catalog = IndexMap<Uuid, ServiceDescriptor>;

/// Keeps only the characteristics that can push values, and the services that still have any.
pub fn notifiable_catalog(services: Vec<ServiceDescriptor>) -> Catalog {
    services.into_iter()
        .filter_map(|mut service| {
            service.characteristics.retain(|_, characteristic| characteristic.can_notify());
            if service.characteristics.is_empty() {
                None
            } else {
                Some((service.uuid, service))
            }
        })
        .collect()
}

/// Lifecycle of the single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    DeviceSelected,
    Connecting,
    PairingRequired,
    Pairing,
    Discovering,
    Ready,
    Disconnecting,
}

/// The connection the controller currently owns.
#[derive(Debug, Clone)]
pub struct Session {
    pub address: String,
    pub is_connected: bool,
    pub catalog: Catalog,
}

impl Session {
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.catalog.values().find_map(|service| service.characteristics.get(uuid))
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &CharacteristicDescriptor> {
        self.catalog.values().flat_map(|service| service.characteristics.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristic(n: u128, properties: CharPropFlags) -> CharacteristicDescriptor {
        CharacteristicDescriptor { uuid: Uuid::from_u128(n), name: None, properties }
    }

    fn service(n: u128, characteristics: Vec<CharacteristicDescriptor>) -> ServiceDescriptor {
        ServiceDescriptor {
            uuid: Uuid::from_u128(n),
            name: None,
            characteristics: characteristics.into_iter().map(|c| (c.uuid, c)).collect(),
        }
    }

    #[test]
    fn catalog_drops_characteristics_without_notify_or_indicate() {
        let catalog = notifiable_catalog(vec![
            service(1, vec![
                characteristic(10, CharPropFlags::READ | CharPropFlags::NOTIFY),
                characteristic(11, CharPropFlags::READ | CharPropFlags::WRITE),
                characteristic(12, CharPropFlags::INDICATE),
            ]),
            service(2, vec![characteristic(20, CharPropFlags::READ)]),
        ]);

        assert_eq!(catalog.len(), 1);
        let kept: Vec<Uuid> = catalog[&Uuid::from_u128(1)].characteristics.keys().copied().collect();
        assert_eq!(kept, vec![Uuid::from_u128(10), Uuid::from_u128(12)]);
    }

    #[test]
    fn property_names_in_flag_order() {
        let c = characteristic(1, CharPropFlags::INDICATE | CharPropFlags::READ | CharPropFlags::NOTIFY);
        assert_eq!(c.property_names(), vec!["read", "notify", "indicate"]);
    }
}
