//! Session-owned lookup state: the device registry populated while
//! scanning and the GATT cache populated by service discovery. Both are
//! cleared whenever the connection goes away.

use std::collections::{BTreeMap, HashMap};

use crate::adapter::RawService;
use crate::model::{CharProperty, CharacteristicRecord, ServiceRecord};
use crate::normalize::canonical_from_uuid;

/// Key the adapter resolves back to a platform peripheral. The platform
/// object itself stays inside the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    pub address: String,
    pub name: Option<String>,
}

/// Peripherals seen during the current scan, keyed by canonical address.
/// Only registered peripherals are eligible for `connect`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, PeripheralHandle>,
}

impl DeviceRegistry {
    /// Records a peripheral, replacing any earlier sighting.
    pub fn insert(&mut self, handle: PeripheralHandle) {
        self.devices.insert(handle.address.clone(), handle);
    }

    pub fn contains(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    pub fn get(&self, address: &str) -> Option<&PeripheralHandle> {
        self.devices.get(address)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Discovered services for the connected peripheral, keyed by canonical
/// service UUID. Repopulated wholesale on every discovery.
#[derive(Debug, Default)]
pub struct GattCache {
    services: BTreeMap<String, ServiceRecord>,
}

impl GattCache {
    /// Replaces the cache with fresh discovery output.
    pub fn replace(&mut self, raw: &[RawService]) {
        self.services.clear();
        for service in raw {
            let uuid = canonical_from_uuid(&service.uuid);
            let characteristics = service
                .characteristics
                .iter()
                .map(|characteristic| CharacteristicRecord {
                    uuid: canonical_from_uuid(&characteristic.uuid),
                    properties: CharProperty::from_bits(characteristic.properties),
                })
                .collect();
            self.services.insert(uuid.clone(), ServiceRecord { uuid, characteristics });
        }
    }

    /// Looks up a characteristic by canonical (service, characteristic)
    /// UUID pair.
    pub fn characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Option<&CharacteristicRecord> {
        self.services
            .get(service)?
            .characteristics
            .iter()
            .find(|record| record.uuid == characteristic)
    }

    /// All cached services, in UUID order.
    pub fn records(&self) -> Vec<ServiceRecord> {
        self.services.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.services.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::adapter::RawCharacteristic;

    fn sample_services() -> Vec<RawService> {
        vec![RawService {
            uuid: Uuid::parse_str("0000180d-0000-1000-8000-00805f9b34fb").expect("valid"),
            characteristics: vec![RawCharacteristic {
                uuid: Uuid::parse_str("00002a37-0000-1000-8000-00805f9b34fb").expect("valid"),
                properties: 0x12,
            }],
        }]
    }

    #[test]
    fn registry_overwrites_on_reinsert() {
        let mut registry = DeviceRegistry::default();
        registry.insert(PeripheralHandle {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            name: None,
        });
        registry.insert(PeripheralHandle {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            name: Some("Pulse".to_string()),
        });
        assert_eq!(registry.len(), 1);
        let handle = registry.get("AA:BB:CC:DD:EE:FF").expect("registered");
        assert_eq!(handle.name.as_deref(), Some("Pulse"));
    }

    #[test]
    fn cache_stores_canonical_uuids_and_decoded_properties() {
        let mut cache = GattCache::default();
        cache.replace(&sample_services());

        let record = cache
            .characteristic(
                "0000180D-0000-1000-8000-00805F9B34FB",
                "00002A37-0000-1000-8000-00805F9B34FB",
            )
            .expect("cached");
        assert_eq!(record.properties, vec![CharProperty::Read, CharProperty::Notify]);
        assert!(cache
            .characteristic(
                "0000180D-0000-1000-8000-00805F9B34FB",
                "00002A38-0000-1000-8000-00805F9B34FB",
            )
            .is_none());
    }

    #[test]
    fn replace_discards_previous_contents() {
        let mut cache = GattCache::default();
        cache.replace(&sample_services());
        cache.replace(&[]);
        assert!(cache.is_empty());
        assert!(cache.records().is_empty());
    }
}
