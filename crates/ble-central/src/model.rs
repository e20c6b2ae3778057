//! Data model shared between the session, the adapter layer and callers.
//!
//! Serde field names follow the wire shape the records are reported with
//! (camelCase, SCREAMING_SNAKE_CASE property names).

use std::fmt;

use serde::{Deserialize, Serialize};

const PROP_BROADCAST: u8 = 0x01;
const PROP_READ: u8 = 0x02;
const PROP_WRITE_WO_RSP: u8 = 0x04;
const PROP_WRITE: u8 = 0x08;
const PROP_NOTIFY: u8 = 0x10;
const PROP_INDICATE: u8 = 0x20;
const PROP_AUTH_SIGN_WRITES: u8 = 0x40;
const PROP_EXTENDED_PROP: u8 = 0x80;

/// GATT characteristic capability flags, decoded from the standard
/// property bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CharProperty {
    Broadcast,
    Read,
    WriteWoRsp,
    Write,
    Notify,
    Indicate,
    AuthSignWrites,
    ExtendedProp,
}

impl CharProperty {
    /// Decodes a property bitmask into flags, in bit order.
    pub fn from_bits(bits: u8) -> Vec<CharProperty> {
        let table = [
            (PROP_BROADCAST, CharProperty::Broadcast),
            (PROP_READ, CharProperty::Read),
            (PROP_WRITE_WO_RSP, CharProperty::WriteWoRsp),
            (PROP_WRITE, CharProperty::Write),
            (PROP_NOTIFY, CharProperty::Notify),
            (PROP_INDICATE, CharProperty::Indicate),
            (PROP_AUTH_SIGN_WRITES, CharProperty::AuthSignWrites),
            (PROP_EXTENDED_PROP, CharProperty::ExtendedProp),
        ];
        table
            .iter()
            .filter(|(bit, _)| bits & bit != 0)
            .map(|(_, property)| *property)
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CharProperty::Broadcast => "BROADCAST",
            CharProperty::Read => "READ",
            CharProperty::WriteWoRsp => "WRITE_WO_RSP",
            CharProperty::Write => "WRITE",
            CharProperty::Notify => "NOTIFY",
            CharProperty::Indicate => "INDICATE",
            CharProperty::AuthSignWrites => "AUTH_SIGN_WRITES",
            CharProperty::ExtendedProp => "EXTENDED_PROP",
        }
    }
}

impl fmt::Display for CharProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One manufacturer-specific data entry from an advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturerData {
    pub company_id: u16,
    pub data: Vec<u8>,
}

/// One service-data entry from an advertisement, keyed by the 16-bit
/// service identifier. The identifier travels on the wire as a 4-char
/// uppercase hex string ("180D").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceData {
    #[serde(with = "short_uuid_hex")]
    pub uuid: u16,
    pub data: Vec<u8>,
}

mod short_uuid_hex {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:04X}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        let text = String::deserialize(deserializer)?;
        u16::from_str_radix(&text, 16).map_err(D::Error::custom)
    }
}

/// A single scan result, normalized. Transient: emitted per advertisement
/// and not retained by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementRecord {
    pub name: String,
    pub mac_address: String,
    pub rssi: Option<i16>,
    pub manufacturer_data: Vec<ManufacturerData>,
    pub service_data: Vec<ServiceData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<i16>,
}

/// A discovered characteristic: canonical UUID plus decoded capability
/// flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicRecord {
    pub uuid: String,
    pub properties: Vec<CharProperty>,
}

impl CharacteristicRecord {
    pub fn supports(&self, property: CharProperty) -> bool {
        self.properties.contains(&property)
    }
}

/// A discovered service and its characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub uuid: String,
    pub characteristics: Vec<CharacteristicRecord>,
}

/// Permission snapshot reported by the platform, when it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub location_permission: bool,
    pub bluetooth_permission: bool,
    pub bluetooth_admin_or_scan_permission: bool,
    pub bluetooth_connect_permission: bool,
}

impl Capabilities {
    pub fn all_granted(&self) -> bool {
        self.location_permission
            && self.bluetooth_permission
            && self.bluetooth_admin_or_scan_permission
            && self.bluetooth_connect_permission
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_property_bitmask_in_bit_order() {
        assert_eq!(
            CharProperty::from_bits(0x12),
            vec![CharProperty::Read, CharProperty::Notify]
        );
        assert_eq!(CharProperty::from_bits(0x00), vec![]);
        assert_eq!(
            CharProperty::from_bits(0xFF),
            vec![
                CharProperty::Broadcast,
                CharProperty::Read,
                CharProperty::WriteWoRsp,
                CharProperty::Write,
                CharProperty::Notify,
                CharProperty::Indicate,
                CharProperty::AuthSignWrites,
                CharProperty::ExtendedProp,
            ]
        );
    }

    #[test]
    fn properties_serialize_with_wire_names() {
        let json = serde_json::to_string(&CharProperty::from_bits(0x44)).expect("serializes");
        assert_eq!(json, r#"["WRITE_WO_RSP","AUTH_SIGN_WRITES"]"#);
    }

    #[test]
    fn advertisement_uses_wire_field_names() {
        let record = AdvertisementRecord {
            name: "Pulse".to_string(),
            mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
            rssi: Some(-60),
            manufacturer_data: vec![ManufacturerData { company_id: 0x004C, data: vec![1, 2] }],
            service_data: vec![ServiceData { uuid: 0x180D, data: vec![9] }],
            tx_power: None,
        };
        let json = serde_json::to_value(&record).expect("serializes");
        assert_eq!(json["macAddress"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["manufacturerData"][0]["companyId"], 0x004C);
        assert_eq!(json["serviceData"][0]["uuid"], "180D");
        assert!(json.get("txPower").is_none());
    }

    #[test]
    fn service_data_uuid_round_trips_as_hex_string() {
        let entry = ServiceData { uuid: 0x002A, data: vec![7] };
        let json = serde_json::to_value(&entry).expect("serializes");
        assert_eq!(json["uuid"], "002A");
        let parsed: ServiceData = serde_json::from_value(json).expect("deserializes");
        assert_eq!(parsed, entry);
    }

    #[test]
    fn all_granted_requires_every_flag() {
        let granted = Capabilities {
            location_permission: true,
            bluetooth_permission: true,
            bluetooth_admin_or_scan_permission: true,
            bluetooth_connect_permission: true,
        };
        assert!(granted.all_granted());
        let partial = Capabilities { bluetooth_connect_permission: false, ..granted };
        assert!(!partial.all_granted());
    }
}
