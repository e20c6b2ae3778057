//! UUID and address normalization.
//!
//! Every identifier crossing the session boundary is reduced to one
//! canonical spelling so map lookups and equality checks never depend on
//! how a platform or caller happened to format it.

use uuid::Uuid;

/// Suffix of the Bluetooth base UUID, used to expand 16- and 32-bit
/// assigned numbers to full 128-bit values.
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805F9B34FB";

/// Canonical form of a UUID string: uppercase, hyphenated, 128-bit.
///
/// Accepts full 128-bit UUIDs in any case, with or without surrounding
/// whitespace, plus 4-digit (16-bit) and 8-digit (32-bit) short forms,
/// which are expanded against the Bluetooth base UUID. Returns `None` for
/// anything that does not parse.
pub fn canonical_uuid(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let expanded = match trimmed.len() {
        4 => format!("0000{trimmed}{BASE_UUID_SUFFIX}"),
        8 => format!("{trimmed}{BASE_UUID_SUFFIX}"),
        _ => trimmed.to_string(),
    };
    let parsed = Uuid::parse_str(&expanded).ok()?;
    Some(canonical_from_uuid(&parsed))
}

/// Canonical string form of an already-parsed UUID.
pub fn canonical_from_uuid(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string().to_uppercase()
}

/// Canonical peripheral address: trimmed and uppercased.
pub fn canonical_address(input: &str) -> String {
    input.trim().to_uppercase()
}

/// The 16-bit assigned number embedded in a base-UUID value (bytes 2..4 of
/// the 128-bit form). Advertisement service-data entries are keyed by this
/// short form.
pub fn short_uuid_16(uuid: &Uuid) -> u16 {
    let bytes = uuid.as_bytes();
    u16::from_be_bytes([bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_16_bit_short_form() {
        assert_eq!(
            canonical_uuid("180d").as_deref(),
            Some("0000180D-0000-1000-8000-00805F9B34FB")
        );
    }

    #[test]
    fn expands_32_bit_short_form() {
        assert_eq!(
            canonical_uuid("0000180d").as_deref(),
            Some("0000180D-0000-1000-8000-00805F9B34FB")
        );
    }

    #[test]
    fn canonicalization_is_idempotent_and_case_insensitive() {
        let first = canonical_uuid(" 0000180d-0000-1000-8000-00805f9b34fb ").expect("valid uuid");
        let second = canonical_uuid(&first).expect("valid uuid");
        assert_eq!(first, second);
        assert_eq!(first, "0000180D-0000-1000-8000-00805F9B34FB");
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(canonical_uuid("not-a-uuid"), None);
        assert_eq!(canonical_uuid(""), None);
        assert_eq!(canonical_uuid("12"), None);
    }

    #[test]
    fn short_form_of_base_uuid_round_trips() {
        let full = canonical_uuid("2902").expect("valid uuid");
        let parsed = Uuid::parse_str(&full).expect("parses back");
        assert_eq!(short_uuid_16(&parsed), 0x2902);
    }

    #[test]
    fn addresses_are_uppercased() {
        assert_eq!(canonical_address(" aa:bb:cc:dd:ee:ff "), "AA:BB:CC:DD:EE:FF");
    }
}
