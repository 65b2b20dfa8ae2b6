//! Subscription input fingerprints
//!
//! A checkout link only needs regeneration when the data behind it changed.
//! The change detector is a content fingerprint: a SHA-256 digest over a
//! canonical serialization of the subscription input. Historically the raw
//! canonical JSON itself was stored in the CRM; any stored value in that
//! legacy format is treated as always stale, which forces one regeneration
//! and migrates the field to the digest format.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// The canonical subscription input derived from a CRM deal. Ephemeral:
/// built fresh on every deal event, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInput {
    pub deal_id: i64,
    /// Monthly price in minor currency units.
    pub price: i64,
    pub restaurant_name: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub sales_rep_slack_id: Option<String>,
}

impl SubscriptionInput {
    /// Canonical serialization: fixed key set, absent optionals as `null`.
    ///
    /// serde_json's default map is ordered, so equal inputs serialize to
    /// byte-equal strings regardless of how the source object was built.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::json!({
            "dealId": self.deal_id,
            "price": self.price,
            "restaurantName": self.restaurant_name,
            "name": self.name,
            "email": self.email,
            "phoneNumber": self.phone_number,
            "salesRepSlackId": self.sales_rep_slack_id,
        });
        value.to_string()
    }

    /// Hex SHA-256 digest of the canonical serialization.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A stored fingerprint in the legacy raw-JSON format. Always stale.
pub fn is_legacy_fingerprint(stored: &str) -> bool {
    stored.trim_start().starts_with('{')
}

/// Whether a stored fingerprint proves the current input unchanged.
///
/// Absent and legacy-format values never match, so both force regeneration.
pub fn fingerprint_is_current(stored: Option<&str>, current: &str) -> bool {
    match stored {
        Some(stored) if !stored.trim().is_empty() && !is_legacy_fingerprint(stored) => {
            stored.trim() == current
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SubscriptionInput {
        SubscriptionInput {
            deal_id: 42,
            price: 12900,
            restaurant_name: Some("Trattoria Da Anna".to_string()),
            name: Some("Anna Rossi".to_string()),
            email: Some("anna@trattoria.example".to_string()),
            phone_number: Some("+12345678900".to_string()),
            sales_rep_slack_id: Some("U02A3B4C5D6".to_string()),
        }
    }

    #[test]
    fn equal_inputs_have_equal_fingerprints() {
        let a = sample();
        // Built in a different order, same values.
        let b = SubscriptionInput {
            sales_rep_slack_id: Some("U02A3B4C5D6".to_string()),
            phone_number: Some("+12345678900".to_string()),
            email: Some("anna@trattoria.example".to_string()),
            name: Some("Anna Rossi".to_string()),
            restaurant_name: Some("Trattoria Da Anna".to_string()),
            price: 12900,
            deal_id: 42,
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn every_field_is_fingerprint_sensitive() {
        let base = sample();
        let base_fp = base.fingerprint();

        let variants = [
            SubscriptionInput {
                price: 9900,
                ..base.clone()
            },
            SubscriptionInput {
                restaurant_name: Some("Other".to_string()),
                ..base.clone()
            },
            SubscriptionInput {
                name: Some("Other".to_string()),
                ..base.clone()
            },
            SubscriptionInput {
                email: Some("other@trattoria.example".to_string()),
                ..base.clone()
            },
            SubscriptionInput {
                phone_number: Some("+19998887777".to_string()),
                ..base.clone()
            },
            SubscriptionInput {
                sales_rep_slack_id: Some("U9ZZZZZZZZ".to_string()),
                ..base.clone()
            },
        ];

        for variant in variants {
            assert_ne!(
                variant.fingerprint(),
                base_fp,
                "changing {:?} should change the fingerprint",
                variant
            );
        }
    }

    #[test]
    fn absent_optionals_serialize_as_null() {
        let input = SubscriptionInput {
            deal_id: 1,
            price: 100,
            restaurant_name: None,
            name: None,
            email: None,
            phone_number: None,
            sales_rep_slack_id: None,
        };
        let json = input.canonical_json();
        assert!(json.contains("\"restaurantName\":null"));
        assert!(json.contains("\"phoneNumber\":null"));
    }

    #[test]
    fn legacy_format_is_always_stale() {
        assert!(is_legacy_fingerprint(r#"{"dealId":42}"#));
        assert!(is_legacy_fingerprint("  {\"dealId\":42}"));
        assert!(!is_legacy_fingerprint("a3f9c2"));

        let current = sample().fingerprint();
        // Even a legacy value that would hash-match stays stale.
        assert!(!fingerprint_is_current(
            Some(&format!("{{\"hash\":\"{}\"}}", current)),
            &current
        ));
    }

    #[test]
    fn current_format_matches_exactly() {
        let current = sample().fingerprint();
        assert!(fingerprint_is_current(Some(&current), &current));
        assert!(fingerprint_is_current(
            Some(&format!("  {}  ", current)),
            &current
        ));
        assert!(!fingerprint_is_current(Some("deadbeef"), &current));
        assert!(!fingerprint_is_current(Some(""), &current));
        assert!(!fingerprint_is_current(None, &current));
    }
}
