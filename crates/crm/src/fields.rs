//! CRM custom-field value handling
//!
//! The CRM delivers custom-field values in more than one shape (`"text"` or
//! `{"value": "text"}` depending on endpoint and webhook version). They are
//! modeled as an explicit union with one narrowing accessor; nothing else in
//! the crate is allowed to assume a single shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A custom-field value as the CRM delivers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomFieldValue {
    Text(String),
    Wrapped { value: String },
    Number(f64),
}

impl CustomFieldValue {
    /// Narrow to text, whatever shape the CRM chose.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CustomFieldValue::Text(s) => Some(s.clone()),
            CustomFieldValue::Wrapped { value } => Some(value.clone()),
            CustomFieldValue::Number(n) => {
                if n.fract() == 0.0 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(format!("{}", n))
                }
            }
        }
    }
}

/// A resolved custom-field descriptor. Field keys are CRM-assigned hashes
/// and not guaranteed stable across calls, hence resolution by display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmDealFieldRef {
    pub key: String,
    pub name: String,
    pub field_type: String,
}

/// Raw schema entry from the CRM field list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealField {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub field_type: String,
}

/// Resolve a field by display name (case-insensitive).
pub fn resolve_field(fields: &[DealField], name: &str) -> Option<CrmDealFieldRef> {
    fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .map(|f| CrmDealFieldRef {
            key: f.key.clone(),
            name: f.name.clone(),
            field_type: f.field_type.clone(),
        })
}

/// Extract a text value from a deal's custom-field map.
pub fn field_text(fields: &HashMap<String, CustomFieldValue>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(|v| v.as_text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Substrings that mark a stored value as a payment/checkout URL rather than
/// an error message.
const CHECKOUT_URL_MARKERS: &[&str] = &["/billing/", "checkout", "stripe.com", "subscription"];

/// Whether a field value looks like a live payment link.
///
/// This is a shape heuristic only; the fingerprint comparison is the
/// authoritative staleness guard.
pub fn is_checkout_like(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
        return false;
    }
    CHECKOUT_URL_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrows_both_shapes() {
        let plain: CustomFieldValue = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(plain.as_text().as_deref(), Some("hello"));

        let wrapped: CustomFieldValue = serde_json::from_str(r#"{"value": "hello"}"#).unwrap();
        assert_eq!(wrapped.as_text().as_deref(), Some("hello"));

        let number: CustomFieldValue = serde_json::from_str("129").unwrap();
        assert_eq!(number.as_text().as_deref(), Some("129"));
    }

    #[test]
    fn resolves_field_by_name_case_insensitive() {
        let fields = vec![
            DealField {
                key: "abc123".to_string(),
                name: "Payment Link".to_string(),
                field_type: "varchar".to_string(),
            },
            DealField {
                key: "def456".to_string(),
                name: "Payment Link Fingerprint".to_string(),
                field_type: "varchar".to_string(),
            },
        ];

        let resolved = resolve_field(&fields, "payment link").unwrap();
        assert_eq!(resolved.key, "abc123");
        assert!(resolve_field(&fields, "Nonexistent").is_none());
    }

    #[test]
    fn field_text_trims_and_drops_empty() {
        let mut map = HashMap::new();
        map.insert(
            "a".to_string(),
            CustomFieldValue::Text("  padded  ".to_string()),
        );
        map.insert("b".to_string(), CustomFieldValue::Text("   ".to_string()));

        assert_eq!(field_text(&map, "a").as_deref(), Some("padded"));
        assert_eq!(field_text(&map, "b"), None);
        assert_eq!(field_text(&map, "missing"), None);
    }

    #[test]
    fn recognizes_checkout_urls() {
        assert!(is_checkout_like("https://checkout.stripe.com/c/pay/cs_123"));
        assert!(is_checkout_like("https://app.menucraft.io/subscription/abc"));
        assert!(is_checkout_like("https://example.com/billing/portal"));

        assert!(!is_checkout_like("Missing attributes: email"));
        assert!(!is_checkout_like("Invalid price"));
        // Checkout-ish words without a scheme are not URLs.
        assert!(!is_checkout_like("checkout failed, call support"));
    }
}
