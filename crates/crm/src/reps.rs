//! Sales representative resolution
//!
//! Deals carry the owning rep's Slack member id in a custom field. The field
//! is hand-maintained, so the value is validated against the id shape before
//! use; when absent or invalid, a static directory keyed by the deal owner's
//! email or phone fills in.

/// Validate and normalize a Slack member id.
///
/// Accepted shape: optional leading `@` sigil (stripped), one uppercase type
/// character, then 8-11 alphanumeric characters.
pub fn normalize_slack_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix('@').unwrap_or(trimmed);

    let mut chars = stripped.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }

    let rest = chars.as_str();
    if !(8..=11).contains(&rest.len()) {
        return None;
    }
    if !rest.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some(stripped.to_string())
}

/// Static rep directory: (owner email or phone, Slack member id).
///
/// Fallback for deals whose Slack field is empty or malformed; kept small on
/// purpose, the field is the primary source.
const SALES_REP_DIRECTORY: &[(&str, &str)] = &[
    ("marta@menucraft.io", "U02F3K1Q9LH"),
    ("devon@menucraft.io", "U03B8XW2R4T"),
    ("priya@menucraft.io", "U01J7NM5C2D"),
    ("+12135550148", "U02F3K1Q9LH"),
    ("+14155550122", "U03B8XW2R4T"),
];

fn directory_lookup(key: &str) -> Option<String> {
    let key = key.trim();
    SALES_REP_DIRECTORY
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, slack)| slack.to_string())
}

/// Resolve the rep's Slack id: explicit field value first (validated), then
/// the directory by owner email, then by owner phone.
pub fn resolve_sales_rep(
    field_value: Option<&str>,
    owner_email: Option<&str>,
    owner_phone: Option<&str>,
) -> Option<String> {
    if let Some(value) = field_value {
        if let Some(valid) = normalize_slack_id(value) {
            return Some(valid);
        }
        tracing::debug!(value = %value, "Slack field value failed validation, using directory");
    }

    owner_email
        .and_then(directory_lookup)
        .or_else(|| owner_phone.and_then(directory_lookup))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert_eq!(normalize_slack_id("U12345678").as_deref(), Some("U12345678"));
        assert_eq!(
            normalize_slack_id("@U12345678AB").as_deref(),
            Some("U12345678AB")
        );
        assert_eq!(
            normalize_slack_id("W0ABCDEFGHI").as_deref(),
            Some("W0ABCDEFGHI")
        );
    }

    #[test]
    fn rejects_invalid_ids() {
        // No leading type character.
        assert_eq!(normalize_slack_id("12345678"), None);
        // Too short after the type character.
        assert_eq!(normalize_slack_id("U1234567"), None);
        // Too long after the type character.
        assert_eq!(normalize_slack_id("U123456789012"), None);
        // Invalid characters.
        assert_eq!(normalize_slack_id("Uabc-defg"), None);
        assert_eq!(normalize_slack_id(""), None);
        assert_eq!(normalize_slack_id("@"), None);
    }

    #[test]
    fn field_value_wins_over_directory() {
        let resolved = resolve_sales_rep(
            Some("U99999999"),
            Some("marta@menucraft.io"),
            None,
        );
        assert_eq!(resolved.as_deref(), Some("U99999999"));
    }

    #[test]
    fn invalid_field_falls_back_to_directory() {
        let resolved = resolve_sales_rep(
            Some("not-an-id"),
            Some("marta@menucraft.io"),
            None,
        );
        assert_eq!(resolved.as_deref(), Some("U02F3K1Q9LH"));
    }

    #[test]
    fn phone_fallback_after_email() {
        let resolved = resolve_sales_rep(None, Some("unknown@example.com"), Some("+14155550122"));
        assert_eq!(resolved.as_deref(), Some("U03B8XW2R4T"));

        assert_eq!(
            resolve_sales_rep(None, Some("unknown@example.com"), Some("+10000000000")),
            None
        );
    }
}
