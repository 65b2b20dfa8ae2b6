//! Conservative phone normalization
//!
//! Only inputs that are unambiguously convertible are normalized to E.164: a
//! bare 10-digit US number, an 11-digit number already carrying the leading
//! `1`, or a number that already has a `+` country prefix. Anything else is
//! left untouched rather than guessed; a wrong guess would poison the
//! fingerprint and the provider's customer record.

/// Normalize to E.164 when confidently possible. `None` means "leave the
/// original value alone".
pub fn normalize_us_phone(raw: &str) -> Option<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if let Some(rest) = stripped.strip_prefix('+') {
        // Already has a country prefix: accept it if it is E.164-shaped.
        let valid = (8..=15).contains(&rest.len())
            && rest.chars().all(|c| c.is_ascii_digit())
            && !rest.starts_with('0');
        return valid.then_some(stripped);
    }

    if !stripped.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    match stripped.len() {
        10 => Some(format!("+1{}", stripped)),
        11 if stripped.starts_with('1') => Some(format!("+{}", stripped)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ten_digits_get_us_prefix() {
        assert_eq!(
            normalize_us_phone("2345678900").as_deref(),
            Some("+12345678900")
        );
        assert_eq!(
            normalize_us_phone("(234) 567-8900").as_deref(),
            Some("+12345678900")
        );
    }

    #[test]
    fn eleven_digits_with_leading_one() {
        assert_eq!(
            normalize_us_phone("12345678900").as_deref(),
            Some("+12345678900")
        );
        assert_eq!(
            normalize_us_phone("1-234-567-8900").as_deref(),
            Some("+12345678900")
        );
    }

    #[test]
    fn existing_country_prefix_is_kept() {
        assert_eq!(
            normalize_us_phone("+44 20 1234 5678").as_deref(),
            Some("+442012345678")
        );
        assert_eq!(
            normalize_us_phone("+12345678900").as_deref(),
            Some("+12345678900")
        );
    }

    #[test]
    fn ambiguous_inputs_are_left_alone() {
        assert_eq!(normalize_us_phone("12345"), None);
        assert_eq!(normalize_us_phone("234567890"), None); // 9 digits
        assert_eq!(normalize_us_phone("22345678900"), None); // 11, no leading 1
        assert_eq!(normalize_us_phone("not a number"), None);
        assert_eq!(normalize_us_phone("+0123456789"), None); // leading 0 after +
        assert_eq!(normalize_us_phone(""), None);
    }
}
