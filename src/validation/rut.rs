//! Chilean national identifier (RUT/RUN) normalization and mod-11 check.

/// Minimum normalized length of a RUT, body plus verifier.
pub const MIN_RUT_LEN: usize = 8;

/// Uppercases the input and drops everything that is not a digit or `K`.
///
/// # Arguments
///
/// * `raw` - The identifier as typed or as read by OCR, e.g. `12.345.678-5`.
///
/// # Returns
///
/// The normalized identifier, e.g. `123456785`. Empty input yields an empty string.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_digit() || *c == 'K')
        .collect()
}

/// Computes the verifier digit for a RUT body.
///
/// Weighted mod-11 sum from the least significant digit with multipliers
/// cycling 2..=7. A result of 11 maps to `0`, 10 maps to `K`.
///
/// # Returns
///
/// `None` when the body is empty or contains a non-digit.
pub fn check_digit(body: &str) -> Option<char> {
    if body.is_empty() {
        return None;
    }

    let mut sum = 0u32;
    let mut multiplier = 2u32;
    for c in body.chars().rev() {
        sum += c.to_digit(10)? * multiplier;
        multiplier = if multiplier == 7 { 2 } else { multiplier + 1 };
    }

    match 11 - (sum % 11) {
        11 => Some('0'),
        10 => Some('K'),
        d => char::from_digit(d, 10),
    }
}

/// Returns whether the candidate is a well-formed RUT with a matching verifier.
pub fn validate(candidate: &str) -> bool {
    let normalized = normalize(candidate);
    if normalized.len() < MIN_RUT_LEN {
        return false;
    }

    let (body, supplied) = normalized.split_at(normalized.len() - 1);
    match (check_digit(body), supplied.chars().next()) {
        (Some(expected), Some(supplied)) => expected == supplied,
        _ => false,
    }
}

/// Masks a normalized RUT for logs, keeping the last four body digits and the verifier.
pub fn mask(rut: &str) -> String {
    let chars: Vec<char> = rut.chars().collect();
    if chars.len() <= 5 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 5..chars.len() - 1].iter().collect();
    format!("****{}-{}", visible, chars[chars.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_uppercases() {
        assert_eq!(normalize("12.345.678-5"), "123456785");
        assert_eq!(normalize(" 15.345.678-k "), "15345678K");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("RUN: 7.654.321-6"), "76543216");
    }

    #[test]
    fn check_digit_matches_known_table() {
        let table = [
            ("12345678", '5'),
            ("11111111", '1'),
            ("7654321", '6'),
            ("10000013", 'K'),
            ("15345678", 'K'),
            ("10000004", '0'),
            ("20123456", '5'),
            ("16432718", '3'),
            ("22222222", '2'),
            ("6543210", '2'),
        ];
        for (body, expected) in table {
            assert_eq!(check_digit(body), Some(expected), "body {}", body);
        }
    }

    #[test]
    fn check_digit_rejects_non_digit_bodies() {
        assert_eq!(check_digit(""), None);
        assert_eq!(check_digit("1234K678"), None);
    }

    #[test]
    fn validate_is_stable_under_noise() {
        for noisy in ["12.345.678-5", "12345678-5", " 12 345 678 - 5 ", "12.345.678.5", "12345678 5"] {
            assert!(validate(noisy), "{}", noisy);
            assert!(validate(&normalize(noisy)), "{}", noisy);
        }
        assert!(validate("15.345.678-k"));
    }

    #[test]
    fn validate_rejects_wrong_verifier_and_short_input() {
        assert!(!validate("12.345.678-4"));
        assert!(!validate("987654321"));
        assert!(!validate("1234-5"));
        assert!(!validate(""));
    }

    #[test]
    fn mask_hides_leading_digits() {
        assert_eq!(mask("123456785"), "****5678-5");
        assert_eq!(mask("12"), "**");
    }
}
