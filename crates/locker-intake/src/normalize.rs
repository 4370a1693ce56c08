/// Normalizes a scanned card UID to uppercase hex with no separators, so the
/// same physical card always produces the same `owner_key` regardless of
/// how the reader formats it (`"a1:b2-c3"`, `"a1 b2 c3"`, ...).
pub fn normalize_uid(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

/// QR/device inputs are already an opaque hash — passed through unchanged
/// except for trimming incidental whitespace from the scanner.
pub fn normalize_device_hash(raw: &str) -> String {
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_and_upcases() {
        assert_eq!(normalize_uid("a1:b2-c3 d4"), "A1B2C3D4");
    }

    #[test]
    fn already_normalized_uid_is_unchanged() {
        assert_eq!(normalize_uid("04A2B9F1"), "04A2B9F1");
    }

    #[test]
    fn device_hash_is_trimmed_not_reformatted() {
        assert_eq!(normalize_device_hash("  Ab3-Xyz  "), "Ab3-Xyz");
    }
}
