//! Strict digit normalisation for tariff codes
//!
//! National tariff codes are exactly 10 digits, HS subheadings exactly 6 and
//! the two national sub-classification columns exactly 2. Printed codes carry
//! formatting separators ("0101.21 00 10", "8471-30"), which are removed.
//! Nothing is ever padded or truncated: an input that does not reduce to the
//! exact target length is rejected.

/// Characters tolerated as formatting inside a printed code
fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '.' | '-' | '\u{a0}' | '\t')
}

/// Reduce `raw` to exactly `len` digits, or reject it
///
/// Only separators are removed; any other non-digit character rejects the
/// input, so "8471a0" does not silently become "84710".
pub fn normalize_strict(raw: &str, len: usize) -> Option<String> {
    let mut digits = String::with_capacity(len);
    for c in raw.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !is_separator(c) {
            return None;
        }
    }

    if digits.len() == len {
        Some(digits)
    } else {
        None
    }
}

/// Normalise a national tariff code (10 digits)
///
/// # Examples
///
/// ```
/// use douane_domain::normalize10_strict;
///
/// assert_eq!(normalize10_strict("0101.21 00 10").as_deref(), Some("0101210010"));
/// assert_eq!(normalize10_strict("01012100"), None);
/// ```
pub fn normalize10_strict(raw: &str) -> Option<String> {
    normalize_strict(raw, 10)
}

/// Normalise an HS subheading (6 digits)
pub fn normalize6_strict(raw: &str) -> Option<String> {
    normalize_strict(raw, 6)
}

/// Normalise one national sub-classification column (2 digits)
pub fn normalize2_strict(raw: &str) -> Option<String> {
    normalize_strict(raw, 2)
}

/// Keep only the ASCII digits of a printed code
///
/// Unlike the strict variants this never rejects; it is used for
/// deduplication keys where the printed form varies.
pub fn code_clean(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}
