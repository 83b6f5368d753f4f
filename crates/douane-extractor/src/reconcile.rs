//! Tabular field reconciliation
//!
//! Tariff PDFs print the duty rate and the unit of quantity in adjacent
//! cells, and a model reading the rendered page regularly puts one in the
//! other's slot. The two national sub-classification columns are similarly
//! ambiguous when one of them is `00`. These functions undo the first
//! confusion and document (without guessing) the second.

use douane_domain::normalize2_strict;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::debug;

/// Samples kept by [`SwapDiagnostics`]
pub const MAX_SWAP_SAMPLES: usize = 10;

static UNIT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]{1,5}\d{0,2}$").expect("unit token pattern should compile")
});

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+([.,]\d+)?\s*%?$").expect("numeric pattern should compile")
});

static FOOTNOTE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*([A-Za-z])\s*\)").expect("footnote marker pattern should compile")
});

/// Unit abbreviations that do not fit the letters-then-digits shape
const KNOWN_UNITS: &[&str] = &[
    "p/st", "1000 u", "100 u", "1000 kg", "100 kg", "kg net", "kg/net", "l alc", "l alc 100%",
    "ct/l", "1000 kwh", "1000 m3", "m²", "m³", "kg 90% sdt", "kg n", "carats",
];

/// Output of [`fix_rate_unit_swap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateUnitFix {
    /// Value for the duty rate slot
    pub duty_rate: Option<String>,
    /// Value for the unit slot
    pub unit_norm: Option<String>,
    /// Whether the two were exchanged
    pub swapped: bool,
}

/// Whether a cell holds only a dash placeholder (`-`, `--`, `–`, `—`)
pub fn is_placeholder(value: &str) -> bool {
    matches!(value.trim(), "-" | "--" | "\u{2013}" | "\u{2014}")
}

fn is_unit_like(value: &str) -> bool {
    let v = value.trim();
    is_placeholder(v)
        || UNIT_TOKEN.is_match(v)
        || KNOWN_UNITS.iter().any(|u| u.eq_ignore_ascii_case(v))
}

/// Whether a cell holds a rate such as `2,5`, `17.5 %` or `10 (a)`
pub fn is_numeric_rate(value: &str) -> bool {
    let without_marker = FOOTNOTE_MARKER.replace_all(value, "");
    NUMERIC.is_match(without_marker.trim())
}

/// Put a transposed rate/unit pair back in order
///
/// Swaps when the rate slot holds a unit token (or a dash placeholder) and
/// the unit slot holds a number, or when the rate slot is empty and the unit
/// slot holds a number. Anything else is returned unchanged, so applying the
/// function to its own output never swaps again.
///
/// # Examples
///
/// ```
/// use douane_extractor::reconcile::fix_rate_unit_swap;
///
/// let fix = fix_rate_unit_swap(Some("kg"), Some("17,5"));
/// assert!(fix.swapped);
/// assert_eq!(fix.duty_rate.as_deref(), Some("17,5"));
/// assert_eq!(fix.unit_norm.as_deref(), Some("kg"));
///
/// let again = fix_rate_unit_swap(fix.duty_rate.as_deref(), fix.unit_norm.as_deref());
/// assert!(!again.swapped);
/// ```
pub fn fix_rate_unit_swap(duty_rate: Option<&str>, unit_norm: Option<&str>) -> RateUnitFix {
    let rate = duty_rate.map(str::trim).filter(|s| !s.is_empty());
    let unit = unit_norm.map(str::trim).filter(|s| !s.is_empty());

    let unit_is_number = unit.is_some_and(is_numeric_rate);
    let swapped = unit_is_number
        && match rate {
            None => true,
            Some(r) => is_unit_like(r),
        };

    if swapped {
        RateUnitFix {
            duty_rate: unit.map(str::to_string),
            unit_norm: rate.map(str::to_string),
            swapped: true,
        }
    } else {
        RateUnitFix {
            duty_rate: rate.map(str::to_string),
            unit_norm: unit.map(str::to_string),
            swapped: false,
        }
    }
}

/// One recorded swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapSample {
    /// Page of the row
    pub page: u32,
    /// Rate slot before the swap
    pub rate_before: Option<String>,
    /// Unit slot before the swap
    pub unit_before: Option<String>,
}

/// Count of swaps with a bounded sample list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapDiagnostics {
    /// Swaps applied
    pub swap_count: usize,
    /// First [`MAX_SWAP_SAMPLES`] swaps
    pub samples: Vec<SwapSample>,
}

impl SwapDiagnostics {
    /// Record a swap decision
    pub fn record(&mut self, page: u32, rate_before: Option<&str>, unit_before: Option<&str>) {
        self.swap_count += 1;
        debug!(
            page,
            rate_before = rate_before.unwrap_or(""),
            unit_before = unit_before.unwrap_or(""),
            "rate/unit swap applied"
        );
        if self.samples.len() < MAX_SWAP_SAMPLES {
            self.samples.push(SwapSample {
                page,
                rate_before: rate_before.map(str::to_string),
                unit_before: unit_before.map(str::to_string),
            });
        }
    }
}

/// Footnote letter attached to a rate, e.g. `a` in `2,5 (a)`
pub fn footnote_marker(raw: &str) -> Option<String> {
    FOOTNOTE_MARKER
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Parse a printed rate into a percentage
///
/// Strips `%` and footnote markers and accepts a comma decimal separator.
/// Anything else yields `None`.
///
/// # Examples
///
/// ```
/// use douane_extractor::reconcile::parse_rate;
///
/// assert_eq!(parse_rate("2,5 %"), Some(2.5));
/// assert_eq!(parse_rate("17.5(a)"), Some(17.5));
/// assert_eq!(parse_rate("ex"), None);
/// ```
pub fn parse_rate(raw: &str) -> Option<f64> {
    let cleaned = FOOTNOTE_MARKER.replace_all(raw, "");
    let cleaned = cleaned.replace('%', "").replace(',', ".");
    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|r| r.is_finite() && *r >= 0.0)
}

/// Resolved sub-classification pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Col2Col3 {
    /// First national column
    pub col2: String,
    /// Second national column
    pub col3: String,
    /// Always false: the stated order is never reversed
    pub swap_applied: bool,
    /// Why the order was kept
    pub reason: String,
}

/// Resolve the two 2-digit columns that extend an HS position
///
/// Both values must reduce to exactly two digits or the pair is rejected and
/// the caller falls back to inheritance. A valid pair is always kept in the
/// order given: `00` in the first column marks a parent row, and `00` in the
/// second column alone is not evidence of transposition.
///
/// # Examples
///
/// ```
/// use douane_extractor::reconcile::resolve_col2_col3;
///
/// let pair = resolve_col2_col3("350211", "10", "00").unwrap();
/// assert_eq!((pair.col2.as_str(), pair.col3.as_str()), ("10", "00"));
/// assert!(!pair.swap_applied);
/// assert!(resolve_col2_col3("350211", "1", "00").is_none());
/// ```
pub fn resolve_col2_col3(pos6: &str, a: &str, b: &str) -> Option<Col2Col3> {
    let col2 = normalize2_strict(a)?;
    let col3 = normalize2_strict(b)?;

    let reason = if col2 == "00" {
        format!("{}: col2 00 marks a parent row, order kept", pos6)
    } else if col3 == "00" {
        format!(
            "{}: col3 00 without col2 anchor is ambiguous, extractor order trusted",
            pos6
        )
    } else {
        format!("{}: no 00 anchor, extractor order trusted", pos6)
    };

    Some(Col2Col3 {
        col2,
        col3,
        swap_applied: false,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_in_rate_slot_is_swapped() {
        let fix = fix_rate_unit_swap(Some("u"), Some("2,5"));
        assert!(fix.swapped);
        assert_eq!(fix.duty_rate.as_deref(), Some("2,5"));
        assert_eq!(fix.unit_norm.as_deref(), Some("u"));
    }

    #[test]
    fn test_known_unit_is_swapped() {
        let fix = fix_rate_unit_swap(Some("1000 u"), Some("10 %"));
        assert!(fix.swapped);
        assert_eq!(fix.unit_norm.as_deref(), Some("1000 u"));
    }

    #[test]
    fn test_dash_placeholder_moves_to_unit() {
        let fix = fix_rate_unit_swap(Some("-"), Some("40"));
        assert!(fix.swapped);
        assert_eq!(fix.duty_rate.as_deref(), Some("40"));
        assert_eq!(fix.unit_norm.as_deref(), Some("-"));
    }

    #[test]
    fn test_empty_rate_takes_number() {
        for rate in [None, Some(""), Some("  ")] {
            let fix = fix_rate_unit_swap(rate, Some("17,5"));
            assert!(fix.swapped);
            assert_eq!(fix.duty_rate.as_deref(), Some("17,5"));
            assert_eq!(fix.unit_norm, None);
        }
    }

    #[test]
    fn test_ordered_pair_is_untouched() {
        let fix = fix_rate_unit_swap(Some("2,5"), Some("kg"));
        assert!(!fix.swapped);
        assert_eq!(fix.duty_rate.as_deref(), Some("2,5"));
        assert_eq!(fix.unit_norm.as_deref(), Some("kg"));
    }

    #[test]
    fn test_two_numbers_are_untouched() {
        let fix = fix_rate_unit_swap(Some("10"), Some("20"));
        assert!(!fix.swapped);
    }

    #[test]
    fn test_swap_is_idempotent() {
        let inputs = [
            (Some("kg"), Some("2,5")),
            (Some("-"), Some("40")),
            (None, Some("17.5 %")),
            (Some("m2"), Some("10(a)")),
            (Some("2,5"), Some("u")),
            (None, None),
        ];
        for (rate, unit) in inputs {
            let once = fix_rate_unit_swap(rate, unit);
            let twice = fix_rate_unit_swap(once.duty_rate.as_deref(), once.unit_norm.as_deref());
            assert!(!twice.swapped, "swapped twice for {:?}/{:?}", rate, unit);
            assert_eq!(twice.duty_rate, once.duty_rate);
            assert_eq!(twice.unit_norm, once.unit_norm);
        }
    }

    #[test]
    fn test_diagnostics_bounded() {
        let mut diagnostics = SwapDiagnostics::default();
        for page in 0..25 {
            diagnostics.record(page, Some("kg"), Some("2,5"));
        }
        assert_eq!(diagnostics.swap_count, 25);
        assert_eq!(diagnostics.samples.len(), MAX_SWAP_SAMPLES);
        assert_eq!(diagnostics.samples[0].page, 0);
    }

    #[test]
    fn test_placeholders() {
        for p in ["-", "--", "\u{2013}", " \u{2014} "] {
            assert!(is_placeholder(p), "{:?}", p);
        }
        assert!(!is_placeholder("kg"));
        assert!(!is_placeholder(""));
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("2,5"), Some(2.5));
        assert_eq!(parse_rate("40%"), Some(40.0));
        assert_eq!(parse_rate(" 10 ( b ) "), Some(10.0));
        assert_eq!(parse_rate("0"), Some(0.0));
        assert_eq!(parse_rate("-"), None);
        assert_eq!(parse_rate("exempt"), None);
        assert_eq!(parse_rate(""), None);
    }

    #[test]
    fn test_footnote_marker() {
        assert_eq!(footnote_marker("2,5 (a)").as_deref(), Some("a"));
        assert_eq!(footnote_marker("17,5(B)").as_deref(), Some("b"));
        assert_eq!(footnote_marker("10"), None);
    }

    #[test]
    fn test_col2_col3_parent_marker() {
        let pair = resolve_col2_col3("350211", "00", "10").unwrap();
        assert_eq!(pair.col2, "00");
        assert_eq!(pair.col3, "10");
        assert!(!pair.swap_applied);
        assert!(pair.reason.contains("parent row"));
    }

    #[test]
    fn test_col2_col3_trust_extractor_order() {
        let pair = resolve_col2_col3("350211", "10", "00").unwrap();
        assert_eq!(pair.col2, "10");
        assert_eq!(pair.col3, "00");
        assert!(!pair.swap_applied);

        let pair = resolve_col2_col3("350211", "20", "90").unwrap();
        assert_eq!((pair.col2.as_str(), pair.col3.as_str()), ("20", "90"));
        assert!(pair.reason.contains("no 00 anchor"));
    }

    #[test]
    fn test_col2_col3_invalid_length_rejected() {
        assert!(resolve_col2_col3("350211", "1", "00").is_none());
        assert!(resolve_col2_col3("350211", "00", "100").is_none());
        assert!(resolve_col2_col3("350211", "", "").is_none());
        assert!(resolve_col2_col3("350211", "ex", "10").is_none());
    }

    #[test]
    fn test_col2_col3_separators_tolerated() {
        let pair = resolve_col2_col3("350211", " 0 0", "1.0").unwrap();
        assert_eq!((pair.col2.as_str(), pair.col3.as_str()), ("00", "10"));
    }
}
