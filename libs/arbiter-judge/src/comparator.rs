/// Output Comparator - decides whether actual output matches expected
///
/// **Modes:**
/// - EXACT: trim both sides, then byte-for-byte equality
/// - FLOAT: parse both trimmed sides as decimals, equal within epsilon;
///   anything unparsable compares unequal
/// - IGNORE_WHITESPACE: collapse whitespace runs to one space, trim, compare
///
/// Blank output counts as absent: two absent outputs match in every mode,
/// one absent output never matches.
use arbiter_common::types::{ComparisonMode, DEFAULT_EPSILON};

/// Compare actual against expected output under `mode`
pub fn compare(actual: &str, expected: &str, mode: ComparisonMode, epsilon: Option<f64>) -> bool {
    match mode {
        ComparisonMode::Exact => actual.trim() == expected.trim(),
        ComparisonMode::Float => compare_float(actual, expected, epsilon.unwrap_or(DEFAULT_EPSILON)),
        ComparisonMode::IgnoreWhitespace => collapse_whitespace(actual) == collapse_whitespace(expected),
    }
}

/// `None` for output that is empty once trimmed
pub fn present(text: &str) -> Option<&str> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Null-aware comparison: two missing outputs are equal, one missing is not
pub fn compare_optional(
    actual: Option<&str>,
    expected: Option<&str>,
    mode: ComparisonMode,
    epsilon: Option<f64>,
) -> bool {
    match (actual, expected) {
        (None, None) => true,
        (Some(a), Some(e)) => compare(a, e, mode, epsilon),
        _ => false,
    }
}

fn compare_float(actual: &str, expected: &str, epsilon: f64) -> bool {
    let (Ok(a), Ok(e)) = (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) else {
        return false;
    };
    if a.is_nan() || e.is_nan() {
        return false;
    }
    if a == e {
        return true;
    }
    (a - e).abs() <= epsilon
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
