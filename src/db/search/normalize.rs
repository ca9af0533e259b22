//! String normalization for case- and accent-insensitive search

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a string value for default string search: NFKD decompose,
/// drop combining marks, lowercase. "Évêque" and "eveque" compare equal
/// after normalization.
pub fn normalize_for_search(value: &str) -> String {
    value
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .collect()
}
