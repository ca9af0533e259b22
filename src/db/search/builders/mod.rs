//! Fragment builders, one per search parameter type
//!
//! Each builder turns a single (already unescaped) search value into a
//! `QueryFragment` using the registry descriptor. Multi-value OR and
//! must/must-not placement happen in the assembler.

pub mod date;
pub mod number;
pub mod reference;
pub mod string;
pub mod token;

/// Comparison prefix on date and number values. `sa`/`eb` (starts
/// after / ends before) collapse to strict comparisons because only
/// point-valued elements are searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPrefix {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl SearchPrefix {
    /// Strip a leading prefix from a search value. Values without a
    /// recognized prefix are implicit `eq`.
    pub fn parse(value: &str) -> (SearchPrefix, &str) {
        if value.len() < 2 {
            return (SearchPrefix::Eq, value);
        }
        match &value[..2] {
            "eq" => (SearchPrefix::Eq, &value[2..]),
            "ne" => (SearchPrefix::Ne, &value[2..]),
            "gt" | "sa" => (SearchPrefix::Gt, &value[2..]),
            "ge" => (SearchPrefix::Ge, &value[2..]),
            "lt" | "eb" => (SearchPrefix::Lt, &value[2..]),
            "le" => (SearchPrefix::Le, &value[2..]),
            _ => (SearchPrefix::Eq, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_prefixes() {
        assert_eq!(SearchPrefix::parse("ge2013"), (SearchPrefix::Ge, "2013"));
        assert_eq!(SearchPrefix::parse("lt5.4"), (SearchPrefix::Lt, "5.4"));
        assert_eq!(SearchPrefix::parse("sa2013"), (SearchPrefix::Gt, "2013"));
        assert_eq!(SearchPrefix::parse("ne1980"), (SearchPrefix::Ne, "1980"));
    }

    #[test]
    fn no_prefix_is_implicit_eq() {
        assert_eq!(SearchPrefix::parse("2013"), (SearchPrefix::Eq, "2013"));
        assert_eq!(SearchPrefix::parse("5"), (SearchPrefix::Eq, "5"));
    }
}
