//! Number fragment builder
//!
//! Implicit `eq` honors the value's precision: `value-quantity=5.4`
//! matches `[5.35, 5.45)`. Explicit prefixes compare against the value
//! itself.

use rust_decimal::Decimal;
use std::str::FromStr;

use super::SearchPrefix;
use crate::db::search::fragment::QueryFragment;
use crate::db::search::registry::SearchParamDescriptor;
use crate::{Error, Result};

pub fn parse_number(value: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|_| Error::InvalidParameter(format!("invalid number value '{value}'")))
}

/// Half of the last significant digit: 0.05 for "5.4", 0.5 for "5".
fn half_precision(value: Decimal) -> Decimal {
    Decimal::new(5, value.scale() + 1)
}

pub fn build(descriptor: &SearchParamDescriptor, value: &str) -> Result<QueryFragment> {
    let (prefix, number_part) = SearchPrefix::parse(value);
    let number = parse_number(number_part)?;

    let fragments = descriptor
        .paths
        .iter()
        .map(|path| range_fragment(path, prefix, number))
        .collect();
    Ok(QueryFragment::any_of(fragments))
}

fn range_fragment(path: &str, prefix: SearchPrefix, number: Decimal) -> QueryFragment {
    let (low, low_inclusive, high, high_inclusive) = match prefix {
        SearchPrefix::Eq => {
            let half = half_precision(number);
            (Some(number - half), true, Some(number + half), false)
        }
        // Either side of the precision-widened range
        SearchPrefix::Ne => {
            let half = half_precision(number);
            return QueryFragment::any_of(vec![
                QueryFragment::NumberRange {
                    path: path.to_string(),
                    low: None,
                    low_inclusive: false,
                    high: Some(number - half),
                    high_inclusive: false,
                },
                QueryFragment::NumberRange {
                    path: path.to_string(),
                    low: Some(number + half),
                    low_inclusive: true,
                    high: None,
                    high_inclusive: false,
                },
            ]);
        }
        SearchPrefix::Gt => (Some(number), false, None, false),
        SearchPrefix::Ge => (Some(number), true, None, false),
        SearchPrefix::Lt => (None, false, Some(number), false),
        SearchPrefix::Le => (None, false, Some(number), true),
    };

    QueryFragment::NumberRange {
        path: path.to_string(),
        low,
        low_inclusive,
        high,
        high_inclusive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::search::registry::lookup;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn implicit_eq_widens_by_precision() {
        let def = lookup("Observation", "value-quantity").unwrap();
        match build(def, "5.4").unwrap() {
            QueryFragment::NumberRange {
                low,
                high,
                low_inclusive,
                high_inclusive,
                ..
            } => {
                assert_eq!(low, Some(dec("5.35")));
                assert_eq!(high, Some(dec("5.45")));
                assert!(low_inclusive);
                assert!(!high_inclusive);
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn integer_precision_is_wider() {
        let def = lookup("Observation", "value-quantity").unwrap();
        match build(def, "100").unwrap() {
            QueryFragment::NumberRange { low, high, .. } => {
                assert_eq!(low, Some(dec("99.5")));
                assert_eq!(high, Some(dec("100.5")));
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn gt_is_a_strict_bound() {
        let def = lookup("Observation", "value-quantity").unwrap();
        match build(def, "gt7.2").unwrap() {
            QueryFragment::NumberRange {
                low,
                low_inclusive,
                high,
                ..
            } => {
                assert_eq!(low, Some(dec("7.2")));
                assert!(!low_inclusive);
                assert_eq!(high, None);
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn ne_excludes_the_widened_range() {
        let def = lookup("Observation", "value-quantity").unwrap();
        match build(def, "ne5.4").unwrap() {
            QueryFragment::Disjunction(sides) => {
                assert_eq!(sides.len(), 2);
                match (&sides[0], &sides[1]) {
                    (
                        QueryFragment::NumberRange {
                            low: None,
                            high: Some(below),
                            high_inclusive: false,
                            ..
                        },
                        QueryFragment::NumberRange {
                            low: Some(above),
                            low_inclusive: true,
                            high: None,
                            ..
                        },
                    ) => {
                        assert_eq!(*below, dec("5.35"));
                        assert_eq!(*above, dec("5.45"));
                    }
                    other => panic!("unexpected sides: {other:?}"),
                }
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric() {
        let def = lookup("Observation", "value-quantity").unwrap();
        assert!(build(def, "tall").is_err());
    }
}
