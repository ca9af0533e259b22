//! Date fragment builder
//!
//! A partial date expands to the instant range it covers: `2013` is
//! `[2013-01-01T00:00:00Z, 2014-01-01T00:00:00Z)`. Prefixes compare the
//! stored instant against that range.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};

use super::SearchPrefix;
use crate::db::search::fragment::QueryFragment;
use crate::db::search::registry::SearchParamDescriptor;
use crate::{Error, Result};

/// The half-open instant range `[start, end)` a search date covers,
/// widened to the value's precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateValueRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parse a FHIR search date (`2013`, `2013-05`, `2013-05-17`,
/// `2013-05-17T10:30:00Z`) into its covered range. Timestamps without a
/// zone offset are taken as UTC.
pub fn parse_date_value(value: &str) -> Result<DateValueRange> {
    let invalid = || Error::InvalidParameter(format!("invalid date value '{value}'"));

    if value.contains('T') {
        let start = if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            dt.with_timezone(&Utc)
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
            Utc.from_utc_datetime(&naive)
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
            return Ok(DateValueRange {
                start: Utc.from_utc_datetime(&naive),
                end: Utc.from_utc_datetime(&naive) + chrono::Duration::minutes(1),
            });
        } else {
            return Err(invalid());
        };
        return Ok(DateValueRange {
            start,
            end: start + chrono::Duration::seconds(1),
        });
    }

    let parts: Vec<&str> = value.split('-').collect();
    match parts.as_slice() {
        [year] => {
            let y: i32 = year.parse().map_err(|_| invalid())?;
            if year.len() != 4 {
                return Err(invalid());
            }
            let start = ymd_start(y, 1, 1).ok_or_else(invalid)?;
            let end = ymd_start(y + 1, 1, 1).ok_or_else(invalid)?;
            Ok(DateValueRange { start, end })
        }
        [year, month] => {
            let y: i32 = year.parse().map_err(|_| invalid())?;
            let m: u32 = month.parse().map_err(|_| invalid())?;
            let start = ymd_start(y, m, 1).ok_or_else(invalid)?;
            let (ny, nm) = if m == 12 { (y + 1, 1) } else { (y, m + 1) };
            let end = ymd_start(ny, nm, 1).ok_or_else(invalid)?;
            Ok(DateValueRange { start, end })
        }
        [year, month, day] => {
            let y: i32 = year.parse().map_err(|_| invalid())?;
            let m: u32 = month.parse().map_err(|_| invalid())?;
            let d: u32 = day.parse().map_err(|_| invalid())?;
            let start = ymd_start(y, m, d).ok_or_else(invalid)?;
            Ok(DateValueRange {
                start,
                end: start + chrono::Duration::days(1),
            })
        }
        _ => Err(invalid()),
    }
}

fn ymd_start(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    // Reject nonsense years that parse (e.g. "0") before they reach storage
    if date.year() < 1 {
        return None;
    }
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Whether a date value carries an explicit comparison prefix.
pub fn has_explicit_prefix(value: &str) -> bool {
    let (prefix, rest) = SearchPrefix::parse(value);
    prefix != SearchPrefix::Eq || rest.len() != value.len()
}

pub fn build(descriptor: &SearchParamDescriptor, value: &str) -> Result<QueryFragment> {
    let (prefix, date_part) = SearchPrefix::parse(value);
    let range = parse_date_value(date_part)?;

    let fragments = descriptor
        .paths
        .iter()
        .map(|path| range_fragment(path, prefix, range))
        .collect();
    Ok(QueryFragment::any_of(fragments))
}

fn range_fragment(path: &str, prefix: SearchPrefix, range: DateValueRange) -> QueryFragment {
    let (start, start_inclusive, end, end_inclusive) = match prefix {
        SearchPrefix::Eq => (Some(range.start), true, Some(range.end), false),
        // Anywhere outside the covered range, on either side
        SearchPrefix::Ne => {
            return QueryFragment::any_of(vec![
                QueryFragment::DateRange {
                    path: path.to_string(),
                    start: None,
                    start_inclusive: false,
                    end: Some(range.start),
                    end_inclusive: false,
                },
                QueryFragment::DateRange {
                    path: path.to_string(),
                    start: Some(range.end),
                    start_inclusive: true,
                    end: None,
                    end_inclusive: false,
                },
            ])
        }
        SearchPrefix::Ge => (Some(range.start), true, None, false),
        // Strictly after the covered range: instants at or past its end
        SearchPrefix::Gt => (Some(range.end), true, None, false),
        SearchPrefix::Lt => (None, false, Some(range.start), false),
        SearchPrefix::Le => (None, false, Some(range.end), false),
    };
    QueryFragment::DateRange {
        path: path.to_string(),
        start,
        start_inclusive,
        end,
        end_inclusive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::search::registry::lookup;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn year_expands_to_full_year() {
        let r = parse_date_value("2013").unwrap();
        assert_eq!(r.start, utc("2013-01-01T00:00:00Z"));
        assert_eq!(r.end, utc("2014-01-01T00:00:00Z"));
    }

    #[test]
    fn month_expands_to_full_month() {
        let r = parse_date_value("2013-12").unwrap();
        assert_eq!(r.start, utc("2013-12-01T00:00:00Z"));
        assert_eq!(r.end, utc("2014-01-01T00:00:00Z"));
    }

    #[test]
    fn day_expands_to_one_day() {
        let r = parse_date_value("2013-05-17").unwrap();
        assert_eq!(r.end, utc("2013-05-18T00:00:00Z"));
    }

    #[test]
    fn instant_without_zone_is_utc() {
        let r = parse_date_value("2013-05-17T10:30:00").unwrap();
        assert_eq!(r.start, utc("2013-05-17T10:30:00Z"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_date_value("not-a-date").is_err());
        assert!(parse_date_value("2013-13").is_err());
        assert!(parse_date_value("2013-02-30").is_err());
    }

    #[test]
    fn ge_prefix_keeps_range_start() {
        let def = lookup("Patient", "birthdate").unwrap();
        let frag = build(def, "ge1980").unwrap();
        match frag {
            QueryFragment::DateRange {
                start, end, path, ..
            } => {
                assert_eq!(path, "birthDate");
                assert_eq!(start, Some(utc("1980-01-01T00:00:00Z")));
                assert_eq!(end, None);
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn ne_prefix_excludes_the_covered_range() {
        let def = lookup("Patient", "birthdate").unwrap();
        let frag = build(def, "ne1980").unwrap();
        match frag {
            QueryFragment::Disjunction(sides) => {
                assert_eq!(sides.len(), 2);
                match (&sides[0], &sides[1]) {
                    (
                        QueryFragment::DateRange {
                            start: None,
                            end: Some(before),
                            end_inclusive: false,
                            ..
                        },
                        QueryFragment::DateRange {
                            start: Some(after),
                            start_inclusive: true,
                            end: None,
                            ..
                        },
                    ) => {
                        assert_eq!(*before, utc("1980-01-01T00:00:00Z"));
                        assert_eq!(*after, utc("1981-01-01T00:00:00Z"));
                    }
                    other => panic!("unexpected sides: {other:?}"),
                }
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn gt_prefix_starts_after_covered_range() {
        let def = lookup("Patient", "birthdate").unwrap();
        let frag = build(def, "gt1980").unwrap();
        match frag {
            QueryFragment::DateRange { start, .. } => {
                assert_eq!(start, Some(utc("1981-01-01T00:00:00Z")));
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }
}
