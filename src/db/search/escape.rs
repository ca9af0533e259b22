//! FHIR search value escaping
//!
//! Search values use `\` to escape the delimiters `,` `|` `$` and the
//! backslash itself, so a literal comma can appear inside an OR value.

/// Split `value` on `delimiter`, honoring backslash escapes. The escape
/// characters are preserved in the returned segments; callers unescape
/// each segment separately.
pub fn split_unescaped(value: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == delimiter {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

/// Remove FHIR escapes from a search value segment. `\,` `\|` `\$` `\\`
/// become the literal character; a backslash before anything else is
/// kept as-is.
pub fn unescape_search_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next @ (',' | '|' | '$' | '\\')) => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_unescaped_commas() {
        assert_eq!(split_unescaped("a,b,c", ','), vec!["a", "b", "c"]);
    }

    #[test]
    fn escaped_comma_stays_in_segment() {
        assert_eq!(
            split_unescaped("Smith\\, Jr,Jones", ','),
            vec!["Smith\\, Jr", "Jones"]
        );
    }

    #[test]
    fn trailing_delimiter_yields_empty_segment() {
        assert_eq!(split_unescaped("a,", ','), vec!["a", ""]);
    }

    #[test]
    fn unescapes_delimiters() {
        assert_eq!(unescape_search_value("Smith\\, Jr"), "Smith, Jr");
        assert_eq!(unescape_search_value("a\\|b"), "a|b");
        assert_eq!(unescape_search_value("5\\$"), "5$");
        assert_eq!(unescape_search_value("c:\\\\tmp"), "c:\\tmp");
    }

    #[test]
    fn unknown_escape_is_preserved() {
        assert_eq!(unescape_search_value("a\\nb"), "a\\nb");
    }
}
