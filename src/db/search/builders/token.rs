//! Token fragment builder
//!
//! Token values are `code`, `system|code`, `system|` or `|code`. The
//! descriptor's token kind decides which document fields the parts map
//! to. An unrecognized modifier degrades to a plain text match on the
//! element's text field rather than failing the request.

use crate::db::search::escape::{split_unescaped, unescape_search_value};
use crate::db::search::fragment::QueryFragment;
use crate::db::search::normalize::normalize_for_search;
use crate::db::search::registry::{SearchParamDescriptor, TokenKind};
use crate::{Error, Result};

#[derive(Debug, PartialEq)]
struct TokenValue {
    system: SystemMatch,
    code: Option<String>,
}

/// How the system half of a token constrains matches. `code` leaves the
/// system unconstrained; `|code` requires it to be absent or empty.
#[derive(Debug, PartialEq)]
enum SystemMatch {
    Any,
    Absent,
    Is(String),
}

fn parse_token(value: &str) -> Result<TokenValue> {
    let parts = split_unescaped(value, '|');
    let token = match parts.as_slice() {
        [code] => TokenValue {
            system: SystemMatch::Any,
            code: non_empty(code),
        },
        [system, code] => TokenValue {
            system: if system.is_empty() {
                SystemMatch::Absent
            } else {
                SystemMatch::Is(unescape_search_value(system))
            },
            code: non_empty(code),
        },
        _ => {
            return Err(Error::InvalidParameter(format!(
                "invalid token value '{value}'"
            )))
        }
    };
    if token.code.is_none() && !matches!(token.system, SystemMatch::Is(_)) {
        return Err(Error::InvalidParameter(format!(
            "empty token value '{value}'"
        )));
    }
    Ok(token)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(unescape_search_value(s))
    }
}

pub fn build(
    descriptor: &SearchParamDescriptor,
    modifier: Option<&str>,
    value: &str,
) -> Result<QueryFragment> {
    if let Some(m) = modifier {
        return Ok(text_fallback(descriptor, value, m));
    }

    let token = parse_token(value)?;
    let fragments = descriptor
        .paths
        .iter()
        .map(|path| path_fragment(path, descriptor.token_kind, &token))
        .collect();
    Ok(QueryFragment::any_of(fragments))
}

fn path_fragment(path: &str, kind: TokenKind, token: &TokenValue) -> QueryFragment {
    let (system_field, code_field) = match kind {
        TokenKind::Primitive => (None, path.to_string()),
        TokenKind::Coding => (Some(format!("{path}.system")), format!("{path}.code")),
        TokenKind::SystemValue => (Some(format!("{path}.system")), format!("{path}.value")),
    };

    let mut parts = Vec::new();
    if let Some(field) = system_field {
        match &token.system {
            SystemMatch::Any => {}
            SystemMatch::Absent => parts.push(QueryFragment::Missing { path: field }),
            SystemMatch::Is(system) => parts.push(QueryFragment::Term {
                path: field,
                value: system.clone(),
            }),
        }
    }
    if let Some(code) = &token.code {
        parts.push(QueryFragment::Term {
            path: code_field,
            value: code.clone(),
        });
    }
    QueryFragment::all_of(parts)
}

/// Unknown modifiers match the element's human-readable text instead of
/// erroring out.
fn text_fallback(descriptor: &SearchParamDescriptor, value: &str, modifier: &str) -> QueryFragment {
    tracing::debug!(
        code = descriptor.code,
        modifier,
        "token modifier not recognized, matching element text"
    );
    let normalized = normalize_for_search(&unescape_search_value(value));
    let fragments = descriptor
        .paths
        .iter()
        .map(|path| {
            let text_path = match path.strip_suffix(".coding") {
                Some(parent) => format!("{parent}.text"),
                None => format!("{path}.text"),
            };
            QueryFragment::Prefix {
                path: text_path,
                value: normalized.clone(),
            }
        })
        .collect();
    QueryFragment::any_of(fragments)
}
