//! Substring and regex query construction.
//!
//! Converts a list of raw substrings into one query string in the remote
//! service's Lucene-style grammar:
//!
//! | Mode | Term | Escaping |
//! |------|------|----------|
//! | substring | `*<escaped>*` | reserved characters backslash-escaped |
//! | regex | `/.*<fragment>.*/` | none, the caller supplies valid regex |
//!
//! Terms keep input order and are joined with ` AND ` or ` OR `. Regex terms
//! are evaluated per document by the search backend and are far slower than
//! wildcard terms on large sketches.

use crate::error::{Result, TimesketchError};
use crate::models::BooleanOperator;

/// Single characters that must be escaped in a wildcard term.
const RESERVED_CHARS: &[char] = &[
    '+', '-', '=', '>', '<', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':',
    '\\', '/',
];

/// Two-character operators that must be escaped as a unit.
const RESERVED_PAIRS: &[&str] = &["&&", "||"];

/// Escape every reserved token in `raw` with a single preceding backslash.
///
/// `&&` and `||` are escaped as pairs (`\&&`, `\||`); a lone `&` or `|` is
/// not reserved and passes through.
pub fn escape_reserved(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 2);
    let mut rest = raw;

    while let Some(c) = rest.chars().next() {
        if let Some(pair) = RESERVED_PAIRS.iter().find(|p| rest.starts_with(**p)) {
            out.push('\\');
            out.push_str(pair);
            rest = &rest[pair.len()..];
            continue;
        }
        if RESERVED_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}

/// Build a query matching events that contain the given substrings.
///
/// `operator` must be `"AND"` or `"OR"`. Empty substrings are skipped.
///
/// # Errors
///
/// [`TimesketchError::InvalidInput`] when `substrings` is empty, when every
/// substring is empty, or when `operator` is not `AND`/`OR`.
pub fn build_substring_query(substrings: &[String], regex: bool, operator: &str) -> Result<String> {
    build_scoped_substring_query(substrings, regex, operator, None)
}

/// Like [`build_substring_query`], with every term restricted to `field`.
pub fn build_scoped_substring_query(
    substrings: &[String],
    regex: bool,
    operator: &str,
    field: Option<&str>,
) -> Result<String> {
    if substrings.is_empty() {
        return Err(TimesketchError::InvalidInput(
            "substrings must not be empty".to_string(),
        ));
    }
    let operator: BooleanOperator = operator.parse()?;

    let terms: Vec<String> = substrings
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| {
            let pattern = if regex {
                format!("/.*{}.*/", s)
            } else {
                format!("*{}*", escape_reserved(s))
            };
            match field {
                Some(f) if !f.is_empty() => format!("{}:{}", f, pattern),
                _ => pattern,
            }
        })
        .collect();

    if terms.is_empty() {
        return Err(TimesketchError::InvalidInput(
            "substrings must contain at least one non-empty value".to_string(),
        ));
    }

    Ok(terms.join(&format!(" {} ", operator)))
}

/// Exact-match query on one field, quoting the value.
///
/// Used to select all events of a data type (`data_type:"syslog:line"`).
pub fn field_equals_query(field: &str, value: &str) -> String {
    let quoted = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("{}:\"{}\"", field, quoted)
}
