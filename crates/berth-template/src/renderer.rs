//! Placeholder rendering
//!
//! Substitution is safe: `$NAME` and `${NAME}` are replaced only when `NAME`
//! has a value. Everything else that looks like a placeholder is copied
//! through untouched, so shell fragments such as `$HOME` or `$5` survive.
//! `$$` is the escape for a literal `$`.

use berth_common::yaml::dump_documents;
use berth_common::{Error, Result};
use serde_json::Value;

use crate::model::Values;

/// Render manifest documents into a YAML stream with placeholders replaced
pub fn render(documents: &[Value], values: &Values) -> Result<String> {
    let text = dump_documents(documents)
        .map_err(|e| Error::internal_with_context("render", e.to_string()))?;
    Ok(substitute(&text, values))
}

/// Replace known placeholders in `text`.
///
/// Identifiers are matched greedily (`[_A-Za-z][_A-Za-z0-9]*`), so `$NAMESPACE`
/// is never read as `$NAME` followed by `SPACE`.
pub fn substitute(text: &str, values: &Values) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        out.push_str(&text[copied..i]);

        match bytes.get(i + 1) {
            Some(b'$') => {
                out.push('$');
                i += 2;
            }
            Some(b'{') => {
                let start = i + 2;
                let end = start + identifier_len(&bytes[start..]);
                let closed = end > start && bytes.get(end) == Some(&b'}');
                match closed.then(|| values.get(&text[start..end])).flatten() {
                    Some(value) => {
                        out.push_str(value);
                        i = end + 1;
                    }
                    None => {
                        out.push('$');
                        i += 1;
                    }
                }
            }
            Some(_) => {
                let start = i + 1;
                let end = start + identifier_len(&bytes[start..]);
                match (end > start).then(|| values.get(&text[start..end])).flatten() {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&text[i..end]),
                }
                i = end.max(i + 1);
            }
            None => {
                out.push('$');
                i += 1;
            }
        }
        copied = i;
    }

    out.push_str(&text[copied..]);
    out
}

/// Escape literal `$` so that substitution leaves the text unchanged
pub fn escape(text: &str) -> String {
    text.replace('$', "$$")
}

fn identifier_len(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => bytes
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count(),
        _ => 0,
    }
}
