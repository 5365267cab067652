//! Lenient parsing of model output into raw author entries.
//!
//! The model is asked for `{"authors": [{"name", "title", "email"}, ...]}`
//! but may surround it with prose, code fences or a second object. The
//! parser takes the first balanced `{ ... }` block, ignoring braces inside
//! string literals, and validates its shape explicitly instead of trusting
//! field presence.

use crate::error::ParseError;
use serde_json::Value;
use tracing::debug;

/// One `authors[]` entry exactly as the model reported it, before cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAuthor {
    pub name: String,
    pub title: Option<String>,
    pub email: Option<String>,
}

/// Parse raw model text into author entries.
///
/// Entries that are not JSON objects are skipped. A missing or non-array
/// `authors` key is a [`ParseError::SchemaMismatch`].
pub fn parse_authors(text: &str) -> Result<Vec<RawAuthor>, ParseError> {
    let block = first_json_object(text).ok_or(ParseError::NoJsonObject)?;
    let value: Value =
        serde_json::from_str(block).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let authors = value
        .get("authors")
        .ok_or_else(|| ParseError::SchemaMismatch("missing 'authors' key".into()))?
        .as_array()
        .ok_or_else(|| ParseError::SchemaMismatch("'authors' is not an array".into()))?;

    let mut out = Vec::with_capacity(authors.len());
    for entry in authors {
        let Some(obj) = entry.as_object() else {
            debug!("Skipping non-object author entry: {}", entry);
            continue;
        };
        out.push(RawAuthor {
            name: string_field(obj.get("name")).unwrap_or_default(),
            title: string_field(obj.get("title")),
            email: string_field(obj.get("email")),
        });
    }
    Ok(out)
}

fn string_field(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Byte slice of the first balanced `{ ... }` block in `text`.
///
/// Braces inside double-quoted strings (with `\"` escapes) do not count.
/// Returns `None` when no block closes.
pub fn first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = text.find('{')?;

    loop {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..=start + offset]);
                    }
                }
                _ => {}
            }
        }

        // Unclosed from this brace; try the next opening brace.
        start = start + 1 + text[start + 1..].find('{')?;
    }
}
