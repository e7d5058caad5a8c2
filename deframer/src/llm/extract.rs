//! Fuzzy extraction of a JSON value from model output.
//!
//! Models wrap their answer in code fences, prefix it with "json", or chat before and
//! after it. We strip the usual wrappers, jump to the first character that can open a
//! JSON value and decode exactly one value from there, ignoring whatever follows.

use serde_json::Value;

use crate::error::{DeframeError, Result};

/// Helper to extract the first JSON value from text that might contain markdown
/// backticks or preamble.
pub fn extract_json(text: &str) -> Result<Value> {
    let cleaned = clean_input(text);

    let start = find_value_start(cleaned)
        .ok_or_else(|| DeframeError::Extraction("no JSON start found".to_string()))?;
    let candidate = &cleaned[start..];

    let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(DeframeError::Extraction(format!("error decoding JSON: {}", e))),
        None => Err(DeframeError::Extraction("empty JSON candidate".to_string())),
    }
}

fn clean_input(input: &str) -> &str {
    let mut input = input.trim();

    if let Some(rest) = input.strip_prefix("```json") {
        input = rest;
    } else if let Some(rest) = input.strip_prefix("```") {
        input = rest;
    }
    if let Some(rest) = input.strip_suffix("```") {
        input = rest;
    }
    input = input.trim();

    // a bare "json"/"JSON" label, possibly glued to the value
    if input.len() >= 4 && input.is_char_boundary(4) && input[..4].eq_ignore_ascii_case("json") {
        input = &input[4..];
    }

    input.trim()
}

fn find_value_start(text: &str) -> Option<usize> {
    text.char_indices()
        .find(|&(i, c)| match c {
            '{' | '[' | '"' | '-' => true,
            c if c.is_ascii_digit() => true,
            't' => text[i..].starts_with("true"),
            'f' => text[i..].starts_with("false"),
            'n' => text[i..].starts_with("null"),
            _ => false,
        })
        .map(|(i, _)| i)
}
