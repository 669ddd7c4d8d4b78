//! Recovering structured JSON from free-form model output.
//!
//! Models wrap JSON in markdown fences, prepend chatter, or trail off with
//! explanations. These helpers find the first balanced object or array and
//! hand it to serde.

use serde::de::DeserializeOwned;

use crate::error::{ParleyError, Result};

/// Remove a leading ```` ```json ```` (or bare ```` ``` ````) fence line and
/// the closing fence, leaving everything else untouched.
pub fn strip_markdown_fences(text: &str) -> String {
    let mut out = text.to_owned();
    if let Some(open) = out.find("```") {
        let line_end = out[open + 3..]
            .find('\n')
            .map_or(open + 3, |i| open + 3 + i + 1);
        out.replace_range(open..line_end, "");
    }
    if let Some(close) = out.rfind("```") {
        out.replace_range(close..close + 3, "");
    }
    out
}

/// First balanced `{...}` in `text`, ignoring braces inside string literals.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_balanced(text, '{', '}')
}

/// First balanced `[...]` in `text`, ignoring brackets inside string literals.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_balanced(text, '[', ']')
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the first JSON object in a model reply into `T`.
///
/// # Errors
///
/// Returns [`ParleyError::Llm`] when no balanced object is present or it does
/// not deserialize into `T`.
pub fn parse_object<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let cleaned = strip_markdown_fences(reply);
    let body = extract_json_object(&cleaned)
        .ok_or_else(|| ParleyError::Llm(format!("no JSON object in reply: {}", preview(reply))))?;
    serde_json::from_str(body).map_err(|e| ParleyError::Llm(format!("malformed JSON object: {e}")))
}

/// Parse the first JSON array in a model reply into `Vec<T>`.
///
/// # Errors
///
/// Returns [`ParleyError::Llm`] when no balanced array is present or it does
/// not deserialize into `Vec<T>`.
pub fn parse_array<T: DeserializeOwned>(reply: &str) -> Result<Vec<T>> {
    let cleaned = strip_markdown_fences(reply);
    let body = extract_json_array(&cleaned)
        .ok_or_else(|| ParleyError::Llm(format!("no JSON array in reply: {}", preview(reply))))?;
    serde_json::from_str(body).map_err(|e| ParleyError::Llm(format!("malformed JSON array: {e}")))
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
