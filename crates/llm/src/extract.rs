//! Reducing model text to a JSON document.

use pipeline::GenerationError;
use serde_json::Value;

/// Parses the JSON document in a model answer.
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or an object
/// surrounded by prose (the outermost `{ ... }` is taken).
pub fn extract_json(text: &str) -> Result<Value, GenerationError> {
    let text = strip_fence(text.trim());
    if text.is_empty() {
        return Err(GenerationError::MalformedOutput("empty answer".into()));
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    let object = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(GenerationError::MalformedOutput(preview(text))),
    };
    serde_json::from_str(object)
        .map_err(|e| GenerationError::MalformedOutput(format!("{e} in {}", preview(object))))
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("'{}...'", &text[..cut]),
        None => format!("'{text}'"),
    }
}
