//! Fallback parsing of free-form agent responses.
//!
//! Agents are instructed to submit through the tool call, but some
//! sessions still end with JSON in the terminal text. The fallback
//! ladder: raw JSON, then a fenced code block, then the first balanced
//! `{…}` span.

use serde_json::Value;

use crate::error::AgentError;

/// Extracts a submission payload from terminal response text.
///
/// # Errors
///
/// Returns [`AgentError::ResponseParse`] when no strategy yields a
/// JSON object containing an `entities` field.
pub fn parse_submission_text(content: &str) -> Result<Value, AgentError> {
    let trimmed = content.trim();

    // Raw JSON first
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return require_entities(value, content);
    }

    // JSON inside a code fence
    if let Some(fenced) = extract_fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(fenced)
    {
        return require_entities(value, content);
    }

    // First balanced object span
    if let Some(span) = first_balanced_object(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(span)
    {
        return require_entities(value, content);
    }

    let preview_len = trimmed.len().min(200);
    Err(AgentError::ResponseParse {
        message: format!(
            "response is neither a tool submission nor recognizable JSON \
             ({} bytes, preview: {:?})",
            trimmed.len(),
            &trimmed[..preview_len]
        ),
        content: content.to_string(),
    })
}

fn require_entities(value: Value, original: &str) -> Result<Value, AgentError> {
    if value.get("entities").is_some_and(Value::is_array) {
        Ok(value)
    } else {
        Err(AgentError::ResponseParse {
            message: "parsed JSON is missing the 'entities' array".to_string(),
            content: original.to_string(),
        })
    }
}

/// Returns the contents of the first ```-fenced block, if any.
fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip a language tag like `json` on the fence line
    let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Returns the first balanced `{…}` span, respecting JSON strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_raw_json() {
        let text = r#"{"entities": [], "metadata": {}}"#;
        let value = match parse_submission_text(text) {
            Ok(v) => v,
            Err(e) => unreachable!("parse failed: {e}"),
        };
        assert_eq!(value["entities"], json!([]));
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here are the results:\n```json\n{\"entities\": [{\"@id\": \"urn:A:b\"}], \"metadata\": {}}\n```\nDone.";
        let value = match parse_submission_text(text) {
            Ok(v) => v,
            Err(e) => unreachable!("parse failed: {e}"),
        };
        assert_eq!(value["entities"][0]["@id"], "urn:A:b");
    }

    #[test]
    fn test_parse_generic_fence() {
        let text = "```\n{\"entities\": [], \"metadata\": {}}\n```";
        assert!(parse_submission_text(text).is_ok());
    }

    #[test]
    fn test_parse_balanced_span() {
        let text = "I extracted the following: {\"entities\": [], \"metadata\": {}} as requested.";
        assert!(parse_submission_text(text).is_ok());
    }

    #[test]
    fn test_balanced_span_respects_strings() {
        let text = r#"prefix {"entities": [{"name": "has } brace"}], "metadata": {}} suffix"#;
        let value = match parse_submission_text(text) {
            Ok(v) => v,
            Err(e) => unreachable!("parse failed: {e}"),
        };
        assert_eq!(value["entities"][0]["name"], "has } brace");
    }

    #[test]
    fn test_parse_rejects_prose() {
        let result = parse_submission_text("I could not find any entities in these files.");
        assert!(matches!(result, Err(AgentError::ResponseParse { .. })));
    }

    #[test]
    fn test_parse_rejects_json_without_entities() {
        let result = parse_submission_text(r#"{"answer": 42}"#);
        assert!(matches!(result, Err(AgentError::ResponseParse { .. })));
    }
}
