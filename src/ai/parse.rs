//! Response parsing helpers
//!
//! The adapter returns raw text; callers extract the leading JSON array
//! or object, tolerating markdown code fences around it.

use serde_json::Value;

/// Extract the first JSON array from possibly markdown-wrapped text.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let candidate = strip_code_fence(text);
    let start = candidate.find('[')?;
    let slice = balanced_slice(&candidate[start..], '[', ']')?;
    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Extract the first JSON object from possibly markdown-wrapped text.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let candidate = strip_code_fence(text);
    let start = candidate.find('{')?;
    let slice = balanced_slice(&candidate[start..], '{', '}')?;
    match serde_json::from_str::<Value>(slice) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Return the content of the first fenced code block, or the input
/// unchanged when no fence is present.
fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_fence = &text[open + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Slice from the first `open` through its balanced `close`, respecting
/// JSON string quoting.
fn balanced_slice(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
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

    #[test]
    fn test_bare_array() {
        let items = extract_json_array(r#"[{"line": 1}, {"line": 2}]"#).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_fenced_array() {
        let text = "Here are the findings:\n```json\n[{\"line\": 3}]\n```\nDone.";
        let items = extract_json_array(text).unwrap();
        assert_eq!(items[0]["line"], 3);
    }

    #[test]
    fn test_object_with_preamble() {
        let text = "Sure! {\"score\": 0.9, \"note\": \"a ] in a string\"}";
        let obj = extract_json_object(text).unwrap();
        assert_eq!(obj["score"], 0.9);
    }

    #[test]
    fn test_nested_structures() {
        let text = r#"[{"steps": ["a", "b"], "meta": {"k": [1, 2]}}]"#;
        let items = extract_json_array(text).unwrap();
        assert_eq!(items[0]["meta"]["k"][1], 2);
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_json_array("no structured content here").is_none());
        assert!(extract_json_object("still nothing").is_none());
    }

    #[test]
    fn test_malformed_json_returns_none() {
        assert!(extract_json_array("[{\"line\": }]").is_none());
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let text = r#"{"text": "array looks like [1, 2]"}"#;
        let obj = extract_json_object(text).unwrap();
        assert_eq!(obj["text"], "array looks like [1, 2]");
    }
}
