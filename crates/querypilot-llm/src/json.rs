//! Tolerant JSON extraction from model text.
//!
//! Models asked for "only JSON" still wrap it in markdown fences, prepend
//! prose, or append trailing commentary. These helpers find the first
//! complete object and decode that.

use serde::Deserialize;

use crate::LlmError;

/// Decode `text` as JSON, or failing that the first complete `{...}` object
/// inside it.
pub fn parse_llm_json_object<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, LlmError> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let Some(candidate) = first_json_object(trimmed) else {
        return Err(LlmError::ParseError(format!(
            "model did not return a JSON object: {}",
            truncate_preview(trimmed, 120)
        )));
    };

    serde_json::from_str(candidate)
        .map_err(|e| LlmError::ParseError(format!("model returned invalid JSON: {e}")))
}

/// The first brace-balanced object substring, ignoring braces inside JSON
/// strings. Falls back to `first '{' ..= last '}'` when nothing balances.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices().skip_while(|(i, _)| *i < start) {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }

    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn truncate_preview(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn parses_bare_json() {
        let v: Value = parse_llm_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extracts_from_markdown_fence_and_prose() {
        let text = "Sure! Here it is:\n```json\n{\"patchedSql\": \"SELECT 1\", \"explanation\": \"fixed } brace\"}\n```\nAnything else?";
        let v: Value = parse_llm_json_object(text).unwrap();
        assert_eq!(v["patchedSql"], "SELECT 1");
        assert_eq!(v["explanation"], "fixed } brace");
    }

    #[test]
    fn takes_first_of_several_objects() {
        let v: Value = parse_llm_json_object(r#"{"x": {"y": 2}} {"z": 3}"#).unwrap();
        assert_eq!(v["x"]["y"], 2);
        assert!(v.get("z").is_none());
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let v: Value = parse_llm_json_object(r#"noise {"q": "say \"}\" now"} tail"#).unwrap();
        assert_eq!(v["q"], "say \"}\" now");
    }

    #[test]
    fn no_object_is_a_parse_error() {
        let err = parse_llm_json_object::<Value>("I cannot help with that.").unwrap_err();
        assert!(matches!(err, LlmError::ParseError(_)));
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(truncate_preview("  统计订单总数  ", 4), "统计订单…");
        assert_eq!(truncate_preview("short", 10), "short");
    }
}
