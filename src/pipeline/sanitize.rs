//! Inference output cleanup before strict JSON parsing.
//!
//! Strips code fences and any prose around the JSON payload. Does not
//! repair JSON; a payload that still fails to parse is a hard error for the
//! caller to handle.

use std::sync::LazyLock;

use regex::Regex;

/// Which JSON shape the caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

impl JsonShape {
    fn delimiters(self) -> (char, char) {
        match self {
            Self::Object => ('{', '}'),
            Self::Array => ('[', ']'),
        }
    }
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid regex"));

/// Locate the JSON payload of the expected shape in raw completion text.
///
/// The first `{` or `[` decides the top-level shape. Returns `None` when
/// it is not the expected one or no candidate block exists.
pub fn extract_json_block(response: &str, shape: JsonShape) -> Option<&str> {
    let trimmed = response.trim();
    let text = FENCE_RE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);

    let (open, close) = shape.delimiters();
    let start = text.find(|c: char| c == '{' || c == '[')?;
    if !text[start..].starts_with(open) {
        return None;
    }
    let end = text.rfind(close)?;
    (start < end).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_passes_through() {
        let text = r#"{"Drug": "medication_name"}"#;
        assert_eq!(extract_json_block(text, JsonShape::Object), Some(text));
    }

    #[test]
    fn strips_json_fence() {
        let text = "```json\n{\"Qty\": \"total_quantity\"}\n```";
        assert_eq!(
            extract_json_block(text, JsonShape::Object),
            Some("{\"Qty\": \"total_quantity\"}")
        );
    }

    #[test]
    fn strips_bare_fence_around_array() {
        let text = "```\n[{\"a\": 1}]\n```";
        assert_eq!(extract_json_block(text, JsonShape::Array), Some("[{\"a\": 1}]"));
    }

    #[test]
    fn strips_surrounding_prose() {
        let text = "Here is the mapping:\n{\"Exp\": \"expiry_date\"}\nLet me know!";
        assert_eq!(
            extract_json_block(text, JsonShape::Object),
            Some("{\"Exp\": \"expiry_date\"}")
        );
    }

    #[test]
    fn missing_block_is_none() {
        assert_eq!(extract_json_block("I cannot help with that.", JsonShape::Object), None);
        assert_eq!(extract_json_block("{\"a\":1}", JsonShape::Array), None);
    }

    #[test]
    fn array_is_not_an_object() {
        assert_eq!(extract_json_block(r#"[{"a": "b"}]"#, JsonShape::Object), None);
        assert_eq!(extract_json_block("```json\n[{\"a\": 1}]\n```", JsonShape::Object), None);
    }

    #[test]
    fn wrapper_object_is_not_an_array() {
        let text = r#"{"records": [{"medication_name": "A"}]}"#;
        assert_eq!(extract_json_block(text, JsonShape::Array), None);
        let text = "Sure:\n{\"records\": [{\"a\": 1}]}";
        assert_eq!(extract_json_block(text, JsonShape::Array), None);
    }
}
