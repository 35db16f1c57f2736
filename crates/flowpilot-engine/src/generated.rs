//! Best-effort extraction of structured data from generated text.
//!
//! Models wrap JSON in prose or code fences.  [`extract_json_array`] finds
//! the outermost `[...]` and parses it.  Callers turn any error into an
//! empty contribution.

use flowpilot_agent::strip_code_fences;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum GeneratedParseError {
    #[error("no JSON array in response")]
    NoArray,

    #[error("malformed JSON array: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse the first top-level JSON array in `text` into `Vec<T>`.
///
/// Elements that do not deserialize into `T` are skipped, so one bad entry
/// does not discard the rest.
pub fn extract_json_array<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, GeneratedParseError> {
    let body = strip_code_fences(text);
    let start = body.find('[').ok_or(GeneratedParseError::NoArray)?;
    let end = body.rfind(']').ok_or(GeneratedParseError::NoArray)?;
    if end < start {
        return Err(GeneratedParseError::NoArray);
    }
    let items: Vec<serde_json::Value> = serde_json::from_str(&body[start..=end])?;
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        title: String,
    }

    #[test]
    fn finds_array_inside_prose() {
        let text = "Here you go:\n[{\"title\": \"a\"}, {\"title\": \"b\"}]\nHope that helps.";
        let items: Vec<Item> = extract_json_array(text).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].title, "b");
    }

    #[test]
    fn skips_malformed_elements() {
        let items: Vec<Item> = extract_json_array("```json\n[{\"title\": \"a\"}, {\"nope\": 1}]\n```").unwrap();
        assert_eq!(items, vec![Item { title: "a".into() }]);
    }

    #[test]
    fn errors_without_array() {
        assert!(matches!(
            extract_json_array::<Item>("no structure here"),
            Err(GeneratedParseError::NoArray)
        ));
        assert!(matches!(
            extract_json_array::<Item>("[{\"title\": }]"),
            Err(GeneratedParseError::Json(_))
        ));
    }
}
