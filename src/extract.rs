//! Helpers for pulling structured data out of free-form model output.

use serde_json::{Map, Value};

/// Find the first well-formed JSON object embedded in `text`.
///
/// Model answers often wrap the object in prose or a code fence, so every
/// `{` is tried as a start position and the first one that deserializes
/// to an object wins.
pub(crate) fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .find_map(|(start, _)| {
            let mut stream =
                serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(Value::Object(map))) => Some(map),
                _ => None,
            }
        })
}

/// Read a numeric field, accepting numbers and numeric strings.
pub(crate) fn number_field(map: &Map<String, Value>, field: &str) -> Option<f64> {
    match map.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_object_inside_prose() {
        let map = first_json_object("Sure! ```json\n{\"a\": 1}\n``` hope that helps").unwrap();
        assert_eq!(map.get("a"), Some(&Value::from(1)));
    }

    #[test]
    fn skips_malformed_candidates() {
        let map = first_json_object("{oops} then {\"b\": {\"c\": 2}}").unwrap();
        assert!(map.contains_key("b"));
    }

    #[test]
    fn none_without_object() {
        assert!(first_json_object("no json here").is_none());
        assert!(first_json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn number_field_accepts_strings() {
        let map = first_json_object(r#"{"x": "12.5", "y": 3, "z": true}"#).unwrap();
        assert_eq!(number_field(&map, "x"), Some(12.5));
        assert_eq!(number_field(&map, "y"), Some(3.0));
        assert_eq!(number_field(&map, "z"), None);
        assert_eq!(number_field(&map, "missing"), None);
    }
}
