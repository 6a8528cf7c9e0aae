//! Resource tags.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::schema::Diagnostic;

const MAX_TAGS: usize = 50;
const MAX_KEY_LEN: usize = 512;
const MAX_VALUE_LEN: usize = 256;

/// Tags as sent to and returned by the API.
pub type Tags = BTreeMap<String, String>;

/// Convert the configured `tags` map into API tags.
///
/// Numbers and booleans are stringified. Other values are skipped, since
/// [`validate`] rejects them before a handler runs.
pub fn expand(input: Option<&Value>) -> Tags {
    let Some(Value::Object(map)) = input else {
        return Tags::new();
    };
    map.iter()
        .filter_map(|(k, v)| value_to_string(v).map(|s| (k.clone(), s)))
        .collect()
}

/// Convert API tags into the state representation.
pub fn flatten(tags: &Tags) -> Value {
    Value::Object(
        tags.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<String, Value>>(),
    )
}

/// Value validator for the `tags` attribute.
pub fn validate(value: &Value, path: &str) -> Vec<Diagnostic> {
    let Some(map) = value.as_object() else {
        return vec![Diagnostic::error(format!("expected {path:?} to be a map")).with_attribute(path)];
    };

    let mut diagnostics = Vec::new();
    if map.len() > MAX_TAGS {
        diagnostics.push(
            Diagnostic::error(format!("a maximum of {MAX_TAGS} tags can be applied to each ARM resource"))
                .with_attribute(path),
        );
    }

    for (key, v) in map {
        let key_len = key.chars().count();
        if key_len > MAX_KEY_LEN {
            diagnostics.push(
                Diagnostic::error(format!(
                    "the maximum length for a tag key is {MAX_KEY_LEN} characters: {key:?} is {key_len} characters"
                ))
                .with_attribute(path),
            );
        }

        match value_to_string(v) {
            Some(s) => {
                let value_len = s.chars().count();
                if value_len > MAX_VALUE_LEN {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "the maximum length for a tag value is {MAX_VALUE_LEN} characters: the value for {key:?} is {value_len} characters"
                        ))
                        .with_attribute(format!("{path}.{key}")),
                    );
                }
            },
            None => diagnostics.push(
                Diagnostic::error(format!(
                    "unknown tag type {} in tag value",
                    crate::validation::value_type_name(v)
                ))
                .with_attribute(format!("{path}.{key}")),
            ),
        }
    }
    diagnostics
}

/// Serde helper for model fields: `#[serde(default, deserialize_with = "tags::deserialize")]`.
///
/// Accepts whatever [`expand`] accepts, so `{"cost_center": 42}` decodes.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Tags, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <Value as serde::Deserialize>::deserialize(deserializer)?;
    Ok(expand(Some(&value)))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expand_stringifies_scalars() {
        let tags = expand(Some(&json!({"environment": "production", "cost_center": 42, "managed": true})));
        assert_eq!(tags.get("environment").map(String::as_str), Some("production"));
        assert_eq!(tags.get("cost_center").map(String::as_str), Some("42"));
        assert_eq!(tags.get("managed").map(String::as_str), Some("true"));
        assert!(expand(None).is_empty());
        assert!(expand(Some(&Value::Null)).is_empty());
    }

    #[test]
    fn test_deserialize_helper() {
        #[derive(serde::Deserialize)]
        struct Model {
            #[serde(default, deserialize_with = "deserialize")]
            tags: Tags,
        }

        let model: Model = serde_json::from_value(json!({"tags": {"cost_center": 42}})).unwrap();
        assert_eq!(model.tags.get("cost_center").map(String::as_str), Some("42"));
        let model: Model = serde_json::from_value(json!({})).unwrap();
        assert!(model.tags.is_empty());
    }

    #[test]
    fn test_flatten() {
        let mut tags = Tags::new();
        tags.insert("environment".into(), "staging".into());
        assert_eq!(flatten(&tags), json!({"environment": "staging"}));
        assert_eq!(flatten(&Tags::new()), json!({}));
    }

    #[test]
    fn test_validate_limits() {
        assert!(validate(&json!({"environment": "production"}), "tags").is_empty());

        let many: Map<String, Value> = (0..51).map(|i| (format!("k{i}"), json!("v"))).collect();
        let diagnostics = validate(&Value::Object(many), "tags");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("maximum of 50 tags"));

        let mut long = Map::new();
        long.insert("k".repeat(513), json!("v"));
        let diagnostics = validate(&Value::Object(long), "tags");
        assert!(diagnostics[0].summary.contains("tag key is 512 characters"));

        let diagnostics = validate(&json!({"k": "v".repeat(257)}), "tags");
        assert!(diagnostics[0].summary.contains("tag value is 256 characters"));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("tags.k"));
    }

    #[test]
    fn test_validate_rejects_nested_values() {
        let diagnostics = validate(&json!({"k": {"nested": true}}), "tags");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("unknown tag type object"));
    }
}
