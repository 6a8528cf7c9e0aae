//! Azure region names.
//!
//! The API accepts both display names (`West Europe`) and short names
//! (`westeurope`) and returns the short form, so locations are normalized
//! before being compared or stored.

use serde_json::Value;

/// Normalize a location to its short form.
pub fn normalize(location: &str) -> String {
    location.replace(' ', "").to_lowercase()
}

/// [`normalize`] for an optional API value.
pub fn normalize_nilable(location: Option<&str>) -> String {
    location.map(normalize).unwrap_or_default()
}

/// State normalizer for `location` attributes.
pub fn normalize_value(value: &Value) -> Value {
    match value.as_str() {
        Some(s) => Value::String(normalize(s)),
        None => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("West Europe"), "westeurope");
        assert_eq!(normalize("local"), "local");
        assert_eq!(normalize(" East US 2 "), "eastus2");
        assert_eq!(normalize_nilable(None), "");
        assert_eq!(normalize_nilable(Some("North Central US")), "northcentralus");
    }

    #[test]
    fn test_normalize_value_leaves_non_strings() {
        assert_eq!(normalize_value(&Value::from("UK South")), Value::from("uksouth"));
        assert_eq!(normalize_value(&Value::Null), Value::Null);
    }
}
