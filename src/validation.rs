//! Validation of configuration values against a [`Schema`].
//!
//! Checks presence, types and block counts, rejects arguments the schema
//! doesn't declare, and runs each attribute's value validators.
//!
//! # Example
//!
//! ```
//! use terraform_provider_azurestack::schema::{Attribute, Schema};
//! use terraform_provider_azurestack::validate::resource_group_name;
//! use terraform_provider_azurestack::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string().with_validator(resource_group_name))
//!     .with_attribute("tags", Attribute::tags());
//!
//! assert!(validate(&schema, &json!({"name": "example-resources"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "bad/name"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute.as_deref(), Some("name"));
//! ```

use serde_json::{Map, Value};

use crate::schema::{Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema};

/// Validate a configuration value against a schema.
///
/// An empty result means the value is valid.
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// [`validate`], as a `Result`.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether a value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diag = Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value)));
            diagnostics.push(if path.is_empty() { diag } else { diag.with_attribute(path) });
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }

    check_unsupported(block, obj, path, diagnostics);
}

fn check_unsupported(
    block: &Block,
    obj: &Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut unknown: Vec<&String> = obj
        .keys()
        .filter(|k| *k != "id" && !block.attributes.contains_key(*k) && !block.blocks.contains_key(*k))
        .collect();
    unknown.sort();
    for key in unknown {
        diagnostics.push(
            Diagnostic::error("Unsupported argument")
                .with_detail(format!("An argument named {key:?} is not expected here."))
                .with_attribute(join_path(path, key)),
        );
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required argument '{path}'"))
                        .with_detail(format!("The argument {path:?} is required, but no definition was found."))
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            // value validators assume the type is right
            if diagnostics.len() == before {
                for validator in &attr.validators {
                    diagnostics.extend(validator.check(v, path));
                }
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    validate_attribute_type(element_type, item, &format!("{path}.{i}"), diagnostics);
                }
            },
            None => {
                let expected = if matches!(attr_type, AttributeType::Set(_)) { "set" } else { "list" };
                diagnostics.push(type_error(path, expected, value));
            },
        },
        AttributeType::Map(value_type) => match value.as_object() {
            Some(obj) => {
                for (key, val) in obj {
                    validate_attribute_type(value_type, val, &format!("{path}.{key}"), diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "map", value)),
        },
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let items: Vec<&Value> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(arr)) => arr.iter().collect(),
        // a single block may also be written as a bare object
        Some(obj @ Value::Object(_)) if nested.nesting_mode == BlockNestingMode::Single => vec![obj],
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{path}'"))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
            return;
        },
    };

    let len = items.len() as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{path}' requires at least {} item(s), got {len}",
                nested.min_items
            ))
            .with_attribute(path),
        );
    }
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{path}' allows at most {} item(s), got {len}",
                nested.max_items
            ))
            .with_attribute(path),
        );
    }

    for (i, item) in items.into_iter().enumerate() {
        validate_block(&nested.block, item, &format!("{path}.{i}"), diagnostics);
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}.{name}")
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64()
                || n.as_f64()
                    .is_some_and(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{path}'"))
        .with_detail(format!("Expected {expected}, got {}", value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeFlags;
    use serde_json::json;

    fn no_dashes(value: &Value, path: &str) -> Vec<Diagnostic> {
        match value.as_str() {
            Some(s) if s.contains('-') => vec![Diagnostic::error("no dashes").with_attribute(path)],
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "example"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("name"));
        assert!(diagnostics[0].summary.contains("Missing required argument"));

        assert_eq!(validate(&schema, &json!({"name": null})).len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_computed_attributes_are_skipped() {
        let schema = Schema::v0().with_attribute("guid", Attribute::computed_string());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"guid": 123})).is_empty());
    }

    #[test]
    fn test_validate_int64() {
        let schema = Schema::v0().with_attribute("priority", Attribute::optional_int64());
        assert!(validate(&schema, &json!({"priority": 100})).is_empty());
        assert!(validate(&schema, &json!({"priority": 100.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"priority": 100.5})).len(), 1);
        assert_eq!(validate(&schema, &json!({"priority": "100"})).len(), 1);
    }

    #[test]
    fn test_validate_list_and_map() {
        let schema = Schema::v0()
            .with_attribute(
                "address_prefixes",
                Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::required()),
            )
            .with_attribute(
                "labels",
                Attribute::new(AttributeType::map(AttributeType::String), AttributeFlags::optional()),
            );

        assert!(validate(&schema, &json!({"address_prefixes": ["10.0.1.0/24"]})).is_empty());

        let diagnostics = validate(&schema, &json!({"address_prefixes": ["10.0.1.0/24", 1]}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("address_prefixes.1"));

        let diagnostics = validate(
            &schema,
            &json!({"address_prefixes": [], "labels": {"env": "prod", "count": 42}}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("labels.count"));
    }

    #[test]
    fn test_validators_run_after_type_check() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string().with_validator(no_dashes));

        assert!(validate(&schema, &json!({"name": "plain"})).is_empty());

        let diagnostics = validate(&schema, &json!({"name": "with-dash"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "no dashes");

        // wrong type reports once, the validator doesn't run
        let diagnostics = validate(&schema, &json!({"name": 5}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_unsupported_argument() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());
        let diagnostics = validate(&schema, &json!({"name": "a", "nmae": "b", "id": "/x"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Unsupported argument");
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("nmae"));
    }

    #[test]
    fn test_single_block_as_list_or_object() {
        let schema = Schema::v0().with_block(
            "resource_group",
            NestedBlock::single(
                Block::new().with_attribute("prevent_deletion_if_contains_resources", Attribute::optional_bool()),
            ),
        );

        assert!(validate(&schema, &json!({"resource_group": [{"prevent_deletion_if_contains_resources": true}]})).is_empty());
        assert!(validate(&schema, &json!({"resource_group": {"prevent_deletion_if_contains_resources": true}})).is_empty());
        assert!(validate(&schema, &json!({"resource_group": []})).is_empty());

        let diagnostics = validate(
            &schema,
            &json!({"resource_group": [{"prevent_deletion_if_contains_resources": "yes"}]}),
        );
        assert_eq!(
            diagnostics[0].attribute.as_deref(),
            Some("resource_group.0.prevent_deletion_if_contains_resources")
        );

        let diagnostics = validate(&schema, &json!({"resource_group": [{}, {}]}));
        assert!(diagnostics[0].summary.contains("at most 1"));
    }

    #[test]
    fn test_list_block_min_items() {
        let schema = Schema::v0().with_block(
            "security_rule",
            NestedBlock::list(Block::new().with_attribute("name", Attribute::required_string())).with_min_items(1),
        );

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = validate(&schema, &json!({"security_rule": "rule"}));
        assert!(diagnostics[0].summary.contains("Expected list"));
    }

    #[test]
    fn test_result_helpers() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(is_valid(&schema, &json!({"name": "test"})));
        assert!(!is_valid(&schema, &json!({})));
        assert!(validate_result(&schema, &json!({"name": "test"})).is_ok());
        assert_eq!(validate_result(&schema, &json!({})).unwrap_err().len(), 1);
    }

    #[test]
    fn test_root_not_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());
        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }
}
