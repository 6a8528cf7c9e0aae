//! Planning: comparing prior state with the proposed new state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{Attribute, Block, Schema};

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if deleting).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with changes.
    pub fn with_changes(planned_state: Value, changes: Vec<AttributeChange>, requires_replace: bool) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether anything changes at all.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// The changes to attributes whose modification forces replacement.
    pub fn replaced_paths<'a>(&'a self, schema: &'a Schema) -> impl Iterator<Item = &'a str> + 'a {
        self.changes
            .iter()
            .filter(|c| schema.attribute(&c.path).is_some_and(|a| a.force_new))
            .map(|c| c.path.as_str())
    }
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Names of everything the provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// List of data source type names.
    pub data_sources: Vec<String>,
}

/// Compute the plan for moving from `prior` to `proposed`.
///
/// * attributes with a state function are normalized before comparing, so
///   `West Europe` and `westeurope` don't produce a diff;
/// * unset optional attributes take their schema default;
/// * computed attributes the configuration leaves unset keep their prior value,
///   or become unknown (`null`) when the resource is being replaced;
/// * a change to a `force_new` attribute marks the plan as a replacement.
pub fn diff(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let Some(proposed) = proposed.as_object() else {
        // destroy
        let changes = prior
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        return PlanResult::with_changes(Value::Null, changes, false);
    };
    let empty = Map::new();
    let prior_obj = prior.and_then(Value::as_object);
    let creating = prior_obj.is_none();
    let prior_obj = prior_obj.unwrap_or(&empty);

    let mut planned = Map::new();
    let mut changes = Vec::new();
    let mut requires_replace = false;

    for (name, attr) in &schema.block.attributes {
        let before = prior_obj.get(name).filter(|v| !v.is_null());
        let mut after = planned_value(attr, proposed.get(name), before, creating);

        if let (Some(before), Some(value)) = (before, after.as_mut()) {
            if let Some(normalizer) = &attr.state_func {
                if normalizer.apply(before) == *value {
                    *value = before.clone();
                }
            }
        }

        match (before, &after) {
            (None, Some(value)) if !attr.flags.is_computed_only() => {
                changes.push(AttributeChange::added(name.clone(), value.clone()));
            },
            (Some(b), Some(a)) if b != a => {
                requires_replace |= attr.force_new;
                changes.push(AttributeChange::modified(name.clone(), b.clone(), a.clone()));
            },
            (Some(b), None) if !attr.flags.computed => {
                requires_replace |= attr.force_new;
                changes.push(AttributeChange::removed(name.clone(), b.clone()));
            },
            _ => {},
        }

        planned.insert(name.clone(), after.unwrap_or(Value::Null));
    }

    for (name, nested) in &schema.block.blocks {
        let before = prior_obj.get(name).filter(|v| !is_empty_block(v));
        let after = proposed
            .get(name)
            .filter(|v| !is_empty_block(v))
            .map(|a| with_prior_computed(&nested.block, before, a));
        match (before, &after) {
            (None, Some(a)) => {
                requires_replace |= !creating && replaces_items(&nested.block, &Value::Null, a);
                changes.push(AttributeChange::added(name.clone(), a.clone()));
            },
            (Some(b), None) => {
                requires_replace |= replaces_items(&nested.block, b, &Value::Null);
                changes.push(AttributeChange::removed(name.clone(), b.clone()));
            },
            (Some(b), Some(a)) if b != a => {
                requires_replace |= replaces_items(&nested.block, b, a);
                changes.push(AttributeChange::modified(name.clone(), b.clone(), a.clone()));
            },
            _ => {},
        }
        planned.insert(name.clone(), after.unwrap_or(Value::Null));
    }

    let id = if creating || requires_replace {
        Value::Null
    } else {
        prior_obj.get("id").cloned().unwrap_or(Value::Null)
    };
    planned.insert("id".to_string(), id);

    if requires_replace {
        for (name, attr) in &schema.block.attributes {
            if attr.flags.computed && proposed.get(name).map_or(true, Value::is_null) {
                planned.insert(name.clone(), Value::Null);
            }
        }
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

fn planned_value(attr: &Attribute, proposed: Option<&Value>, prior: Option<&Value>, creating: bool) -> Option<Value> {
    match proposed.filter(|v| !v.is_null()) {
        Some(v) if !attr.flags.is_computed_only() => Some(match &attr.state_func {
            Some(normalizer) => normalizer.apply(v),
            None => v.clone(),
        }),
        _ if attr.flags.computed && !creating => prior.cloned(),
        _ => attr.default.clone(),
    }
}

/// Fill computed-only attributes the configuration leaves unset from the
/// prior block at the same position.
fn with_prior_computed(block: &Block, prior: Option<&Value>, proposed: &Value) -> Value {
    let (Some(Value::Array(prior_items)), Value::Array(items)) = (prior, proposed) else {
        return proposed.clone();
    };
    let merged = items.iter().enumerate().map(|(i, item)| {
        let (Some(before), Some(obj)) = (prior_items.get(i).and_then(Value::as_object), item.as_object()) else {
            return item.clone();
        };
        let mut obj = obj.clone();
        for (name, attr) in &block.attributes {
            if attr.flags.is_computed_only() && obj.get(name).map_or(true, Value::is_null) {
                if let Some(value) = before.get(name) {
                    obj.insert(name.clone(), value.clone());
                }
            }
        }
        Value::Object(obj)
    });
    Value::Array(merged.collect())
}

/// Whether a `force_new` attribute differs between two lists of blocks.
fn replaces_items(block: &Block, before: &Value, after: &Value) -> bool {
    let items = |v: &Value| v.as_array().cloned().unwrap_or_default();
    let (before, after) = (items(before), items(after));
    (0..before.len().max(after.len())).any(|i| {
        block.attributes.iter().filter(|(_, attr)| attr.force_new).any(|(name, _)| {
            let value = |items: &[Value]| items.get(i).and_then(|item| item.get(name)).filter(|v| !v.is_null()).cloned();
            value(&before) != value(&after)
        })
    })
}

fn is_empty_block(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("location", Attribute::location())
            .with_attribute("tags", Attribute::tags())
            .with_attribute("enforce", Attribute::optional_bool().with_default(json!(true)))
            .with_attribute("principal_id", Attribute::computed_string())
    }

    #[test]
    fn test_create_plan() {
        let plan = diff(
            &schema(),
            None,
            &json!({"name": "rg", "location": "West Europe", "tags": null}),
        );

        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["location"], "westeurope");
        assert_eq!(plan.planned_state["enforce"], true);
        assert_eq!(plan.planned_state["id"], Value::Null);
        assert_eq!(plan.planned_state["principal_id"], Value::Null);
        let paths: Vec<_> = plan.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["enforce", "location", "name"]);
    }

    #[test]
    fn test_normalized_value_is_not_a_diff() {
        let prior = json!({
            "id": "/subscriptions/0/resourceGroups/rg",
            "name": "rg",
            "location": "westeurope",
            "enforce": true,
            "principal_id": "abc"
        });
        let plan = diff(
            &schema(),
            Some(&prior),
            &json!({"name": "rg", "location": "West Europe", "enforce": true}),
        );

        assert!(!plan.has_changes());
        assert_eq!(plan.planned_state["principal_id"], "abc");
        assert_eq!(plan.planned_state["id"], prior["id"]);
    }

    #[test]
    fn test_force_new_change_requires_replace() {
        let prior = json!({
            "id": "/subscriptions/0/resourceGroups/old",
            "name": "old",
            "location": "local",
            "principal_id": "abc"
        });
        let plan = diff(
            &schema(),
            Some(&prior),
            &json!({"name": "new", "location": "local", "tags": {"env": "test"}}),
        );

        assert!(plan.requires_replace);
        assert_eq!(plan.planned_state["id"], Value::Null);
        assert_eq!(plan.planned_state["principal_id"], Value::Null);
        let schema = schema();
        let replaced: Vec<_> = plan.replaced_paths(&schema).collect();
        assert_eq!(replaced, vec!["name"]);
    }

    #[test]
    fn test_in_place_update() {
        let prior = json!({
            "id": "/subscriptions/0/resourceGroups/rg",
            "name": "rg",
            "location": "local",
            "tags": {"env": "dev"},
            "enforce": true
        });
        let plan = diff(
            &schema(),
            Some(&prior),
            &json!({"name": "rg", "location": "local", "tags": {"env": "prod"}, "enforce": true}),
        );

        assert!(!plan.requires_replace);
        assert_eq!(
            plan.changes,
            vec![AttributeChange::modified("tags", json!({"env": "dev"}), json!({"env": "prod"}))]
        );
    }

    #[test]
    fn test_nested_computed_values_carry_over() {
        let schema = schema().with_block(
            "identity",
            crate::schema::NestedBlock::list(
                crate::schema::Block::new()
                    .with_attribute("type", Attribute::optional_string().with_force_new())
                    .with_attribute("principal_id", Attribute::computed_string()),
            ),
        );
        let prior = json!({
            "id": "/subscriptions/0/resourceGroups/rg",
            "name": "rg",
            "location": "local",
            "enforce": true,
            "identity": [{"type": "SystemAssigned", "principal_id": "abc"}]
        });
        let mut proposed = prior.clone();
        proposed["identity"] = json!([{"type": "SystemAssigned"}]);

        let plan = diff(&schema, Some(&prior), &proposed);
        assert!(!plan.has_changes());
        assert_eq!(plan.planned_state["identity"], prior["identity"]);

        proposed["identity"] = json!([{"type": "None"}]);
        let plan = diff(&schema, Some(&prior), &proposed);
        assert!(plan.requires_replace);
        assert_eq!(plan.planned_state["id"], Value::Null);

        proposed["identity"] = Value::Null;
        assert!(diff(&schema, Some(&prior), &proposed).requires_replace);
    }

    #[test]
    fn test_destroy_plan() {
        let prior = json!({"id": "x", "name": "rg", "tags": null});
        let plan = diff(&schema(), Some(&prior), &Value::Null);
        assert_eq!(plan.planned_state, Value::Null);
        assert_eq!(plan.changes.len(), 2);
    }

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("name", json!("test"));
        assert!(added.before.is_none());

        let removed = AttributeChange::removed("name", json!("old"));
        assert!(removed.after.is_none());

        let imported = ImportedResource::new("azurestack_resource_group", json!({"id": "rg"}));
        assert_eq!(imported.state["id"], "rg");
    }
}
