//! Typed resource and data source traits.
//!
//! Handlers work with a strongly-typed model. The type-erased
//! [`DynResource`] and [`DynDataSource`] traits, implemented for every typed
//! handler, do the JSON decode/encode at the border and set up the
//! [`OperationContext`] each call runs under.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::client::Client;
use crate::error::{ProviderError, Result};
use crate::schema::Schema;
use crate::timeouts::{Operation, OperationContext, Timeouts, TimeoutsBlock};

/// A managed resource with a typed model.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// The resource's state, as stored by Terraform.
    type Model: Serialize + DeserializeOwned + Send + Sync;

    /// The Terraform type name, e.g. `azurestack_resource_group`.
    fn resource_type(&self) -> &'static str;

    /// The resource schema, without the `timeouts` block.
    fn schema(&self) -> Schema;

    /// Default handler timeouts.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Create the resource and return its state.
    async fn create(&self, ctx: &OperationContext, client: &Client, model: Self::Model) -> Result<Self::Model>;

    /// Refresh the state. `None` means the resource is gone.
    async fn read(&self, ctx: &OperationContext, client: &Client, state: Self::Model) -> Result<Option<Self::Model>>;

    /// Update the resource in place.
    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Client,
        prior: Self::Model,
        planned: Self::Model,
    ) -> Result<Self::Model>;

    /// Delete the resource.
    async fn delete(&self, ctx: &OperationContext, client: &Client, state: Self::Model) -> Result<()>;

    /// Validate an import ID and build the partial state [`Resource::read`] fills in.
    fn import_state(&self, id: &str) -> Result<Self::Model>;
}

/// A data source with a typed model.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// The data source's configuration and result.
    type Model: Serialize + DeserializeOwned + Send + Sync;

    /// The Terraform type name.
    fn resource_type(&self) -> &'static str;

    /// The data source schema.
    fn schema(&self) -> Schema;

    /// Default timeouts. Only `read` is used.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Look the data up.
    async fn read(&self, ctx: &OperationContext, client: &Client, config: Self::Model) -> Result<Self::Model>;
}

/// A resource without the typed model, as the provider dispatches to it.
#[async_trait]
pub trait DynResource: Send + Sync {
    /// The Terraform type name.
    fn resource_type(&self) -> &'static str;

    /// The full schema, including the `timeouts` block.
    fn schema(&self) -> Schema;

    /// Create from the planned state.
    async fn create(&self, client: &Client, planned: Value) -> Result<Value>;

    /// Refresh from the current state. `None` removes the resource from state.
    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>>;

    /// Update from prior to planned state.
    async fn update(&self, client: &Client, prior: Value, planned: Value) -> Result<Value>;

    /// Delete the resource in `state`.
    async fn delete(&self, client: &Client, state: Value) -> Result<()>;

    /// Import an existing resource by ID.
    async fn import(&self, client: &Client, id: &str) -> Result<Value>;
}

/// A data source without the typed model.
#[async_trait]
pub trait DynDataSource: Send + Sync {
    /// The Terraform type name.
    fn resource_type(&self) -> &'static str;

    /// The full schema.
    fn schema(&self) -> Schema;

    /// Read using the given configuration.
    async fn read(&self, client: &Client, config: Value) -> Result<Value>;
}

#[async_trait]
impl<R: Resource> DynResource for R {
    fn resource_type(&self) -> &'static str {
        <R as Resource>::resource_type(self)
    }

    fn schema(&self) -> Schema {
        <R as Resource>::schema(self).with_timeouts(<R as Resource>::timeouts(self))
    }

    #[instrument(skip_all, fields(resource_type = <R as Resource>::resource_type(self)))]
    async fn create(&self, client: &Client, planned: Value) -> Result<Value> {
        let ctx = context_for(client, <R as Resource>::timeouts(self), Operation::Create, &planned)?;
        let model = decode(&planned)?;
        let created = <R as Resource>::create(self, &ctx, client, model).await?;
        encode(&created, &planned)
    }

    #[instrument(skip_all, fields(resource_type = <R as Resource>::resource_type(self)))]
    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>> {
        let ctx = context_for(client, <R as Resource>::timeouts(self), Operation::Read, &state)?;
        let model = decode(&state)?;
        match <R as Resource>::read(self, &ctx, client, model).await? {
            Some(refreshed) => encode(&refreshed, &state).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(resource_type = <R as Resource>::resource_type(self)))]
    async fn update(&self, client: &Client, prior: Value, planned: Value) -> Result<Value> {
        let ctx = context_for(client, <R as Resource>::timeouts(self), Operation::Update, &planned)?;
        let updated =
            <R as Resource>::update(self, &ctx, client, decode(&prior)?, decode(&planned)?).await?;
        encode(&updated, &planned)
    }

    #[instrument(skip_all, fields(resource_type = <R as Resource>::resource_type(self)))]
    async fn delete(&self, client: &Client, state: Value) -> Result<()> {
        let ctx = context_for(client, <R as Resource>::timeouts(self), Operation::Delete, &state)?;
        <R as Resource>::delete(self, &ctx, client, decode(&state)?).await
    }

    #[instrument(skip_all, fields(resource_type = <R as Resource>::resource_type(self), id = %id))]
    async fn import(&self, client: &Client, id: &str) -> Result<Value> {
        let partial = <R as Resource>::import_state(self, id)?;
        let ctx = client.context(Operation::Read, <R as Resource>::timeouts(self).read);
        debug!("importing");
        match <R as Resource>::read(self, &ctx, client, partial).await? {
            Some(state) => encode(&state, &Value::Null),
            None => Err(ProviderError::NotFound(format!(
                "Cannot import non-existent remote object {id:?}"
            ))),
        }
    }
}

#[async_trait]
impl<D: DataSource> DynDataSource for D {
    fn resource_type(&self) -> &'static str {
        <D as DataSource>::resource_type(self)
    }

    fn schema(&self) -> Schema {
        <D as DataSource>::schema(self)
    }

    #[instrument(skip_all, fields(data_source = <D as DataSource>::resource_type(self)))]
    async fn read(&self, client: &Client, config: Value) -> Result<Value> {
        let ctx = context_for(client, <D as DataSource>::timeouts(self), Operation::Read, &config)?;
        let found = <D as DataSource>::read(self, &ctx, client, decode(&config)?).await?;
        encode(&found, &config)
    }
}

fn context_for(client: &Client, defaults: Timeouts, operation: Operation, value: &Value) -> Result<OperationContext> {
    let timeouts = defaults.with_overrides(&TimeoutsBlock::from_config(value)?)?;
    Ok(client.context(operation, timeouts.for_operation(operation)))
}

/// Decode a model, treating `null` attributes as unset.
pub(crate) fn decode<M: DeserializeOwned>(value: &Value) -> Result<M> {
    Ok(serde_json::from_value(strip_nulls(value))?)
}

/// Encode a model, carrying over the `timeouts` block from the input.
fn encode<M: Serialize>(model: &M, input: &Value) -> Result<Value> {
    let mut value = serde_json::to_value(model)?;
    if let (Some(out), Some(timeouts)) = (value.as_object_mut(), input.get("timeouts")) {
        out.insert("timeouts".to_string(), timeouts.clone());
    }
    Ok(value)
}

/// Drop `null` object entries, at any depth, so serde defaults apply.
pub(crate) fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Log and return `None` when a read finds the resource gone.
pub fn removed_from_state<T>(description: impl std::fmt::Display) -> Result<Option<T>> {
    info!("{description} was not found - removing from state");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Model {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        tags: std::collections::BTreeMap<String, String>,
    }

    #[test]
    fn test_decode_treats_null_as_unset() {
        let model: Model = decode(&json!({"id": null, "name": "x", "tags": null})).unwrap();
        assert_eq!(model.id, "");
        assert!(model.tags.is_empty());
    }

    #[test]
    fn test_strip_nulls_recurses_into_blocks() {
        let stripped = strip_nulls(&json!({"rule": [{"name": "a", "description": null}], "x": null}));
        assert_eq!(stripped, json!({"rule": [{"name": "a"}]}));
    }

    #[test]
    fn test_decode_reports_serialization_errors() {
        let err = decode::<Model>(&json!({"name": 3})).unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[test]
    fn test_encode_keeps_timeouts_block() {
        let model = Model {
            id: "1".into(),
            name: "x".into(),
            tags: Default::default(),
        };
        let out = encode(&model, &json!({"timeouts": [{"create": "1h"}]})).unwrap();
        assert_eq!(out["timeouts"], json!([{"create": "1h"}]));
        assert_eq!(out["id"], "1");

        let bare = encode(&model, &Value::Null).unwrap();
        assert!(bare.get("timeouts").is_none());
    }
}
