//! `azurestack_policy_assignment`.
//!
//! Assignments are eventually consistent: a freshly written assignment can
//! answer 404 for a while, and may flip back to 404 once or twice after the
//! first successful read. Writes therefore wait for ten consecutive
//! successful reads before the state is refreshed.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{ArmResource, Client, ManagedIdentity};
use crate::error::{ProviderError, Result, ResultExt};
use crate::location;
use crate::poll::{Refresh, StateWaiter};
use crate::resource::{removed_from_state, Resource};
use crate::resource_id::{PolicyAssignmentId, ResourceIdFormatter};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use crate::timeouts::{OperationContext, Timeouts};
use crate::validate;

const RESOURCE_TYPE: &str = "azurestack_policy_assignment";

/// Metadata keys the service stamps on every assignment.
const SERVICE_METADATA_KEYS: [&str; 5] = ["assignedBy", "createdBy", "createdOn", "updatedBy", "updatedOn"];

/// State of `azurestack_policy_assignment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyAssignmentModel {
    /// ARM ID, set once created.
    pub id: String,
    /// Assignment name, unique within the scope.
    pub name: String,
    /// ARM ID the assignment applies to.
    pub scope: String,
    /// Policy or policy set definition to assign.
    pub policy_definition_id: String,
    /// Free-form description.
    pub description: String,
    /// Name shown in the portal.
    pub display_name: String,
    /// Only needed for assignments with a managed identity.
    pub location: String,
    /// At most one managed identity.
    pub identity: Vec<PolicyAssignmentIdentity>,
    /// JSON document of `{"name": {"value": ...}}` pairs.
    pub parameters: String,
    /// `true` maps to `Default`, `false` to `DoNotEnforce`.
    pub enforcement_mode: bool,
    /// Child scopes excluded from the assignment.
    pub not_scopes: Vec<String>,
    /// JSON document.
    pub metadata: String,
}

impl Default for PolicyAssignmentModel {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            scope: String::new(),
            policy_definition_id: String::new(),
            description: String::new(),
            display_name: String::new(),
            location: String::new(),
            identity: Vec::new(),
            parameters: String::new(),
            enforcement_mode: true,
            not_scopes: Vec::new(),
            metadata: String::new(),
        }
    }
}

/// The `identity` block of an assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyAssignmentIdentity {
    /// `SystemAssigned` or `None`.
    #[serde(rename = "type")]
    pub identity_type: String,
    /// Set by the service.
    pub principal_id: String,
    /// Set by the service.
    pub tenant_id: String,
}

fn identity_schema() -> NestedBlock {
    NestedBlock::list(
        Block::new()
            .with_attribute(
                "type",
                Attribute::optional_string()
                    .with_force_new()
                    .with_validator(|v, p| validate::string_in(v, p, &["None", "SystemAssigned"])),
            )
            .with_attribute("principal_id", Attribute::computed_string())
            .with_attribute("tenant_id", Attribute::computed_string()),
    )
    .with_max_items(1)
}

fn expand_identity(input: &[PolicyAssignmentIdentity]) -> Option<ManagedIdentity> {
    input.first().map(|identity| ManagedIdentity::new(&identity.identity_type))
}

fn flatten_identity(input: Option<ManagedIdentity>) -> Vec<PolicyAssignmentIdentity> {
    input
        .map(|identity| PolicyAssignmentIdentity {
            identity_type: identity.identity_type,
            principal_id: identity.principal_id.unwrap_or_default(),
            tenant_id: identity.tenant_id.unwrap_or_default(),
        })
        .into_iter()
        .collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AssignmentProperties {
    policy_definition_id: String,
    display_name: String,
    scope: String,
    enforcement_mode: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    not_scopes: Option<Vec<String>>,
}

/// `/providers/Microsoft.Authorization/policyDefinitions/{name}` or a policy
/// set definition, at any scope.
fn validate_policy_definition_id(value: &Value, path: &str) -> Vec<Diagnostic> {
    let Some(id) = value.as_str() else {
        return vec![Diagnostic::error(format!("expected type of {path:?} to be string")).with_attribute(path)];
    };
    let lowered = id.to_ascii_lowercase();
    let valid = ["/providers/microsoft.authorization/policydefinitions/", "/providers/microsoft.authorization/policysetdefinitions/"]
        .iter()
        .any(|segment| {
            lowered
                .rfind(segment)
                .is_some_and(|i| i + segment.len() < lowered.len() && !lowered[i + segment.len()..].contains('/'))
        });
    if valid {
        Vec::new()
    } else {
        vec![Diagnostic::error(format!(
            "{path:?} must be a Policy Definition or Policy Set Definition ID, got {id:?}"
        ))
        .with_attribute(path)]
    }
}

/// Re-encode a JSON string compactly with sorted keys.
fn normalize_json(value: &Value) -> Value {
    match value.as_str().map(serde_json::from_str::<Value>) {
        Some(Ok(parsed)) => Value::String(parsed.to_string()),
        _ => value.clone(),
    }
}

/// Like [`normalize_json`], dropping the keys the service adds on its own.
fn normalize_metadata(value: &Value) -> Value {
    match value.as_str().map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(mut map))) => {
            for key in SERVICE_METADATA_KEYS {
                map.remove(key);
            }
            Value::String(Value::Object(map).to_string())
        },
        _ => normalize_json(value),
    }
}

fn parse_json(input: &str, attribute: &str) -> Result<Option<Value>> {
    if input.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(input)
        .map(Some)
        .map_err(|err| ProviderError::Validation(format!("expanding JSON for `{attribute}`: {err}")))
}

fn flatten_json(input: Option<&Value>) -> String {
    match input {
        None | Some(Value::Null) => String::new(),
        Some(Value::Object(map)) if map.is_empty() => String::new(),
        Some(value) => value.to_string(),
    }
}

/// `azurestack_policy_assignment`
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyAssignmentResource;

impl PolicyAssignmentResource {
    async fn apply(&self, ctx: &OperationContext, client: &Client, id: &PolicyAssignmentId, model: &PolicyAssignmentModel) -> Result<()> {
        let properties = AssignmentProperties {
            policy_definition_id: model.policy_definition_id.clone(),
            display_name: model.display_name.clone(),
            scope: id.scope.clone(),
            enforcement_mode: if model.enforcement_mode { "Default" } else { "DoNotEnforce" }.to_string(),
            description: model.description.clone(),
            parameters: parse_json(&model.parameters, "parameters")?,
            metadata: parse_json(&model.metadata, "metadata")?,
            not_scopes: (!model.not_scopes.is_empty()).then(|| model.not_scopes.clone()),
        };
        let mut body = ArmResource::new(id.id(), &id.name)
            .with_type("Microsoft.Authorization/policyAssignments")
            .with_properties(serde_json::to_value(properties)?);
        if let Some(identity) = expand_identity(&model.identity) {
            if model.location.is_empty() {
                return Err(ProviderError::Validation(
                    "`location` must be set when `identity` is assigned".to_string(),
                ));
            }
            body = body.with_identity(identity);
        }
        if !model.location.is_empty() {
            body = body.with_location(location::normalize(&model.location));
        }

        let action = format!("creating/updating {id}");
        let handle = ctx
            .run(&action, client.resources.begin_create_or_update(&id.id(), body))
            .await
            .with_context(|| action.clone())?;
        handle.wait(ctx).await.with_context(|| action)?;

        debug!(id = %id.id(), "waiting for policy assignment to become available");
        StateWaiter::new(["404"], ["200"])
            .min_timeout(Duration::from_secs(10))
            .continuous_target_occurence(10)
            .describe(id.to_string())
            .within(ctx)
            .wait(move || async move {
                match client.resources.get(&id.id()).await {
                    Ok(resource) => Ok(Refresh::found(Some(resource), "200")),
                    Err(err) if err.is_not_found() => Ok(Refresh::found(None, "404")),
                    Err(err) => Err(err),
                }
            })
            .await
            .with_context(|| format!("waiting for {id} to become available"))?;
        Ok(())
    }

    fn refresh(&self, id: &PolicyAssignmentId, resp: ArmResource, state: PolicyAssignmentModel) -> Result<PolicyAssignmentModel> {
        let props: AssignmentProperties = if resp.properties.is_null() {
            AssignmentProperties::default()
        } else {
            serde_json::from_value(resp.properties)
                .map_err(ProviderError::from)
                .with_context(|| format!("decoding properties of {id}"))?
        };
        let metadata = flatten_json(props.metadata.as_ref());
        Ok(PolicyAssignmentModel {
            id: id.id(),
            name: if resp.name.is_empty() { id.name.clone() } else { resp.name },
            scope: if props.scope.is_empty() { id.scope.clone() } else { props.scope },
            policy_definition_id: props.policy_definition_id,
            description: props.description,
            display_name: props.display_name,
            location: resp.location.as_deref().map(location::normalize).unwrap_or(state.location),
            identity: flatten_identity(resp.identity),
            parameters: flatten_json(props.parameters.as_ref()),
            enforcement_mode: props.enforcement_mode != "DoNotEnforce",
            not_scopes: props.not_scopes.unwrap_or_default(),
            metadata: if metadata.is_empty() { state.metadata } else { metadata },
        })
    }
}

#[async_trait]
impl Resource for PolicyAssignmentResource {
    type Model = PolicyAssignmentModel;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string().with_force_new().with_validator(validate::non_empty_string),
            )
            .with_attribute("scope", Attribute::required_string().with_force_new())
            .with_attribute(
                "policy_definition_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(validate_policy_definition_id),
            )
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("display_name", Attribute::optional_string())
            .with_attribute(
                "location",
                Attribute::optional_string()
                    .with_force_new()
                    .with_state_func(location::normalize_value),
            )
            .with_attribute(
                "parameters",
                Attribute::optional_string()
                    .with_force_new()
                    .with_validator(validate::string_is_json)
                    .with_state_func(normalize_json),
            )
            .with_attribute(
                "enforcement_mode",
                Attribute::optional_bool().with_default(json!(true)),
            )
            .with_attribute(
                "not_scopes",
                Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::optional()),
            )
            .with_attribute(
                "metadata",
                Attribute::new(AttributeType::String, AttributeFlags::optional_computed())
                    .with_validator(validate::string_is_json)
                    .with_state_func(normalize_metadata),
            )
            .with_block("identity", identity_schema())
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_secs(5 * 60),
            ..Timeouts::uniform(Duration::from_secs(30 * 60))
        }
    }

    async fn create(&self, ctx: &OperationContext, client: &Client, model: PolicyAssignmentModel) -> Result<PolicyAssignmentModel> {
        let id = PolicyAssignmentId::new(&model.scope, &model.name);

        let lookup = format!("checking for presence of existing {id}");
        match ctx.run(&lookup, client.resources.get(&id.id())).await {
            Ok(existing) => return Err(ProviderError::requires_import(RESOURCE_TYPE, &existing.id)),
            Err(err) if err.is_not_found() => {},
            Err(err) => return Err(err.context(lookup)),
        }

        self.apply(ctx, client, &id, &model).await?;
        info!(id = %id.id(), "created policy assignment");

        let state = PolicyAssignmentModel { id: id.id(), ..model };
        self.read(ctx, client, state)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{id} disappeared after being created")))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        client: &Client,
        state: PolicyAssignmentModel,
    ) -> Result<Option<PolicyAssignmentModel>> {
        let id = PolicyAssignmentId::parse(&state.id)?;

        let action = format!("retrieving {id}");
        let resp = match ctx.run(&action, client.resources.get(&id.id())).await {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => return removed_from_state(&id),
            Err(err) => return Err(err.context(action)),
        };

        self.refresh(&id, resp, state).map(Some)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Client,
        prior: PolicyAssignmentModel,
        planned: PolicyAssignmentModel,
    ) -> Result<PolicyAssignmentModel> {
        let id = PolicyAssignmentId::parse(&prior.id)?;
        self.apply(ctx, client, &id, &planned).await?;

        let state = PolicyAssignmentModel { id: id.id(), ..planned };
        self.read(ctx, client, state)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{id} disappeared after being updated")))
    }

    async fn delete(&self, ctx: &OperationContext, client: &Client, state: PolicyAssignmentModel) -> Result<()> {
        let id = PolicyAssignmentId::parse(&state.id)?;

        let action = format!("deleting {id}");
        let handle = match ctx.run(&action, client.resources.begin_delete(&id.id())).await {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.context(action)),
        };
        handle.wait(ctx).await.with_context(|| action)?;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<PolicyAssignmentModel> {
        let parsed = PolicyAssignmentId::parse(id)?;
        Ok(PolicyAssignmentModel {
            id: parsed.id(),
            name: parsed.name,
            scope: parsed.scope,
            ..PolicyAssignmentModel::default()
        })
    }
}
