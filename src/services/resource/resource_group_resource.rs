use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{ArmResource, Client};
use crate::error::{ProviderError, Result, ResultExt};
use crate::location;
use crate::resource::{removed_from_state, Resource};
use crate::resource_id::{ResourceGroupId, ResourceIdFormatter};
use crate::schema::{Attribute, Schema};
use crate::services::wait_for_provisioned;
use crate::tags::{self, Tags};
use crate::timeouts::{OperationContext, Timeouts};
use crate::validate;

const RESOURCE_TYPE: &str = "azurestack_resource_group";

/// State of `azurestack_resource_group`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGroupModel {
    /// ARM ID, set once created.
    pub id: String,
    /// Resource group name.
    pub name: String,
    /// Normalized location.
    pub location: String,
    /// Resource tags.
    #[serde(deserialize_with = "tags::deserialize")]
    pub tags: Tags,
}

/// `azurestack_resource_group`
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceGroupResource;

impl ResourceGroupResource {
    async fn apply(
        &self,
        ctx: &OperationContext,
        client: &Client,
        id: &ResourceGroupId,
        model: &ResourceGroupModel,
    ) -> Result<()> {
        let body = ArmResource::new(id.id(), &id.resource_group)
            .with_type("Microsoft.Resources/resourceGroups")
            .with_location(location::normalize(&model.location))
            .with_tags(model.tags.clone());

        let action = format!("creating/updating {id}");
        let handle = ctx
            .run(&action, client.resources.begin_create_or_update(&id.id(), body))
            .await
            .with_context(|| action.clone())?;
        handle.wait(ctx).await.with_context(|| action)?;
        Ok(())
    }
}

#[async_trait]
impl Resource for ResourceGroupResource {
    type Model = ResourceGroupModel;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(validate::resource_group_name),
            )
            .with_attribute("location", Attribute::location())
            .with_attribute("tags", Attribute::tags())
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_secs(5 * 60),
            ..Timeouts::uniform(Duration::from_secs(90 * 60))
        }
    }

    async fn create(&self, ctx: &OperationContext, client: &Client, model: ResourceGroupModel) -> Result<ResourceGroupModel> {
        let id = ResourceGroupId::new(client.subscription_id(), &model.name);

        let lookup = format!("checking for presence of existing {id}");
        match ctx.run(&lookup, client.resources.get(&id.id())).await {
            Ok(existing) => return Err(ProviderError::requires_import(RESOURCE_TYPE, &existing.id)),
            Err(err) if err.is_not_found() => {},
            Err(err) => return Err(err.context(lookup)),
        }

        self.apply(ctx, client, &id, &model).await?;
        wait_for_provisioned(ctx, client, &id.id(), &id.to_string()).await?;
        info!(id = %id.id(), "created resource group");

        let state = ResourceGroupModel { id: id.id(), ..model };
        self.read(ctx, client, state)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{id} disappeared after being created")))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        client: &Client,
        state: ResourceGroupModel,
    ) -> Result<Option<ResourceGroupModel>> {
        let id = ResourceGroupId::parse(&state.id)?;

        let action = format!("retrieving {id}");
        let resp = match ctx.run(&action, client.resources.get(&id.id())).await {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => return removed_from_state(&id),
            Err(err) => return Err(err.context(action)),
        };

        Ok(Some(ResourceGroupModel {
            id: id.id(),
            name: if resp.name.is_empty() { id.resource_group } else { resp.name },
            location: location::normalize_nilable(resp.location.as_deref()),
            tags: resp.tags,
        }))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Client,
        prior: ResourceGroupModel,
        planned: ResourceGroupModel,
    ) -> Result<ResourceGroupModel> {
        let id = ResourceGroupId::parse(&prior.id)?;
        self.apply(ctx, client, &id, &planned).await?;

        let state = ResourceGroupModel { id: id.id(), ..planned };
        self.read(ctx, client, state)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{id} disappeared after being updated")))
    }

    async fn delete(&self, ctx: &OperationContext, client: &Client, state: ResourceGroupModel) -> Result<()> {
        let id = ResourceGroupId::parse(&state.id)?;

        if client.features.resource_group.prevent_deletion_if_contains_resources {
            let action = format!("listing Resources within {id}");
            let nested = ctx
                .run(&action, client.resources.list_by_resource_group(&id))
                .await
                .with_context(|| action)?;
            if !nested.is_empty() {
                let ids: Vec<String> = nested.into_iter().map(|r| r.id).collect();
                return Err(contains_resources(&id, &ids));
            }
        }

        let action = format!("deleting {id}");
        let handle = match ctx.run(&action, client.resources.begin_delete(&id.id())).await {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => {
                debug!(id = %id.id(), "resource group already deleted");
                return Ok(());
            },
            Err(err) => return Err(err.context(action)),
        };
        handle.wait(ctx).await.with_context(|| action)?;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<ResourceGroupModel> {
        let parsed = ResourceGroupId::parse(id)?;
        Ok(ResourceGroupModel {
            id: parsed.id(),
            name: parsed.resource_group,
            ..ResourceGroupModel::default()
        })
    }
}

fn contains_resources(id: &ResourceGroupId, nested: &[String]) -> ProviderError {
    let listing = nested
        .iter()
        .map(|n| format!("* `{n}`"))
        .collect::<Vec<_>>()
        .join("\n");
    ProviderError::Conflict(format!(
        "deleting {id}: the Resource Group still contains Resources.

Terraform is configured to check for Resources within the Resource Group when deleting the Resource Group and
raise an error if nested Resources still exist, to avoid unintentionally deleting these Resources.

Terraform has detected that the following Resources still exist within the Resource Group:

{listing}

You must either remove these Resources, or disable this behaviour using the feature flag
`prevent_deletion_if_contains_resources` within the `features` block when configuring the Provider, for example:

provider \"azurestack\" {{
  features {{
    resource_group {{
      prevent_deletion_if_contains_resources = false
    }}
  }}
}}

When that feature flag is set, Terraform will skip checking for any Resources within the Resource Group and
delete it using the Azure API directly (which will clear up any nested resources)."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::UserFeatures;
    use crate::resource::DynResource;
    use crate::testing::{test_client, test_client_with_features, FakeResourceManager, TEST_SUBSCRIPTION_ID};
    use serde_json::json;
    use std::sync::Arc;

    fn handler() -> Arc<dyn DynResource> {
        Arc::new(ResourceGroupResource)
    }

    fn rg_id(name: &str) -> String {
        format!("/subscriptions/{TEST_SUBSCRIPTION_ID}/resourceGroups/{name}")
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_read() {
        let fake = Arc::new(FakeResourceManager::new());
        let client = test_client(fake.clone());

        let state = handler().create(&client, json!({"name": "example", "location": "West Europe", "tags": {"env": "test"}}))
            .await
            .unwrap();

        assert_eq!(state["id"], rg_id("example"));
        assert_eq!(state["location"], "westeurope");
        assert_eq!(state["tags"], json!({"env": "test"}));
        assert!(fake.contains(&rg_id("example")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_visibility() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.set_not_found_after_create(3);
        fake.set_operation_polls(2);
        let client = test_client(fake.clone());

        let state = handler().create(&client, json!({"name": "example", "location": "local"}))
            .await
            .unwrap();
        assert_eq!(state["name"], "example");
        // one pre-check, three hidden gets, one visible, one final read
        assert_eq!(fake.calls("get"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_honours_timeouts_block() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.set_operation_polls(u32::MAX);
        let client = test_client(fake.clone());

        let start = tokio::time::Instant::now();
        let err = handler()
            .create(
                &client,
                json!({"name": "example", "location": "local", "timeouts": [{"create": "30s"}]}),
            )
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30), "gave up after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(35), "overran the deadline: {elapsed:?}");
        let ProviderError::Context { action, source } = &err else {
            panic!("expected context, got {err:?}");
        };
        assert!(action.starts_with("creating/updating Resource Group \"example\""));
        assert!(matches!(**source, ProviderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_oversized_timeout() {
        let fake = Arc::new(FakeResourceManager::new());
        let client = test_client(fake.clone());

        let err = handler()
            .create(
                &client,
                json!({"name": "example", "location": "local", "timeouts": [{"create": "9999999999999999h"}]}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert_eq!(fake.calls("get"), 0);
    }

    #[tokio::test]
    async fn test_create_requires_import_when_existing() {
        let fake = Arc::new(FakeResourceManager::new().with_resource(ArmResource::new(rg_id("example"), "example")));
        let client = test_client(fake.clone());

        let err = handler().create(&client, json!({"name": "example", "location": "local"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
        assert!(err.to_string().contains("azurestack_resource_group"));
        assert_eq!(fake.calls("begin_create_or_update"), 0);
    }

    #[tokio::test]
    async fn test_read_removes_missing_group_from_state() {
        let client = test_client(Arc::new(FakeResourceManager::new()));
        let refreshed = handler().read(&client, json!({"id": rg_id("gone"), "name": "gone", "location": "local"}))
            .await
            .unwrap();
        assert!(refreshed.is_none());
    }

    #[tokio::test]
    async fn test_read_propagates_other_errors() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.fail_next("get", 500, "InternalServerError");
        let client = test_client(fake);

        let err = handler().read(&client, json!({"id": rg_id("rg"), "name": "rg", "location": "local"}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("retrieving Resource Group \"rg\""));
    }

    #[tokio::test]
    async fn test_update_tags() {
        let fake = Arc::new(FakeResourceManager::new().with_resource(
            ArmResource::new(rg_id("rg"), "rg").with_location("local"),
        ));
        let client = test_client(fake.clone());

        let prior = json!({"id": rg_id("rg"), "name": "rg", "location": "local", "tags": {}});
        let planned = json!({"id": rg_id("rg"), "name": "rg", "location": "local", "tags": {"env": "prod"}});
        let state = handler().update(&client, prior, planned).await.unwrap();

        assert_eq!(state["tags"], json!({"env": "prod"}));
        assert_eq!(fake.resource(&rg_id("rg")).unwrap().tags.get("env").map(String::as_str), Some("prod"));
    }

    #[tokio::test]
    async fn test_delete_refuses_non_empty_group_when_feature_enabled() {
        let nsg = format!("{}/providers/Microsoft.Network/networkSecurityGroups/nsg", rg_id("rg"));
        let fake = Arc::new(
            FakeResourceManager::new()
                .with_resource(ArmResource::new(rg_id("rg"), "rg"))
                .with_resource(ArmResource::new(&nsg, "nsg")),
        );
        let mut features = UserFeatures::default();
        features.resource_group.prevent_deletion_if_contains_resources = true;
        let client = test_client_with_features(fake.clone(), features);

        let err = handler().delete(&client, json!({"id": rg_id("rg"), "name": "rg", "location": "local"}))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Conflict(_)));
        assert!(err.to_string().contains(&format!("* `{nsg}`")));
        assert!(fake.contains(&rg_id("rg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_for_operation() {
        let nsg = format!("{}/providers/Microsoft.Network/networkSecurityGroups/nsg", rg_id("rg"));
        let fake = Arc::new(
            FakeResourceManager::new()
                .with_resource(ArmResource::new(rg_id("rg"), "rg"))
                .with_resource(ArmResource::new(&nsg, "nsg")),
        );
        fake.set_operation_polls(3);
        let client = test_client(fake.clone());

        handler().delete(&client, json!({"id": rg_id("rg"), "name": "rg", "location": "local"}))
            .await
            .unwrap();
        assert!(!fake.contains(&rg_id("rg")));
        assert!(!fake.contains(&nsg));

        // deleting again is a no-op
        handler().delete(&client, json!({"id": rg_id("rg"), "name": "rg", "location": "local"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_import() {
        let fake = Arc::new(FakeResourceManager::new().with_resource(
            ArmResource::new(rg_id("rg"), "rg").with_location("Local"),
        ));
        let client = test_client(fake);

        let state = handler().import(&client, &rg_id("rg")).await.unwrap();
        assert_eq!(state["name"], "rg");
        assert_eq!(state["location"], "local");

        let err = handler().import(&client, &format!("{}/providers/Microsoft.Network/networkSecurityGroups/nsg", rg_id("rg")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResourceId { .. }));

        let err = handler().import(&client, &rg_id("missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_schema_includes_timeouts() {
        let schema = DynResource::schema(&ResourceGroupResource);
        assert!(schema.block.blocks.contains_key("timeouts"));
        assert_eq!(schema.timeouts.unwrap().create, Duration::from_secs(90 * 60));
        assert!(schema.attribute("name").unwrap().force_new);
    }
}
