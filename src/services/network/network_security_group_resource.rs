use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::security_rule::{self, SecurityRule};
use super::NETWORK_SECURITY_GROUP_RESOURCE_NAME;
use crate::client::{ArmResource, Client};
use crate::error::{ProviderError, Result, ResultExt};
use crate::location;
use crate::resource::{removed_from_state, Resource};
use crate::resource_id::{NetworkSecurityGroupId, ResourceIdFormatter};
use crate::schema::{Attribute, Schema};
use crate::services::wait_for_provisioned;
use crate::tags::{self, Tags};
use crate::timeouts::OperationContext;
use crate::validate;

/// State of `azurestack_network_security_group`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSecurityGroupModel {
    /// ARM ID, set once created.
    pub id: String,
    /// Group name.
    pub name: String,
    /// Resource group holding the group.
    pub resource_group_name: String,
    /// Normalized location.
    pub location: String,
    /// Inline rules. The whole list is written on every change.
    pub security_rule: Vec<SecurityRule>,
    /// Resource tags.
    #[serde(deserialize_with = "tags::deserialize")]
    pub tags: Tags,
}

/// `azurestack_network_security_group`
///
/// Writes hold the group's name lock, which the subnet association takes as
/// well, so rule changes and association changes never interleave.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkSecurityGroupResource;

impl NetworkSecurityGroupResource {
    async fn apply(
        &self,
        ctx: &OperationContext,
        client: &Client,
        id: &NetworkSecurityGroupId,
        model: &NetworkSecurityGroupModel,
    ) -> Result<()> {
        let body = ArmResource::new(id.id(), &id.name)
            .with_type("Microsoft.Network/networkSecurityGroups")
            .with_location(location::normalize(&model.location))
            .with_tags(model.tags.clone())
            .with_properties(json!({
                "securityRules": security_rule::expand(&model.security_rule)?,
            }));

        let _lock = client
            .locks
            .lock_by_name(&id.name, NETWORK_SECURITY_GROUP_RESOURCE_NAME)
            .await;

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
impl Resource for NetworkSecurityGroupResource {
    type Model = NetworkSecurityGroupModel;

    fn resource_type(&self) -> &'static str {
        NETWORK_SECURITY_GROUP_RESOURCE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(validate::non_empty_string),
            )
            .with_attribute(
                "resource_group_name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(validate::resource_group_name),
            )
            .with_attribute("location", Attribute::location())
            .with_attribute("tags", Attribute::tags())
            .with_block("security_rule", security_rule::schema())
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Client,
        model: NetworkSecurityGroupModel,
    ) -> Result<NetworkSecurityGroupModel> {
        let id = NetworkSecurityGroupId::new(client.subscription_id(), &model.resource_group_name, &model.name);

        let lookup = format!("checking for presence of existing {id}");
        match ctx.run(&lookup, client.resources.get(&id.id())).await {
            Ok(existing) => {
                return Err(ProviderError::requires_import(NETWORK_SECURITY_GROUP_RESOURCE_NAME, &existing.id))
            },
            Err(err) if err.is_not_found() => {},
            Err(err) => return Err(err.context(lookup)),
        }

        self.apply(ctx, client, &id, &model).await?;
        wait_for_provisioned(ctx, client, &id.id(), &id.to_string()).await?;
        info!(id = %id.id(), rules = model.security_rule.len(), "created network security group");

        let state = NetworkSecurityGroupModel { id: id.id(), ..model };
        self.read(ctx, client, state)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{id} disappeared after being created")))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        client: &Client,
        state: NetworkSecurityGroupModel,
    ) -> Result<Option<NetworkSecurityGroupModel>> {
        let id = NetworkSecurityGroupId::parse(&state.id)?;

        let action = format!("retrieving {id}");
        let resp = match ctx.run(&action, client.resources.get(&id.id())).await {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => return removed_from_state(&id),
            Err(err) => return Err(err.context(action)),
        };

        let security_rule = security_rule::flatten(resp.property("securityRules"))
            .with_context(|| format!("flattening `security_rule` for {id}"))?;

        Ok(Some(NetworkSecurityGroupModel {
            id: id.id(),
            name: id.name,
            resource_group_name: id.resource_group,
            location: location::normalize_nilable(resp.location.as_deref()),
            security_rule,
            tags: resp.tags,
        }))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Client,
        prior: NetworkSecurityGroupModel,
        planned: NetworkSecurityGroupModel,
    ) -> Result<NetworkSecurityGroupModel> {
        let id = NetworkSecurityGroupId::parse(&prior.id)?;
        self.apply(ctx, client, &id, &planned).await?;
        wait_for_provisioned(ctx, client, &id.id(), &id.to_string()).await?;

        let state = NetworkSecurityGroupModel { id: id.id(), ..planned };
        self.read(ctx, client, state)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{id} disappeared after being updated")))
    }

    async fn delete(&self, ctx: &OperationContext, client: &Client, state: NetworkSecurityGroupModel) -> Result<()> {
        let id = NetworkSecurityGroupId::parse(&state.id)?;

        let _lock = client
            .locks
            .lock_by_name(&id.name, NETWORK_SECURITY_GROUP_RESOURCE_NAME)
            .await;

        let action = format!("deleting {id}");
        let handle = match ctx.run(&action, client.resources.begin_delete(&id.id())).await {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => {
                debug!(id = %id.id(), "network security group already deleted");
                return Ok(());
            },
            Err(err) => return Err(err.context(action)),
        };
        handle.wait(ctx).await.with_context(|| action)?;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<NetworkSecurityGroupModel> {
        let parsed = NetworkSecurityGroupId::parse(id)?;
        Ok(NetworkSecurityGroupModel {
            id: parsed.id(),
            name: parsed.name,
            resource_group_name: parsed.resource_group,
            ..NetworkSecurityGroupModel::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::DynResource;
    use crate::testing::{test_client, FakeResourceManager, TEST_SUBSCRIPTION_ID};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn handler() -> Arc<dyn DynResource> {
        Arc::new(NetworkSecurityGroupResource)
    }

    fn nsg_id(name: &str) -> String {
        format!("/subscriptions/{TEST_SUBSCRIPTION_ID}/resourceGroups/rg/providers/Microsoft.Network/networkSecurityGroups/{name}")
    }

    fn config() -> Value {
        json!({
            "name": "web",
            "resource_group_name": "rg",
            "location": "Local",
            "security_rule": [{
                "name": "ssh",
                "protocol": "Tcp",
                "source_port_range": "*",
                "destination_port_range": "22",
                "source_address_prefix": "*",
                "destination_address_prefix": "*",
                "access": "Allow",
                "priority": 100,
                "direction": "Inbound",
            }],
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_sends_rules() {
        let fake = Arc::new(FakeResourceManager::new());
        let client = test_client(fake.clone());

        let state = handler().create(&client, config()).await.unwrap();
        assert_eq!(state["id"], nsg_id("web"));
        assert_eq!(state["location"], "local");
        assert_eq!(state["security_rule"][0]["destination_port_range"], "22");
        assert_eq!(state["security_rule"][0]["priority"], 100);

        let stored = fake.resource(&nsg_id("web")).unwrap();
        let rule = &stored.properties["securityRules"][0];
        assert_eq!(rule["name"], "ssh");
        assert_eq!(rule["properties"]["direction"], "Inbound");
    }

    #[tokio::test]
    async fn test_create_requires_import() {
        let fake = Arc::new(FakeResourceManager::new().with_resource(ArmResource::new(nsg_id("web"), "web")));
        let err = handler().create(&test_client(fake), config()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_name_lock() {
        let fake = Arc::new(FakeResourceManager::new());
        let client = test_client(fake.clone());
        let guard = client
            .locks
            .lock_by_name("web", NETWORK_SECURITY_GROUP_RESOURCE_NAME)
            .await;

        let task = {
            let client = client.clone();
            tokio::spawn(async move { handler().create(&client, config()).await })
        };

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!task.is_finished());
        assert_eq!(fake.calls("begin_create_or_update"), 0);

        drop(guard);
        let state = task.await.unwrap().unwrap();
        assert_eq!(state["name"], "web");
        assert_eq!(fake.calls("begin_create_or_update"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_replaces_rules() {
        let fake = Arc::new(FakeResourceManager::new());
        let client = test_client(fake.clone());
        let prior = handler().create(&client, config()).await.unwrap();

        let mut planned = prior.clone();
        planned["security_rule"] = json!([]);
        planned["tags"] = json!({"env": "prod"});
        let state = handler().update(&client, prior, planned).await.unwrap();

        assert_eq!(state["security_rule"], json!([]));
        assert_eq!(state["tags"], json!({"env": "prod"}));
    }

    #[tokio::test]
    async fn test_read_and_delete_missing_group() {
        let fake = Arc::new(FakeResourceManager::new());
        let client = test_client(fake);
        let state = json!({"id": nsg_id("gone"), "name": "gone", "resource_group_name": "rg"});

        assert!(handler().read(&client, state.clone()).await.unwrap().is_none());
        handler().delete(&client, state).await.unwrap();
    }

    #[tokio::test]
    async fn test_import_rejects_other_types() {
        let client = test_client(Arc::new(FakeResourceManager::new()));
        let err = handler()
            .import(&client, &format!("/subscriptions/{TEST_SUBSCRIPTION_ID}/resourceGroups/rg"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResourceId { .. }));
    }
}
