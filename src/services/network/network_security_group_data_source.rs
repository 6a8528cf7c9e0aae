use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::security_rule::{self, SecurityRule};
use super::NETWORK_SECURITY_GROUP_RESOURCE_NAME;
use crate::client::Client;
use crate::error::{ProviderError, Result, ResultExt};
use crate::location;
use crate::resource::DataSource;
use crate::resource_id::{NetworkSecurityGroupId, ResourceIdFormatter};
use crate::schema::{Attribute, Schema};
use crate::tags::{self, Tags};
use crate::timeouts::OperationContext;
use crate::validate;

/// Configuration and result of the `azurestack_network_security_group` data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSecurityGroupDataSourceModel {
    /// ARM ID.
    pub id: String,
    /// Name to look up.
    pub name: String,
    /// Resource group to look in.
    pub resource_group_name: String,
    /// Location of the group.
    pub location: String,
    /// Rules of the group.
    pub security_rule: Vec<SecurityRule>,
    /// Tags of the group.
    #[serde(deserialize_with = "tags::deserialize")]
    pub tags: Tags,
}

/// Data source `azurestack_network_security_group`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkSecurityGroupDataSource;

#[async_trait]
impl DataSource for NetworkSecurityGroupDataSource {
    type Model = NetworkSecurityGroupDataSourceModel;

    fn resource_type(&self) -> &'static str {
        NETWORK_SECURITY_GROUP_RESOURCE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_validator(validate::non_empty_string))
            .with_attribute(
                "resource_group_name",
                Attribute::required_string().with_validator(validate::resource_group_name),
            )
            .with_attribute("location", Attribute::computed_string())
            .with_attribute("tags", Attribute::tags_computed())
            .with_block("security_rule", security_rule::computed_schema())
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        client: &Client,
        config: NetworkSecurityGroupDataSourceModel,
    ) -> Result<NetworkSecurityGroupDataSourceModel> {
        let id = NetworkSecurityGroupId::new(client.subscription_id(), &config.resource_group_name, &config.name);

        let action = format!("retrieving {id}");
        let resp = match ctx.run(&action, client.resources.get(&id.id())).await {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => return Err(ProviderError::NotFound(format!("{id} was not found"))),
            Err(err) => return Err(err.context(action)),
        };

        Ok(NetworkSecurityGroupDataSourceModel {
            id: id.id(),
            security_rule: security_rule::flatten(resp.property("securityRules"))
                .with_context(|| format!("flattening `security_rule` for {id}"))?,
            name: id.name,
            resource_group_name: id.resource_group,
            location: location::normalize_nilable(resp.location.as_deref()),
            tags: resp.tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ArmResource;
    use crate::resource::DynDataSource;
    use crate::testing::{test_client, FakeResourceManager, TEST_SUBSCRIPTION_ID};
    use serde_json::json;
    use std::sync::Arc;

    fn handler() -> Arc<dyn DynDataSource> {
        Arc::new(NetworkSecurityGroupDataSource)
    }

    #[tokio::test]
    async fn test_read_flattens_rules() {
        let id = format!("/subscriptions/{TEST_SUBSCRIPTION_ID}/resourceGroups/rg/providers/Microsoft.Network/networkSecurityGroups/web");
        let fake = Arc::new(FakeResourceManager::new().with_resource(
            ArmResource::new(&id, "web")
                .with_location("Local")
                .with_properties(json!({
                    "securityRules": [{
                        "name": "https",
                        "properties": {
                            "protocol": "Tcp",
                            "destinationPortRange": "443",
                            "sourceAddressPrefixes": ["10.0.0.0/8", "192.168.0.0/16"],
                            "access": "Allow",
                            "priority": 200,
                            "direction": "Inbound",
                        },
                    }],
                })),
        ));

        let out = handler()
            .read(&test_client(fake), json!({"name": "web", "resource_group_name": "rg"}))
            .await
            .unwrap();
        assert_eq!(out["id"], id);
        assert_eq!(out["location"], "local");
        let rule = &out["security_rule"][0];
        assert_eq!(rule["name"], "https");
        assert_eq!(rule["destination_port_range"], "443");
        assert_eq!(rule["source_address_prefixes"], json!(["10.0.0.0/8", "192.168.0.0/16"]));
        assert_eq!(rule["priority"], 200);
    }

    #[tokio::test]
    async fn test_read_missing_group() {
        let err = handler()
            .read(
                &test_client(Arc::new(FakeResourceManager::new())),
                json!({"name": "web", "resource_group_name": "rg"}),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Network Security Group \"web\""));
    }
}
