use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::error::{ProviderError, Result};
use crate::location;
use crate::resource::DataSource;
use crate::resource_id::{ResourceGroupId, ResourceIdFormatter};
use crate::schema::{Attribute, Schema};
use crate::tags::{self, Tags};
use crate::timeouts::OperationContext;
use crate::validate;

/// Configuration and result of the `azurestack_resource_group` data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGroupDataSourceModel {
    /// ARM ID.
    pub id: String,
    /// Name to look up.
    pub name: String,
    /// Location of the group.
    pub location: String,
    /// Tags of the group.
    #[serde(deserialize_with = "tags::deserialize")]
    pub tags: Tags,
}

/// Data source `azurestack_resource_group`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceGroupDataSource;

#[async_trait]
impl DataSource for ResourceGroupDataSource {
    type Model = ResourceGroupDataSourceModel;

    fn resource_type(&self) -> &'static str {
        "azurestack_resource_group"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(validate::resource_group_name),
            )
            .with_attribute("location", Attribute::computed_string())
            .with_attribute("tags", Attribute::tags_computed())
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        client: &Client,
        config: ResourceGroupDataSourceModel,
    ) -> Result<ResourceGroupDataSourceModel> {
        let id = ResourceGroupId::new(client.subscription_id(), &config.name);

        let action = format!("retrieving {id}");
        let resp = match ctx.run(&action, client.resources.get(&id.id())).await {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => {
                return Err(ProviderError::NotFound(format!("{id} was not found")))
            },
            Err(err) => return Err(err.context(action)),
        };

        Ok(ResourceGroupDataSourceModel {
            id: id.id(),
            name: id.resource_group,
            location: location::normalize_nilable(resp.location.as_deref()),
            tags: resp.tags,
        })
    }
}
