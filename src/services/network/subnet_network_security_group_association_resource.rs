use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{NETWORK_SECURITY_GROUP_RESOURCE_NAME, SUBNET_RESOURCE_NAME, VIRTUAL_NETWORK_RESOURCE_NAME};
use crate::client::{ArmResource, Client};
use crate::error::{ProviderError, Result, ResultExt};
use crate::locks::{lock_key, LockSet};
use crate::resource::{removed_from_state, Resource};
use crate::resource_id::{validate_resource_id, NetworkSecurityGroupId, ResourceIdFormatter, SubnetId};
use crate::schema::{Attribute, Schema};
use crate::timeouts::OperationContext;

const RESOURCE_TYPE: &str = "azurestack_subnet_network_security_group_association";

/// State of `azurestack_subnet_network_security_group_association`. The ID is
/// the subnet's ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubnetNetworkSecurityGroupAssociationModel {
    /// Same as `subnet_id`.
    pub id: String,
    /// Subnet to attach the group to.
    pub subnet_id: String,
    /// Group to attach.
    pub network_security_group_id: String,
}

/// `azurestack_subnet_network_security_group_association`
///
/// Attaches an existing network security group to an existing subnet by
/// rewriting the subnet. Both writes lock the group, the subnet and its
/// virtual network.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubnetNetworkSecurityGroupAssociationResource;

async fn lock_association(client: &Client, subnet: &SubnetId, nsg: &NetworkSecurityGroupId) -> LockSet {
    client
        .locks
        .lock_all([
            lock_key(&nsg.name, NETWORK_SECURITY_GROUP_RESOURCE_NAME),
            lock_key(&subnet.name, SUBNET_RESOURCE_NAME),
            lock_key(&subnet.virtual_network_name, VIRTUAL_NETWORK_RESOURCE_NAME),
        ])
        .await
}

/// The ID of the group attached to a subnet, if any.
fn attached_group(subnet: &ArmResource) -> Option<&str> {
    subnet
        .property("networkSecurityGroup")
        .and_then(|nsg| nsg.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

async fn put_subnet(ctx: &OperationContext, client: &Client, subnet: ArmResource, action: String) -> Result<()> {
    let id = subnet.id.clone();
    let handle = ctx
        .run(&action, client.resources.begin_create_or_update(&id, subnet))
        .await
        .with_context(|| action.clone())?;
    handle.wait(ctx).await.with_context(|| format!("waiting for {action}"))?;
    Ok(())
}

#[async_trait]
impl Resource for SubnetNetworkSecurityGroupAssociationResource {
    type Model = SubnetNetworkSecurityGroupAssociationModel;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "subnet_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(validate_resource_id),
            )
            .with_attribute(
                "network_security_group_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(validate_resource_id),
            )
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Client,
        model: SubnetNetworkSecurityGroupAssociationModel,
    ) -> Result<SubnetNetworkSecurityGroupAssociationModel> {
        let subnet_id = SubnetId::parse(&model.subnet_id)?;
        let nsg_id = NetworkSecurityGroupId::parse(&model.network_security_group_id)?;

        let _locks = lock_association(client, &subnet_id, &nsg_id).await;

        let action = format!("retrieving {subnet_id}");
        let mut subnet = match ctx.run(&action, client.resources.get(&subnet_id.id())).await {
            Ok(subnet) => subnet,
            Err(err) if err.is_not_found() => {
                return Err(ProviderError::NotFound(format!("{subnet_id} was not found")))
            },
            Err(err) => return Err(err.context(action)),
        };

        if attached_group(&subnet).is_some() {
            // any attached group has to be imported, whichever it is
            return Err(ProviderError::requires_import(RESOURCE_TYPE, &subnet.id));
        }

        if !subnet.properties.is_object() {
            subnet.properties = json!({});
        }
        subnet.properties["networkSecurityGroup"] = json!({ "id": model.network_security_group_id });
        if subnet.id.is_empty() {
            subnet.id = subnet_id.id();
        }
        put_subnet(
            ctx,
            client,
            subnet,
            format!("updating Network Security Group Association for {subnet_id}"),
        )
        .await?;
        info!(subnet = %subnet_id.id(), nsg = %nsg_id.id(), "associated network security group");

        let action = format!("retrieving {subnet_id}");
        let read = ctx
            .run(&action, client.resources.get(&subnet_id.id()))
            .await
            .with_context(|| action)?;
        let id = if read.id.is_empty() { subnet_id.id() } else { read.id };

        Ok(SubnetNetworkSecurityGroupAssociationModel { id, ..model })
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        client: &Client,
        state: SubnetNetworkSecurityGroupAssociationModel,
    ) -> Result<Option<SubnetNetworkSecurityGroupAssociationModel>> {
        let subnet_id = SubnetId::parse(&state.id)?;

        let action = format!("retrieving {subnet_id}");
        let resp = match ctx.run(&action, client.resources.get(&subnet_id.id())).await {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => return removed_from_state(&subnet_id),
            Err(err) => return Err(err.context(action)),
        };

        let Some(nsg) = attached_group(&resp) else {
            return removed_from_state(format!("Network Security Group Association for {subnet_id}"));
        };

        Ok(Some(SubnetNetworkSecurityGroupAssociationModel {
            id: subnet_id.id(),
            subnet_id: if resp.id.is_empty() { subnet_id.id() } else { resp.id.clone() },
            network_security_group_id: nsg.to_string(),
        }))
    }

    async fn update(
        &self,
        _ctx: &OperationContext,
        _client: &Client,
        _prior: SubnetNetworkSecurityGroupAssociationModel,
        planned: SubnetNetworkSecurityGroupAssociationModel,
    ) -> Result<SubnetNetworkSecurityGroupAssociationModel> {
        // every argument forces replacement
        Ok(planned)
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Client,
        state: SubnetNetworkSecurityGroupAssociationModel,
    ) -> Result<()> {
        let subnet_id = SubnetId::parse(&state.id)?;

        let action = format!("retrieving {subnet_id}");
        let subnet = match ctx.run(&action, client.resources.get(&subnet_id.id())).await {
            Ok(subnet) => subnet,
            Err(err) if err.is_not_found() => {
                debug!(id = %subnet_id.id(), "subnet already deleted");
                return Ok(());
            },
            Err(err) => return Err(err.context(action)),
        };

        let Some(attached) = attached_group(&subnet) else {
            debug!(id = %subnet_id.id(), "subnet has no network security group");
            return Ok(());
        };
        let nsg_id = NetworkSecurityGroupId::parse(attached)?;

        let _locks = lock_association(client, &subnet_id, &nsg_id).await;

        // the subnet may have changed while waiting for the locks
        let mut subnet = match ctx.run(&action, client.resources.get(&subnet_id.id())).await {
            Ok(subnet) => subnet,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.context(action)),
        };
        if let Some(properties) = subnet.properties.as_object_mut() {
            properties.remove("networkSecurityGroup");
        }
        if subnet.id.is_empty() {
            subnet.id = subnet_id.id();
        }

        put_subnet(
            ctx,
            client,
            subnet,
            format!("removing Network Security Group Association from {subnet_id}"),
        )
        .await
    }

    fn import_state(&self, id: &str) -> Result<SubnetNetworkSecurityGroupAssociationModel> {
        let parsed = SubnetId::parse(id)?;
        Ok(SubnetNetworkSecurityGroupAssociationModel {
            id: parsed.id(),
            subnet_id: parsed.id(),
            ..SubnetNetworkSecurityGroupAssociationModel::default()
        })
    }
}
