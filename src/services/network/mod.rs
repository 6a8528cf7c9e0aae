//! Network security groups and their subnet associations.

use std::sync::Arc;

use crate::resource::{DynDataSource, DynResource};
use crate::services::ServiceRegistration;

mod network_security_group_data_source;
mod network_security_group_resource;
mod security_rule;
mod subnet_network_security_group_association_resource;

pub use network_security_group_data_source::{NetworkSecurityGroupDataSource, NetworkSecurityGroupDataSourceModel};
pub use network_security_group_resource::{NetworkSecurityGroupModel, NetworkSecurityGroupResource};
pub use security_rule::SecurityRule;
pub use subnet_network_security_group_association_resource::{
    SubnetNetworkSecurityGroupAssociationModel, SubnetNetworkSecurityGroupAssociationResource,
};

/// Lock namespace for network security groups.
pub const NETWORK_SECURITY_GROUP_RESOURCE_NAME: &str = "azurestack_network_security_group";

/// Lock namespace for virtual networks.
pub const VIRTUAL_NETWORK_RESOURCE_NAME: &str = "azurestack_virtual_network";

/// Lock namespace for subnets.
pub const SUBNET_RESOURCE_NAME: &str = "azurestack_subnet";

/// The `network` service.
#[derive(Debug, Clone, Copy, Default)]
pub struct Registration;

impl ServiceRegistration for Registration {
    fn name(&self) -> &'static str {
        "Network"
    }

    fn resources(&self) -> Vec<Arc<dyn DynResource>> {
        vec![
            Arc::new(NetworkSecurityGroupResource),
            Arc::new(SubnetNetworkSecurityGroupAssociationResource),
        ]
    }

    fn data_sources(&self) -> Vec<Arc<dyn DynDataSource>> {
        vec![Arc::new(NetworkSecurityGroupDataSource)]
    }
}
