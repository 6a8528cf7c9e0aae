//! Resource groups.

use std::sync::Arc;

use crate::resource::{DynDataSource, DynResource};
use crate::services::ServiceRegistration;

mod resource_group_data_source;
mod resource_group_resource;

pub use resource_group_data_source::{ResourceGroupDataSource, ResourceGroupDataSourceModel};
pub use resource_group_resource::{ResourceGroupModel, ResourceGroupResource};

/// The `resource` service.
#[derive(Debug, Clone, Copy, Default)]
pub struct Registration;

impl ServiceRegistration for Registration {
    fn name(&self) -> &'static str {
        "Resources"
    }

    fn resources(&self) -> Vec<Arc<dyn DynResource>> {
        vec![Arc::new(ResourceGroupResource)]
    }

    fn data_sources(&self) -> Vec<Arc<dyn DynDataSource>> {
        vec![Arc::new(ResourceGroupDataSource)]
    }
}
