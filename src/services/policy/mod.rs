//! Policy assignments.

use std::sync::Arc;

use crate::resource::{DynDataSource, DynResource};
use crate::services::ServiceRegistration;

mod policy_assignment_resource;

pub use policy_assignment_resource::{PolicyAssignmentIdentity, PolicyAssignmentModel, PolicyAssignmentResource};

/// The `policy` service.
#[derive(Debug, Clone, Copy, Default)]
pub struct Registration;

impl ServiceRegistration for Registration {
    fn name(&self) -> &'static str {
        "Policy"
    }

    fn resources(&self) -> Vec<Arc<dyn DynResource>> {
        vec![Arc::new(PolicyAssignmentResource)]
    }

    fn data_sources(&self) -> Vec<Arc<dyn DynDataSource>> {
        Vec::new()
    }
}
