//! The resources and data sources the provider serves, grouped by service.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{ArmResource, Client};
use crate::error::{ProviderError, Result};
use crate::poll::{Refresh, StateWaiter, RESPONSE_NOT_FOUND};
use crate::resource::{DynDataSource, DynResource};
use crate::timeouts::OperationContext;

pub mod network;
pub mod policy;
pub mod resource;

/// A service contributing resources and data sources to the provider.
pub trait ServiceRegistration: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Resources the service serves.
    fn resources(&self) -> Vec<Arc<dyn DynResource>>;

    /// Data sources the service serves.
    fn data_sources(&self) -> Vec<Arc<dyn DynDataSource>>;
}

/// Every service the provider ships.
pub fn supported() -> Vec<Box<dyn ServiceRegistration>> {
    vec![
        Box::new(network::Registration),
        Box::new(policy::Registration),
        Box::new(resource::Registration),
    ]
}

const PROVISIONING_PENDING: [&str; 5] = [RESPONSE_NOT_FOUND, "Accepted", "Creating", "Updating", "Provisioning"];

/// Wait until a freshly written resource is visible and reports `Succeeded`.
///
/// Resources that don't report a provisioning state count as succeeded.
pub(crate) async fn wait_for_provisioned(
    ctx: &OperationContext,
    client: &Client,
    id: &str,
    description: &str,
) -> Result<ArmResource> {
    let found = StateWaiter::new(PROVISIONING_PENDING, ["Succeeded"])
        .min_timeout(Duration::from_secs(5))
        .describe(description)
        .within(ctx)
        .wait(move || async move {
            match client.resources.get(id).await {
                Ok(resource) => {
                    let state = resource.provisioning_state().unwrap_or("Succeeded").to_string();
                    Ok(Refresh::found(Some(resource), state))
                },
                Err(err) if err.is_not_found() => Ok(Refresh::found(None, RESPONSE_NOT_FOUND)),
                Err(err) => Err(err),
            }
        })
        .await?;

    found
        .flatten()
        .ok_or_else(|| ProviderError::NotFound(format!("{description} was not found after being written")))
}
