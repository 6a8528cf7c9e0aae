//! The Resource Manager seam and the client handed to every handler.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::ResolvedConfig;
use crate::error::{ProviderError, Result};
use crate::features::UserFeatures;
use crate::locks::LockManager;
use crate::operation::OperationHandle;
use crate::poll::{Refresh, StateWaiter};
use crate::resource_id::ResourceGroupId;
use crate::tags::Tags;
use crate::timeouts::{Operation, OperationContext};

/// A resource as returned by the Resource Manager API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmResource {
    /// Fully-qualified ARM ID.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Resource type, e.g. `Microsoft.Network/networkSecurityGroups`.
    #[serde(rename = "type", default)]
    pub resource_type: String,
    /// Azure region. Not every resource is located.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Resource tags.
    #[serde(default)]
    pub tags: Tags,
    /// Managed identity, for resources that carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<ManagedIdentity>,
    /// The type-specific `properties` object.
    #[serde(default)]
    pub properties: Value,
}

/// The `identity` object of a resource.
///
/// Only `type` is sent; the service fills in the principal and tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedIdentity {
    /// `SystemAssigned` or `None`.
    #[serde(rename = "type")]
    pub identity_type: String,
    /// Object ID of the service principal backing the identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    /// Tenant of that service principal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl ManagedIdentity {
    /// An identity of the given type, as sent in a request.
    pub fn new(identity_type: impl Into<String>) -> Self {
        Self {
            identity_type: identity_type.into(),
            ..Self::default()
        }
    }
}

impl ArmResource {
    /// A bare resource with an ID and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            properties: Value::Object(Default::default()),
            ..Self::default()
        }
    }

    /// Set the resource type.
    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    /// Set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the tags.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Set the managed identity.
    pub fn with_identity(mut self, identity: ManagedIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Replace the properties object.
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// `properties.provisioningState`, if present.
    pub fn provisioning_state(&self) -> Option<&str> {
        self.property("provisioningState").and_then(Value::as_str)
    }

    /// A top-level entry of `properties`.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Registration of a resource provider namespace in the subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRegistration {
    /// E.g. `Microsoft.Network`.
    pub namespace: String,
    /// E.g. `Registered`, `NotRegistered`, `Registering`.
    pub registration_state: String,
}

impl ProviderRegistration {
    /// Whether the namespace is usable.
    pub fn is_registered(&self) -> bool {
        self.registration_state.eq_ignore_ascii_case("registered")
    }
}

/// Operations on the Resource Manager API used by the resource handlers.
///
/// A missing resource is reported as an error for which
/// [`ProviderError::is_not_found`] returns `true`.
#[async_trait::async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    /// Fetch a resource by ID.
    async fn get(&self, id: &str) -> Result<ArmResource>;

    /// Submit a create or full update of the resource at `id`.
    async fn begin_create_or_update(&self, id: &str, resource: ArmResource) -> Result<OperationHandle>;

    /// Submit a delete of the resource at `id`.
    async fn begin_delete(&self, id: &str) -> Result<OperationHandle>;

    /// List the resources nested in a resource group.
    async fn list_by_resource_group(&self, id: &ResourceGroupId) -> Result<Vec<ArmResource>>;

    /// List resource provider namespaces and their registration state.
    async fn list_providers(&self) -> Result<Vec<ProviderRegistration>>;

    /// Request registration of a resource provider namespace.
    async fn register_provider(&self, namespace: &str) -> Result<()>;
}

/// Everything a handler needs: the API, the lock registry and provider settings.
#[derive(Clone)]
pub struct Client {
    /// The Resource Manager API.
    pub resources: Arc<dyn ResourceManager>,
    /// Named locks shared by every handler of this provider instance.
    pub locks: LockManager,
    /// The expanded `features` block.
    pub features: UserFeatures,
    /// The resolved provider configuration.
    pub config: ResolvedConfig,
    stop: CancellationToken,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("locks", &self.locks.len())
            .field("features", &self.features)
            .field("config", &self.config)
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Assemble a client.
    pub fn new(
        resources: Arc<dyn ResourceManager>,
        locks: LockManager,
        features: UserFeatures,
        config: ResolvedConfig,
        stop: CancellationToken,
    ) -> Self {
        Self {
            resources,
            locks,
            features,
            config,
            stop,
        }
    }

    /// The subscription every ID is built under.
    pub fn subscription_id(&self) -> &str {
        &self.config.subscription_id
    }

    /// Start an [`OperationContext`] tied to the provider stop token.
    pub fn context(&self, operation: Operation, timeout: Duration) -> OperationContext {
        OperationContext::new(operation, timeout, self.stop.clone())
    }

    /// The provider stop token.
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }
}

/// Resource provider namespaces the provider's resources depend on.
pub fn required_resource_providers() -> BTreeSet<&'static str> {
    BTreeSet::from([
        "Microsoft.Authorization",
        "Microsoft.Compute",
        "Microsoft.KeyVault",
        "Microsoft.Network",
        "Microsoft.Storage",
    ])
}

/// The required namespaces that are not registered yet.
///
/// Namespaces the API doesn't list at all are left alone, since the endpoint
/// can't register them anyway.
pub fn providers_to_register<'a>(
    available: &[ProviderRegistration],
    required: &BTreeSet<&'a str>,
) -> Vec<&'a str> {
    required
        .iter()
        .copied()
        .filter(|namespace| {
            available
                .iter()
                .any(|p| p.namespace == *namespace && !p.is_registered())
        })
        .collect()
}

const REGISTRATION_HINT: &str = "The provider registers the Resource Providers it supports so that it is able to provision resources. \
If you don't have permission to register Resource Providers, set `skip_provider_registration` in the provider block to disable this.";

/// Register every required namespace that isn't registered yet, then wait for
/// all of them to report `Registered`.
#[instrument(skip(resources, ctx))]
pub async fn ensure_registered(
    resources: Arc<dyn ResourceManager>,
    required: &BTreeSet<&'static str>,
    ctx: &OperationContext,
) -> Result<()> {
    let available = resources.list_providers().await.map_err(|err| {
        ProviderError::Configuration(format!(
            "Unable to list provider registration status, it is possible that this is due to invalid credentials or the service principal does not have permission to use the Resource Manager API: {err}"
        ))
    })?;

    let pending = providers_to_register(&available, required);
    if pending.is_empty() {
        debug!("all required resource providers are registered");
        return Ok(());
    }

    let mut tasks = JoinSet::new();
    for namespace in pending.iter().copied() {
        let resources = Arc::clone(&resources);
        let ctx = ctx.clone();
        tasks.spawn(async move {
            info!(namespace, "registering resource provider");
            resources
                .register_provider(namespace)
                .await
                .map_err(|err| err.context(format!("registering Resource Provider {namespace:?}")))?;
            wait_for_registration(resources.as_ref(), namespace, &ctx).await
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|err| ProviderError::OperationFailed(err.to_string()));
        if let Err(err) = outcome.and_then(|inner| inner) {
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        None => Ok(()),
        Some(err) => Err(ProviderError::Configuration(format!(
            "ensuring Resource Providers are registered: {err}\n\n{REGISTRATION_HINT}"
        ))),
    }
}

async fn wait_for_registration(
    resources: &dyn ResourceManager,
    namespace: &str,
    ctx: &OperationContext,
) -> Result<()> {
    StateWaiter::new(["NotRegistered", "Unregistered", "Registering"], ["Registered"])
        .poll_interval(Duration::from_secs(5))
        .describe(format!("Resource Provider {namespace:?}"))
        .within(ctx)
        .wait(move || async move {
            let providers = resources.list_providers().await?;
            Ok(match providers.into_iter().find(|p| p.namespace == namespace) {
                Some(p) => {
                    let state = if p.is_registered() {
                        "Registered".to_string()
                    } else {
                        p.registration_state.clone()
                    };
                    Refresh::found(p, state)
                },
                None => Refresh::gone(),
            })
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use serde_json::json;

    fn registration(namespace: &str, state: &str) -> ProviderRegistration {
        ProviderRegistration {
            namespace: namespace.to_string(),
            registration_state: state.to_string(),
        }
    }

    #[test]
    fn test_arm_resource_serde_shape() {
        let resource: ArmResource = serde_json::from_value(json!({
            "id": "/subscriptions/0/resourceGroups/rg/providers/Microsoft.Network/networkSecurityGroups/nsg",
            "name": "nsg",
            "type": "Microsoft.Network/networkSecurityGroups",
            "location": "local",
            "properties": {"provisioningState": "Succeeded"}
        }))
        .unwrap();

        assert_eq!(resource.resource_type, "Microsoft.Network/networkSecurityGroups");
        assert_eq!(resource.provisioning_state(), Some("Succeeded"));
        assert!(resource.tags.is_empty());
    }

    #[test]
    fn test_only_unregistered_required_providers_are_selected() {
        let available = vec![
            registration("Microsoft.Compute", "Registered"),
            registration("Microsoft.Network", "NotRegistered"),
            registration("Microsoft.Storage", "registered"),
            registration("Microsoft.KeyVault", "Registering"),
            registration("Microsoft.Web", "NotRegistered"),
        ];
        let selected = providers_to_register(&available, &required_resource_providers());
        assert_eq!(selected, vec!["Microsoft.KeyVault", "Microsoft.Network"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_registered_registers_missing() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.set_provider("Microsoft.Compute", "Registered");
        fake.set_provider("Microsoft.Network", "NotRegistered");
        fake.set_provider("Microsoft.Storage", "Unregistered");

        let ctx = OperationContext::new(
            Operation::Read,
            Duration::from_secs(300),
            CancellationToken::new(),
        );
        ensure_registered(fake.clone(), &required_resource_providers(), &ctx)
            .await
            .unwrap();

        let mut registered = fake.registered_providers();
        registered.sort();
        assert_eq!(registered, vec!["Microsoft.Network", "Microsoft.Storage"]);
        assert_eq!(fake.provider_state("Microsoft.Network").as_deref(), Some("Registered"));
    }

    #[tokio::test]
    async fn test_ensure_registered_is_a_noop_when_all_registered() {
        let fake = Arc::new(FakeResourceManager::new());
        for namespace in required_resource_providers() {
            fake.set_provider(namespace, "Registered");
        }
        let ctx = OperationContext::new(
            Operation::Read,
            Duration::from_secs(300),
            CancellationToken::new(),
        );
        ensure_registered(fake.clone(), &required_resource_providers(), &ctx)
            .await
            .unwrap();
        assert!(fake.registered_providers().is_empty());
    }
}
