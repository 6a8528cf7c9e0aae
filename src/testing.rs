//! Testing utilities for the provider and its resources.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way Terraform would,
//! without a plugin transport. [`FakeResourceManager`] is an in-memory
//! [`ResourceManager`] that can be scripted to behave like an eventually
//! consistent control plane: resources that 404 for a while after being
//! created, operations that stay in progress, provisioning states that move
//! through intermediate values and resource providers that need registering.
//!
//! # Example
//!
//! ```
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use serde_json::json;
//! use terraform_provider_azurestack::provider::AzureStackProvider;
//! use terraform_provider_azurestack::testing::{FakeResourceManager, ProviderTester};
//!
//! let fake = Arc::new(FakeResourceManager::new());
//! let tester = ProviderTester::new(AzureStackProvider::new(fake.clone())?);
//! tester
//!     .configure(json!({
//!         "subscription_id": "00000000-0000-0000-0000-000000000000",
//!         "metadata_host": "management.local.azurestack.external",
//!         "skip_provider_registration": true,
//!     }))
//!     .await?;
//!
//! let state = tester
//!     .lifecycle_create("azurestack_resource_group", json!({"name": "example", "location": "local"}))
//!     .await?;
//! assert!(state.is_some());
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::client::{ArmResource, Client, ProviderRegistration, ResourceManager};
use crate::config::{EnvSource, ResolvedConfig};
use crate::error::{ProviderError, Result};
use crate::features::UserFeatures;
use crate::locks::LockManager;
use crate::operation::{OperationHandle, OperationPoll, OperationPoller};
use crate::plan::{ImportedResource, PlanResult};
use crate::provider::ProviderService;
use crate::resource_id::{ResourceGroupId, ResourceIdFormatter};
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};

/// Subscription used by [`test_client`].
pub const TEST_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Metadata host used by [`test_client`].
pub const TEST_METADATA_HOST: &str = "management.local.azurestack.external";

/// Principal the fake assigns to `SystemAssigned` identities.
pub const TEST_PRINCIPAL_ID: &str = "11111111-1111-1111-1111-111111111111";

/// Tenant the fake assigns to `SystemAssigned` identities.
pub const TEST_TENANT_ID: &str = "22222222-2222-2222-2222-222222222222";

/// A test harness for provider implementations.
///
/// Wraps a [`ProviderService`] and exposes each protocol call, plus helpers
/// that chain them into the plan/apply/refresh sequences Terraform runs.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<()> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(&self, resource_type: &str, config: Value) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(&self, resource_type: &str, proposed_state: Value) -> Result<PlanResult> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(&self, resource_type: &str, prior_state: Value) -> Result<PlanResult> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Full plan operation with explicit config.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult> {
        self.provider
            .plan(resource_type, prior_state, proposed_state, config)
            .await
    }

    /// Create a new resource.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource. `None` means it was removed from state.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(&self, resource_type: &str, prior_state: Value, planned_state: Value) -> Result<Value> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<()> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade resource state from an older schema version.
    pub async fn upgrade_resource_state(&self, resource_type: &str, version: u64, state: Value) -> Result<Value> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(&self, data_source_type: &str, config: Value) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read data from a data source.
    pub async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan, create, read.
    ///
    /// Returns the state after read.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Value) -> Result<Option<Value>> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self.create(resource_type, plan_result.planned_state).await?;
        self.read(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan, update, read.
    ///
    /// Returns the state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Option<Value>> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run a full delete lifecycle: plan, delete.
    pub async fn lifecycle_delete(&self, resource_type: &str, current_state: Value) -> Result<()> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Fake Resource Manager
// =========================================================================

#[derive(Default)]
struct FakeState {
    resources: BTreeMap<String, ArmResource>,
    providers: BTreeMap<String, String>,
    registered: Vec<String>,
    calls: HashMap<String, usize>,
    failures: HashMap<String, VecDeque<(u16, String)>>,
    not_found_after_create: u32,
    hidden: HashMap<String, u32>,
    operation_polls: u32,
    provisioning_states: HashMap<String, VecDeque<String>>,
}

/// An in-memory Resource Manager.
///
/// IDs are compared case-insensitively, like the real API does.
#[derive(Default)]
pub struct FakeResourceManager {
    state: Mutex<FakeState>,
}

impl std::fmt::Debug for FakeResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("FakeResourceManager")
            .field("resources", &state.resources.keys().collect::<Vec<_>>())
            .field("providers", &state.providers)
            .finish_non_exhaustive()
    }
}

impl FakeResourceManager {
    /// An empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a resource.
    pub fn insert(&self, resource: ArmResource) {
        self.state()
            .resources
            .insert(resource.id.to_ascii_lowercase(), resource);
    }

    /// Seed a resource, builder style.
    pub fn with_resource(self, resource: ArmResource) -> Self {
        self.insert(resource);
        self
    }

    /// The stored resource at `id`, bypassing scripted behaviour.
    pub fn resource(&self, id: &str) -> Option<ArmResource> {
        self.state().resources.get(&id.to_ascii_lowercase()).cloned()
    }

    /// Whether a resource exists at `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.resource(id).is_some()
    }

    /// Report a just-created resource as missing for the next `count` gets.
    pub fn set_not_found_after_create(&self, count: u32) {
        self.state().not_found_after_create = count;
    }

    /// Make every submitted operation report `InProgress` this many times
    /// before succeeding. Zero completes operations synchronously.
    pub fn set_operation_polls(&self, count: u32) {
        self.state().operation_polls = count;
    }

    /// Return these provisioning states from successive gets of `id`. The
    /// last state sticks once the script runs out.
    pub fn script_provisioning_states<I, S>(&self, id: &str, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .provisioning_states
            .insert(id.to_ascii_lowercase(), states.into_iter().map(Into::into).collect());
    }

    /// Fail the next call to `method` with an API error.
    pub fn fail_next(&self, method: &str, status: u16, message: impl Into<String>) {
        self.state()
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back((status, message.into()));
    }

    /// How many times `method` was called.
    pub fn calls(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    /// Set the registration state of a resource provider namespace.
    pub fn set_provider(&self, namespace: &str, state: &str) {
        self.state()
            .providers
            .insert(namespace.to_string(), state.to_string());
    }

    /// The registration state of a namespace.
    pub fn provider_state(&self, namespace: &str) -> Option<String> {
        self.state().providers.get(namespace).cloned()
    }

    /// The namespaces `register_provider` was called for.
    pub fn registered_providers(&self) -> Vec<String> {
        self.state().registered.clone()
    }

    fn enter(&self, method: &str) -> Result<()> {
        let mut state = self.state();
        *state.calls.entry(method.to_string()).or_default() += 1;
        match state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some((status, message)) => Err(ProviderError::Api { status, message }),
            None => Ok(()),
        }
    }

    fn operation(&self, description: String, result: Option<ArmResource>) -> OperationHandle {
        let polls = self.state().operation_polls;
        if polls == 0 {
            return OperationHandle::completed(description, result);
        }
        OperationHandle::pending(
            description,
            Arc::new(FakePoller {
                remaining: Mutex::new(polls),
                result,
            }),
        )
    }
}

fn not_found(id: &str) -> ProviderError {
    ProviderError::Api {
        status: 404,
        message: format!("ResourceNotFound: {id} was not found"),
    }
}

#[async_trait::async_trait]
impl ResourceManager for FakeResourceManager {
    async fn get(&self, id: &str) -> Result<ArmResource> {
        self.enter("get")?;
        let key = id.to_ascii_lowercase();
        let mut state = self.state();

        if let Some(remaining) = state.hidden.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(not_found(id));
            }
        }

        let scripted = match state.provisioning_states.get_mut(&key) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };

        let mut resource = state.resources.get(&key).cloned().ok_or_else(|| not_found(id))?;
        if let (Some(provisioning_state), Some(properties)) = (scripted, resource.properties.as_object_mut()) {
            properties.insert("provisioningState".to_string(), Value::String(provisioning_state));
        }
        Ok(resource)
    }

    async fn begin_create_or_update(&self, id: &str, mut resource: ArmResource) -> Result<OperationHandle> {
        self.enter("begin_create_or_update")?;
        resource.id = id.to_string();
        if resource.name.is_empty() {
            resource.name = id.rsplit('/').next().unwrap_or_default().to_string();
        }
        if !resource.properties.is_object() {
            resource.properties = json!({});
        }
        if let Some(properties) = resource.properties.as_object_mut() {
            properties.insert("provisioningState".to_string(), json!("Succeeded"));
        }
        if let Some(identity) = resource.identity.as_mut() {
            if identity.identity_type == "SystemAssigned" {
                identity.principal_id = Some(TEST_PRINCIPAL_ID.to_string());
                identity.tenant_id = Some(TEST_TENANT_ID.to_string());
            }
        }

        let key = id.to_ascii_lowercase();
        {
            let mut state = self.state();
            let hide = state.not_found_after_create;
            if hide > 0 && !state.resources.contains_key(&key) {
                state.hidden.insert(key.clone(), hide);
            }
            state.resources.insert(key, resource.clone());
        }

        Ok(self.operation(format!("creating/updating {id}"), Some(resource)))
    }

    async fn begin_delete(&self, id: &str) -> Result<OperationHandle> {
        self.enter("begin_delete")?;
        let key = id.to_ascii_lowercase();
        let nested = format!("{key}/");
        {
            let mut state = self.state();
            if !state.resources.contains_key(&key) {
                return Err(not_found(id));
            }
            state
                .resources
                .retain(|k, _| k != &key && !k.starts_with(&nested));
        }
        Ok(self.operation(format!("deleting {id}"), None))
    }

    async fn list_by_resource_group(&self, id: &ResourceGroupId) -> Result<Vec<ArmResource>> {
        self.enter("list_by_resource_group")?;
        let prefix = format!("{}/providers/", id.id().to_ascii_lowercase());
        Ok(self
            .state()
            .resources
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn list_providers(&self) -> Result<Vec<ProviderRegistration>> {
        self.enter("list_providers")?;
        Ok(self
            .state()
            .providers
            .iter()
            .map(|(namespace, state)| ProviderRegistration {
                namespace: namespace.clone(),
                registration_state: state.clone(),
            })
            .collect())
    }

    async fn register_provider(&self, namespace: &str) -> Result<()> {
        self.enter("register_provider")?;
        let mut state = self.state();
        state.registered.push(namespace.to_string());
        state
            .providers
            .insert(namespace.to_string(), "Registered".to_string());
        Ok(())
    }
}

struct FakePoller {
    remaining: Mutex<u32>,
    result: Option<ArmResource>,
}

#[async_trait::async_trait]
impl OperationPoller for FakePoller {
    async fn poll(&self) -> Result<OperationPoll> {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(OperationPoll::in_progress());
        }
        Ok(OperationPoll::succeeded(self.result.clone()))
    }
}

/// A configured client backed by `resources`, for calling handlers directly.
pub fn test_client(resources: Arc<dyn ResourceManager>) -> Client {
    test_client_with_features(resources, UserFeatures::default())
}

/// [`test_client`] with a custom `features` block.
pub fn test_client_with_features(resources: Arc<dyn ResourceManager>, features: UserFeatures) -> Client {
    let config = ResolvedConfig {
        subscription_id: TEST_SUBSCRIPTION_ID.to_string(),
        metadata_host: TEST_METADATA_HOST.to_string(),
        features,
        ..ResolvedConfig::default()
    };
    Client::new(resources, LockManager::new(), features, config, CancellationToken::new())
}

// =========================================================================
// Acceptance Test Settings
// =========================================================================

/// Regions used by acceptance tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regions {
    /// `ARM_TEST_LOCATION`
    pub primary: String,
    /// `ARM_TEST_LOCATION_ALT`
    pub secondary: String,
    /// `ARM_TEST_LOCATION_ALT2`
    pub ternary: String,
}

impl Regions {
    /// Read the regions from the environment. Unset variables are empty.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let var = |key: &str| env.var(key).unwrap_or_default();
        Self {
            primary: var("ARM_TEST_LOCATION"),
            secondary: var("ARM_TEST_LOCATION_ALT"),
            ternary: var("ARM_TEST_LOCATION_ALT2"),
        }
    }

    /// The variables that must be set but aren't.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("ARM_TEST_LOCATION", &self.primary),
            ("ARM_TEST_LOCATION_ALT", &self.secondary),
            ("ARM_TEST_LOCATION_ALT2", &self.ternary),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k)
        .collect()
    }
}

/// Whether acceptance tests against a real endpoint were requested (`TF_ACC`).
pub fn acceptance_enabled(env: &dyn EnvSource) -> bool {
    env.var("TF_ACC").is_some_and(|v| !v.is_empty())
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan result indicates changes are needed.
///
/// # Panics
///
/// Panics if the plan has no changes.
pub fn assert_plan_has_changes(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes, but got no changes"
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan does not have a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan has a change for the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        !has_change,
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "Expected at least one error, but got none"
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeouts::{Operation, OperationContext};
    use std::time::Duration;

    const NSG_ID: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg/providers/Microsoft.Network/networkSecurityGroups/nsg";

    fn ctx() -> OperationContext {
        OperationContext::new(Operation::Create, Duration::from_secs(600), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_fake_ids_are_case_insensitive() {
        let fake = FakeResourceManager::new().with_resource(ArmResource::new(NSG_ID, "nsg"));
        let found = fake.get(&NSG_ID.to_uppercase()).await.unwrap();
        assert_eq!(found.name, "nsg");
        assert_eq!(fake.calls("get"), 1);
    }

    #[tokio::test]
    async fn test_fake_hides_new_resources() {
        let fake = FakeResourceManager::new();
        fake.set_not_found_after_create(2);
        fake.begin_create_or_update(NSG_ID, ArmResource::default())
            .await
            .unwrap();

        assert!(fake.get(NSG_ID).await.unwrap_err().is_not_found());
        assert!(fake.get(NSG_ID).await.unwrap_err().is_not_found());
        let found = fake.get(NSG_ID).await.unwrap();
        assert_eq!(found.name, "nsg");
        assert_eq!(found.provisioning_state(), Some("Succeeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fake_pending_operations() {
        let fake = FakeResourceManager::new();
        fake.set_operation_polls(2);
        let handle = fake
            .begin_create_or_update(NSG_ID, ArmResource::default())
            .await
            .unwrap();
        assert!(!handle.is_done());

        let created = handle.wait(&ctx()).await.unwrap().unwrap();
        assert_eq!(created.id, NSG_ID);
    }

    #[tokio::test]
    async fn test_fake_scripted_provisioning_states() {
        let fake = FakeResourceManager::new().with_resource(ArmResource::new(NSG_ID, "nsg"));
        fake.script_provisioning_states(NSG_ID, ["Updating", "Succeeded"]);

        assert_eq!(fake.get(NSG_ID).await.unwrap().provisioning_state(), Some("Updating"));
        assert_eq!(fake.get(NSG_ID).await.unwrap().provisioning_state(), Some("Succeeded"));
        assert_eq!(fake.get(NSG_ID).await.unwrap().provisioning_state(), Some("Succeeded"));
    }

    #[tokio::test]
    async fn test_fake_delete_removes_nested_resources() {
        let rg = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg";
        let fake = FakeResourceManager::new()
            .with_resource(ArmResource::new(rg, "rg"))
            .with_resource(ArmResource::new(NSG_ID, "nsg"));

        let nested = fake
            .list_by_resource_group(&ResourceGroupId::parse(rg).unwrap())
            .await
            .unwrap();
        assert_eq!(nested.len(), 1);

        fake.begin_delete(rg).await.unwrap().wait(&ctx()).await.unwrap();
        assert!(!fake.contains(NSG_ID));
        assert!(fake.begin_delete(rg).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_fake_fail_next() {
        let fake = FakeResourceManager::new();
        fake.fail_next("list_providers", 403, "AuthorizationFailed");

        let err = fake.list_providers().await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 403, .. }));
        assert!(fake.list_providers().await.unwrap().is_empty());
        assert_eq!(fake.calls("list_providers"), 2);
    }

    #[test]
    fn test_regions_from_env() {
        let env: HashMap<String, String> = HashMap::from([
            ("ARM_TEST_LOCATION".to_string(), "local".to_string()),
            ("TF_ACC".to_string(), "1".to_string()),
        ]);
        let regions = Regions::from_env(&env);

        assert_eq!(regions.primary, "local");
        assert_eq!(regions.missing(), vec!["ARM_TEST_LOCATION_ALT", "ARM_TEST_LOCATION_ALT2"]);
        assert!(acceptance_enabled(&env));
        assert!(!acceptance_enabled(&HashMap::<String, String>::new()));
    }

    #[test]
    fn test_test_client() {
        let client = test_client(Arc::new(FakeResourceManager::new()));
        assert_eq!(client.subscription_id(), TEST_SUBSCRIPTION_ID);
        assert_eq!(client.config.metadata_host, TEST_METADATA_HOST);
    }

    #[test]
    fn test_assert_no_errors() {
        let diagnostics = vec![Diagnostic::warning("Just a warning")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        let diagnostics = vec![Diagnostic::error("An error")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Invalid configuration value")];
        assert_has_errors(&diagnostics);
        assert_error_contains(&diagnostics, "Invalid");
        assert_error_contains(&diagnostics, "configuration");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("field1"));
        assert!(display.contains("More info"));
    }
}
