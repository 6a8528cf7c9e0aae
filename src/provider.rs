//! The provider service: schema, configuration and dispatch to resources.
//!
//! [`ProviderService`] is the interface the plugin transport drives. The
//! [`AzureStackProvider`] implementation owns the registered resources and
//! data sources, the lock registry and the stop token, and builds the
//! [`Client`] handed to every handler when it is configured.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::client::{ensure_registered, required_resource_providers, Client, ResourceManager};
use crate::config::{provider_config_schema, EnvSource, ProcessEnv, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::locks::LockManager;
use crate::plan::{diff, ImportedResource, PlanResult, ProviderMetadata};
use crate::resource::{DynDataSource, DynResource};
use crate::schema::{has_errors, Diagnostic, ProviderSchema, Schema};
use crate::services::{self, ServiceRegistration};
use crate::timeouts::Operation;
use crate::validation::validate;

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// The operations a Terraform provider serves.
///
/// Resource and data source operations receive and return JSON values shaped
/// by the schema returned from [`ProviderService::schema`].
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Return the resource and data source names.
    /// By default, this is derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.keys().cloned().collect();
        let mut data_sources: Vec<String> = schema.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>> {
        Ok(validate(&self.schema().provider, &config))
    }

    /// Configure the provider with credentials and settings.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(&self, resource_type: &str, config: Value) -> Result<Vec<Diagnostic>>;

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(&self, resource_type: &str, version: u64, state: Value) -> Result<Value> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value>;

    /// Read the current state of a resource. `None` means it no longer exists.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>>;

    /// Update an existing resource.
    async fn update(&self, resource_type: &str, prior_state: Value, planned_state: Value) -> Result<Value>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<()>;

    /// Import existing infrastructure into management.
    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>>;

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(&self, data_source_type: &str, config: Value) -> Result<Vec<Diagnostic>>;

    /// Read data from an external source.
    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value>;
}

/// The AzureStack provider.
pub struct AzureStackProvider {
    resource_manager: Arc<dyn ResourceManager>,
    resources: BTreeMap<&'static str, Arc<dyn DynResource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DynDataSource>>,
    locks: LockManager,
    stop: CancellationToken,
    env: Arc<dyn EnvSource + Send + Sync>,
    client: RwLock<Option<Client>>,
}

impl std::fmt::Debug for AzureStackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureStackProvider")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .field("configured", &self.configured_client().is_ok())
            .finish_non_exhaustive()
    }
}

impl AzureStackProvider {
    /// A provider serving every supported resource and data source.
    pub fn new(resource_manager: Arc<dyn ResourceManager>) -> Result<Self> {
        Self::with_services(resource_manager, services::supported())
    }

    /// A provider serving the given services only.
    ///
    /// Two services registering the same type name is an error.
    pub fn with_services(
        resource_manager: Arc<dyn ResourceManager>,
        services: Vec<Box<dyn ServiceRegistration>>,
    ) -> Result<Self> {
        let mut provider = Self {
            resource_manager,
            resources: BTreeMap::new(),
            data_sources: BTreeMap::new(),
            locks: LockManager::new(),
            stop: CancellationToken::new(),
            env: Arc::new(ProcessEnv),
            client: RwLock::new(None),
        };

        for service in services {
            debug!(service = service.name(), "registering data sources");
            for ds in service.data_sources() {
                provider.register_data_source(ds)?;
            }
            debug!(service = service.name(), "registering resources");
            for r in service.resources() {
                provider.register_resource(r)?;
            }
        }

        Ok(provider)
    }

    /// Read environment fallbacks from `env` instead of the process environment.
    pub fn with_env(mut self, env: impl EnvSource + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Serve an additional resource.
    pub fn register_resource(&mut self, resource: Arc<dyn DynResource>) -> Result<()> {
        let key = resource.resource_type();
        if self.resources.contains_key(key) {
            return Err(ProviderError::Configuration(format!(
                "An existing Resource exists for {key:?}"
            )));
        }
        self.resources.insert(key, resource);
        Ok(())
    }

    /// Serve an additional data source.
    pub fn register_data_source(&mut self, data_source: Arc<dyn DynDataSource>) -> Result<()> {
        let key = data_source.resource_type();
        if self.data_sources.contains_key(key) {
            return Err(ProviderError::Configuration(format!(
                "An existing Data Source exists for {key:?}"
            )));
        }
        self.data_sources.insert(key, data_source);
        Ok(())
    }

    /// The lock registry shared by every handler.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// The client built by [`ProviderService::configure`].
    pub fn configured_client(&self) -> Result<Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                ProviderError::Configuration(
                    "the provider has not been configured".to_string(),
                )
            })
    }

    fn resource(&self, resource_type: &str) -> Result<&Arc<dyn DynResource>> {
        self.resources
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source(&self, data_source_type: &str) -> Result<&Arc<dyn DynDataSource>> {
        self.data_sources
            .get(data_source_type)
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    fn resource_schema(&self, resource_type: &str) -> Result<Schema> {
        Ok(self.resource(resource_type)?.schema())
    }
}

#[async_trait::async_trait]
impl ProviderService for AzureStackProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(provider_config_schema());
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema());
        }
        for (name, ds) in &self.data_sources {
            schema = schema.with_data_source(*name, ds.schema());
        }
        schema
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = validate(&provider_config_schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let raw = ProviderConfig::from_value_with_env(&config, self.env.as_ref())?;
        if raw.metadata_host.is_empty() && !raw.arm_endpoint.is_empty() {
            diagnostics.push(
                Diagnostic::warning("Argument is deprecated")
                    .with_detail("`arm_endpoint` is deprecated in favour of `metadata_host`.")
                    .with_attribute("arm_endpoint"),
            );
        }
        let resolved = raw.build()?;
        let skip_registration = resolved.skip_provider_registration;

        let client = Client::new(
            Arc::clone(&self.resource_manager),
            self.locks.clone(),
            resolved.features,
            resolved,
            self.stop.clone(),
        );

        if !skip_registration {
            let ctx = client.context(Operation::Read, REGISTRATION_TIMEOUT);
            ensure_registered(
                Arc::clone(&self.resource_manager),
                &required_resource_providers(),
                &ctx,
            )
            .await?;
        }

        info!(metadata_host = %client.config.metadata_host, "provider configured");
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<()> {
        info!("stopping provider");
        self.stop.cancel();
        Ok(())
    }

    async fn validate_resource_config(&self, resource_type: &str, config: Value) -> Result<Vec<Diagnostic>> {
        Ok(validate(&self.resource_schema(resource_type)?, &config))
    }

    async fn upgrade_resource_state(&self, resource_type: &str, version: u64, state: Value) -> Result<Value> {
        let schema = self.resource_schema(resource_type)?;
        if version > schema.version {
            return Err(ProviderError::Validation(format!(
                "state for {resource_type} is at version {version}, newer than the supported version {}",
                schema.version
            )));
        }
        Ok(state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult> {
        let schema = self.resource_schema(resource_type)?;
        Ok(diff(&schema, prior_state.as_ref(), &proposed_state))
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client()?;
        resource.create(&client, planned_state).await.inspect_err(|e| {
            error!(error = %e, "create failed");
        })
    }

    #[instrument(skip(self, current_state))]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client()?;
        resource.read(&client, current_state).await
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(&self, resource_type: &str, prior_state: Value, planned_state: Value) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client()?;
        resource.update(&client, prior_state, planned_state).await.inspect_err(|e| {
            error!(error = %e, "update failed");
        })
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<()> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client()?;
        resource.delete(&client, current_state).await.inspect_err(|e| {
            error!(error = %e, "delete failed");
        })
    }

    #[instrument(skip(self))]
    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client()?;
        let state = resource.import(&client, id).await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(&self, data_source_type: &str, config: Value) -> Result<Vec<Diagnostic>> {
        Ok(validate(&self.data_source(data_source_type)?.schema(), &config))
    }

    #[instrument(skip(self, config))]
    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value> {
        let data_source = self.data_source(data_source_type)?;
        let client = self.configured_client()?;
        data_source.read(&client, config).await
    }
}
