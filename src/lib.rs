//! Azure Stack Provider
//!
//! The core of a Terraform provider for Azure Stack Hub: the coordination and
//! consistency machinery every resource handler leans on, the handler
//! framework, and the handlers themselves.
//!
//! # Overview
//!
//! - **Named locks** ([`locks`]): a registry of async mutexes keyed by
//!   `"{type}.{name}"`, so handlers touching the same remote object
//!   serialize while unrelated work runs concurrently.
//! - **State waiter** ([`poll`]): polls a refresh function until an
//!   eventually consistent resource settles into a target state, with
//!   backoff, a timeout and cancellation.
//! - **Long-running operations** ([`operation`]): a handle for ARM writes
//!   that complete asynchronously.
//! - **Features** ([`features`]): the provider's `features` block, expanded
//!   into typed toggles with defaults.
//! - **Resources** ([`resource`], [`services`]): typed handlers behind a
//!   type-erased dispatch layer, served by [`AzureStackProvider`].
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use terraform_provider_azurestack::{AzureStackProvider, ProviderService};
//!
//! # async fn run(api: Arc<dyn terraform_provider_azurestack::client::ResourceManager>) -> terraform_provider_azurestack::Result<()> {
//! terraform_provider_azurestack::init_logging();
//!
//! let provider = AzureStackProvider::new(api)?;
//! provider
//!     .configure(serde_json::json!({
//!         "subscription_id": "00000000-0000-0000-0000-000000000000",
//!         "metadata_host": "management.local.azurestack.external",
//!         "features": [{"resource_group": [{"prevent_deletion_if_contains_resources": true}]}],
//!     }))
//!     .await?;
//!
//! let state = provider
//!     .create("azurestack_resource_group", serde_json::json!({"name": "example", "location": "local"}))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Operations
//!
//! [`ProviderService`] mirrors the Terraform plugin protocol:
//!
//! - **GetMetadata** / **GetSchema**: resource and data source names and schemas
//! - **ValidateProviderConfig** / **Configure**: provider settings, features
//!   expansion and resource provider registration
//! - **Stop**: cancels every in-flight wait
//! - **ValidateResourceConfig** / **UpgradeResourceState** / **Plan**
//! - **Create/Read/Update/Delete**: dispatched to the registered handler
//! - **ImportResourceState**
//! - **ValidateDataSourceConfig** / **ReadDataSource**

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod features;
pub mod location;
pub mod locks;
pub mod logging;
pub mod operation;
pub mod plan;
pub mod poll;
pub mod provider;
pub mod resource;
pub mod resource_id;
pub mod schema;
pub mod services;
pub mod tags;
pub mod testing;
pub mod timeouts;
pub mod validate;
pub mod validation;

// Re-export main types at crate root
pub use client::{ArmResource, Client, ManagedIdentity, ResourceManager};
pub use error::{ProviderError, Result, ResultExt};
pub use features::UserFeatures;
pub use locks::{LockManager, NamedLockGuard};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use operation::OperationHandle;
pub use plan::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use poll::{Refresh, StateWaiter};
pub use provider::{AzureStackProvider, ProviderService};
pub use resource::{DataSource, Resource};
pub use schema::ProviderSchema;
pub use timeouts::{Operation, OperationContext, Timeouts};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
