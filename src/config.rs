//! Provider block configuration and its `ARM_*` environment fallbacks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::features::{expand_features, features_schema, UserFeatures};
use crate::resource::strip_nulls;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

const MAX_AUXILIARY_TENANTS: usize = 3;

/// Where environment fallbacks are read from.
pub trait EnvSource {
    /// The value of `key`, if set.
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// The provider block as written by the user, after environment fallbacks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// `subscription_id` / `ARM_SUBSCRIPTION_ID`
    pub subscription_id: String,
    /// `client_id` / `ARM_CLIENT_ID`
    pub client_id: String,
    /// `client_secret` / `ARM_CLIENT_SECRET`
    pub client_secret: String,
    /// `tenant_id` / `ARM_TENANT_ID`
    pub tenant_id: String,
    /// `metadata_host` / `ARM_METADATA_HOST`
    pub metadata_host: String,
    /// Deprecated in favour of `metadata_host`. `ARM_ENDPOINT`
    pub arm_endpoint: String,
    /// `environment` / `ARM_ENVIRONMENT`
    pub environment: String,
    /// `auxiliary_tenant_ids` / `ARM_AUXILIARY_TENANT_IDS` (`;`-separated)
    pub auxiliary_tenant_ids: Vec<String>,
    /// `client_certificate_path` / `ARM_CLIENT_CERTIFICATE_PATH`
    pub client_certificate_path: String,
    /// `client_certificate_password` / `ARM_CLIENT_CERTIFICATE_PASSWORD`
    pub client_certificate_password: String,
    /// `use_msi` / `ARM_USE_MSI`
    pub use_msi: bool,
    /// `msi_endpoint` / `ARM_MSI_ENDPOINT`
    pub msi_endpoint: String,
    /// `disable_correlation_request_id` / `ARM_DISABLE_CORRELATION_REQUEST_ID`
    pub disable_correlation_request_id: bool,
    /// `skip_provider_registration` / `ARM_SKIP_PROVIDER_REGISTRATION`
    pub skip_provider_registration: bool,
    /// The raw `features` block.
    pub features: Value,
    /// `ARM_CORRELATION_REQUEST_ID`. Environment only.
    #[serde(skip)]
    pub correlation_request_id: Option<String>,
}

/// Configuration after validation, ready to build a client from.
#[derive(Clone, PartialEq, Default)]
pub struct ResolvedConfig {
    /// Subscription ID.
    pub subscription_id: String,
    /// Client ID.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Tenant ID.
    pub tenant_id: String,
    /// Host name of the metadata service, without scheme or path.
    pub metadata_host: String,
    /// Cloud environment name.
    pub environment: String,
    /// At most three extra tenants.
    pub auxiliary_tenant_ids: Vec<String>,
    /// Client certificate path.
    pub client_certificate_path: String,
    /// Client certificate password.
    pub client_certificate_password: String,
    /// Whether managed identity auth is allowed.
    pub use_msi: bool,
    /// Custom managed identity endpoint.
    pub msi_endpoint: String,
    /// Suppress the correlation request ID header.
    pub disable_correlation_request_id: bool,
    /// Custom correlation request ID.
    pub correlation_request_id: Option<String>,
    /// Skip resource provider registration during configure.
    pub skip_provider_registration: bool,
    /// The expanded `features` block.
    pub features: UserFeatures,
}

impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("subscription_id", &self.subscription_id)
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .field("metadata_host", &self.metadata_host)
            .field("environment", &self.environment)
            .field("auxiliary_tenant_ids", &self.auxiliary_tenant_ids)
            .field("use_msi", &self.use_msi)
            .field("skip_provider_registration", &self.skip_provider_registration)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    /// Decode the provider block, filling unset fields from the process environment.
    pub fn from_value(config: &Value) -> Result<Self> {
        Self::from_value_with_env(config, &ProcessEnv)
    }

    /// Decode the provider block, filling unset fields from `env`.
    pub fn from_value_with_env(config: &Value, env: &dyn EnvSource) -> Result<Self> {
        let mut cfg: ProviderConfig = match config {
            Value::Null => Self::default(),
            other => serde_json::from_value(strip_nulls(other))?,
        };

        fill_string(&mut cfg.subscription_id, env, "ARM_SUBSCRIPTION_ID");
        fill_string(&mut cfg.client_id, env, "ARM_CLIENT_ID");
        fill_string(&mut cfg.client_secret, env, "ARM_CLIENT_SECRET");
        fill_string(&mut cfg.tenant_id, env, "ARM_TENANT_ID");
        fill_string(&mut cfg.metadata_host, env, "ARM_METADATA_HOST");
        fill_string(&mut cfg.arm_endpoint, env, "ARM_ENDPOINT");
        fill_string(&mut cfg.environment, env, "ARM_ENVIRONMENT");
        fill_string(&mut cfg.client_certificate_path, env, "ARM_CLIENT_CERTIFICATE_PATH");
        fill_string(&mut cfg.client_certificate_password, env, "ARM_CLIENT_CERTIFICATE_PASSWORD");
        fill_string(&mut cfg.msi_endpoint, env, "ARM_MSI_ENDPOINT");

        let explicit = config.as_object();
        let is_set = |key: &str| explicit.and_then(|m| m.get(key)).is_some_and(|v| !v.is_null());
        if !is_set("use_msi") {
            cfg.use_msi = env_bool(env, "ARM_USE_MSI")?;
        }
        if !is_set("disable_correlation_request_id") {
            cfg.disable_correlation_request_id = env_bool(env, "ARM_DISABLE_CORRELATION_REQUEST_ID")?;
        }
        if !is_set("skip_provider_registration") {
            cfg.skip_provider_registration = env_bool(env, "ARM_SKIP_PROVIDER_REGISTRATION")?;
        }

        if cfg.auxiliary_tenant_ids.is_empty() {
            if let Some(v) = env.var("ARM_AUXILIARY_TENANT_IDS").filter(|v| !v.is_empty()) {
                cfg.auxiliary_tenant_ids = v.split(';').map(str::to_string).collect();
            }
        }

        cfg.correlation_request_id = env
            .var("ARM_CORRELATION_REQUEST_ID")
            .filter(|v| !v.is_empty());

        Ok(cfg)
    }

    /// Validate and resolve into a [`ResolvedConfig`].
    pub fn build(self) -> Result<ResolvedConfig> {
        if self.auxiliary_tenant_ids.len() > MAX_AUXILIARY_TENANTS {
            return Err(ProviderError::Configuration(format!(
                "The provider only supports {MAX_AUXILIARY_TENANTS} auxiliary tenant IDs"
            )));
        }

        let metadata_host = if !self.metadata_host.is_empty() {
            self.metadata_host.as_str()
        } else {
            self.arm_endpoint.as_str()
        };
        let metadata_host = host_of(metadata_host).to_string();
        if metadata_host.is_empty() {
            return Err(ProviderError::Configuration(
                "provider: `metadata_host` must be set".to_string(),
            ));
        }
        if !self.arm_endpoint.is_empty() && self.metadata_host.is_empty() {
            debug!("using deprecated `arm_endpoint` as the metadata host");
        }

        Ok(ResolvedConfig {
            subscription_id: self.subscription_id,
            client_id: self.client_id,
            client_secret: self.client_secret,
            tenant_id: self.tenant_id,
            metadata_host,
            environment: self.environment,
            auxiliary_tenant_ids: self.auxiliary_tenant_ids,
            client_certificate_path: self.client_certificate_path,
            client_certificate_password: self.client_certificate_password,
            use_msi: self.use_msi,
            msi_endpoint: self.msi_endpoint,
            disable_correlation_request_id: self.disable_correlation_request_id,
            correlation_request_id: self.correlation_request_id,
            skip_provider_registration: self.skip_provider_registration,
            features: expand_features(&self.features),
        })
    }
}

/// Schema of the provider block.
pub fn provider_config_schema() -> Schema {
    let string = |description: &str| Attribute::optional_string().with_description(description);
    let flag = |description: &str| Attribute::optional_bool().with_description(description);

    Schema::v0()
        .with_attribute("subscription_id", string("The Subscription ID which should be used."))
        .with_attribute("client_id", string("The Client ID which should be used."))
        .with_attribute("tenant_id", string("The Tenant ID which should be used."))
        .with_attribute(
            "metadata_host",
            string("The Hostname which should be used for the Azure Metadata Service."),
        )
        .with_attribute(
            "arm_endpoint",
            string("Deprecated in favour of `metadata_host`."),
        )
        .with_attribute("environment", string("The Cloud Environment which should be used."))
        .with_attribute(
            "auxiliary_tenant_ids",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::optional(),
            ),
        )
        .with_attribute(
            "client_certificate_path",
            string("The path to the Client Certificate associated with the Service Principal."),
        )
        .with_attribute(
            "client_certificate_password",
            string("The password associated with the Client Certificate.").sensitive(),
        )
        .with_attribute(
            "client_secret",
            string("The Client Secret which should be used.").sensitive(),
        )
        .with_attribute("use_msi", flag("Allow Managed Service Identity to be used for Authentication."))
        .with_attribute("msi_endpoint", string("A custom endpoint for Managed Service Identity."))
        .with_attribute(
            "disable_correlation_request_id",
            flag("Disable the x-ms-correlation-request-id header."),
        )
        .with_attribute(
            "skip_provider_registration",
            flag("Skip registering the Resource Providers this provider supports."),
        )
        .with_block("features", features_schema())
}

fn fill_string(field: &mut String, env: &dyn EnvSource, key: &str) {
    if field.is_empty() {
        if let Some(v) = env.var(key) {
            *field = v;
        }
    }
}

fn env_bool(env: &dyn EnvSource, key: &str) -> Result<bool> {
    match env.var(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
        Some(v) => Err(ProviderError::Configuration(format!(
            "{key}: expected a boolean, got {v:?}"
        ))),
    }
}

/// `https://management.local.azurestack.external/` -> `management.local.azurestack.external`
fn host_of(input: &str) -> &str {
    let trimmed = input.trim();
    let Some((_, rest)) = trimmed.split_once("://") else {
        return trimmed;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    if authority.is_empty() {
        trimmed
    } else {
        authority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_block_values_win_over_env() {
        let env = env(&[
            ("ARM_SUBSCRIPTION_ID", "from-env"),
            ("ARM_TENANT_ID", "tenant-env"),
        ]);
        let cfg = ProviderConfig::from_value_with_env(
            &json!({"subscription_id": "from-block", "client_id": null}),
            &env,
        )
        .unwrap();

        assert_eq!(cfg.subscription_id, "from-block");
        assert_eq!(cfg.tenant_id, "tenant-env");
        assert_eq!(cfg.client_id, "");
    }

    #[test]
    fn test_env_booleans_and_auxiliary_tenants() {
        let env = env(&[
            ("ARM_SKIP_PROVIDER_REGISTRATION", "true"),
            ("ARM_USE_MSI", "1"),
            ("ARM_AUXILIARY_TENANT_IDS", "a;b"),
            ("ARM_CORRELATION_REQUEST_ID", "corr-1"),
        ]);
        let cfg = ProviderConfig::from_value_with_env(
            &json!({"use_msi": false, "correlation_request_id": "ignored"}),
            &env,
        )
        .unwrap();

        assert!(cfg.skip_provider_registration);
        assert!(!cfg.use_msi);
        assert_eq!(cfg.auxiliary_tenant_ids, vec!["a", "b"]);
        assert_eq!(cfg.correlation_request_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn test_bad_env_boolean() {
        let env = env(&[("ARM_USE_MSI", "maybe")]);
        let err = ProviderConfig::from_value_with_env(&json!({}), &env).unwrap_err();
        assert!(err.to_string().contains("ARM_USE_MSI"));
    }

    #[test]
    fn test_too_many_auxiliary_tenants() {
        let cfg = ProviderConfig {
            metadata_host: "management.local".to_string(),
            auxiliary_tenant_ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            ..ProviderConfig::default()
        };
        let err = cfg.build().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: The provider only supports 3 auxiliary tenant IDs"
        );
    }

    #[test]
    fn test_metadata_host_resolution() {
        let from_endpoint = ProviderConfig {
            arm_endpoint: "https://management.local.azurestack.external/".to_string(),
            ..ProviderConfig::default()
        }
        .build()
        .unwrap();
        assert_eq!(from_endpoint.metadata_host, "management.local.azurestack.external");

        let preferred = ProviderConfig {
            metadata_host: "management.region.example".to_string(),
            arm_endpoint: "https://ignored.example".to_string(),
            ..ProviderConfig::default()
        }
        .build()
        .unwrap();
        assert_eq!(preferred.metadata_host, "management.region.example");

        let err = ProviderConfig::default().build().unwrap_err();
        assert!(err.message().contains("`metadata_host` must be set"));
    }

    #[test]
    fn test_features_are_expanded() {
        let cfg = ProviderConfig::from_value_with_env(
            &json!({
                "metadata_host": "management.local",
                "features": [{"resource_group": [{"prevent_deletion_if_contains_resources": true}]}]
            }),
            &HashMap::new(),
        )
        .unwrap()
        .build()
        .unwrap();
        assert!(cfg.features.resource_group.prevent_deletion_if_contains_resources);
        assert!(cfg.features.virtual_machine.delete_os_disk_on_deletion);
    }

    #[test]
    fn test_schema_rejects_unknown_arguments() {
        let schema = provider_config_schema();
        assert!(validate(&schema, &json!({"metadata_host": "h", "features": []})).is_empty());
        assert_eq!(validate(&schema, &json!({"skip_credentials_validation": true})).len(), 1);
    }
}
