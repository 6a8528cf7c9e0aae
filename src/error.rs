//! Error types for the AzureStack provider.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the provider.
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;

/// Errors surfaced by resource handlers and the shared helpers they use.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found (HTTP 404 from the API).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A resource already exists and must be imported before it can be managed.
    #[error("{0}")]
    AlreadyExists(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A resource ID could not be parsed.
    #[error("parsing resource ID {id:?}: {reason}")]
    InvalidResourceId {
        /// The offending ID.
        id: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A polled resource reported a status outside both the pending and target sets.
    #[error("unexpected state '{state}', wanted target '{}'", .expected.join(", "))]
    UnexpectedState {
        /// The status that was observed.
        state: String,
        /// The target statuses.
        expected: Vec<String>,
    },

    /// Waiting for a resource or operation exceeded its deadline.
    #[error(
        "timeout while waiting for state to become '{}' (last state: '{last_state}', timeout: {timeout:?})",
        .expected.join(", ")
    )]
    Timeout {
        /// The last status observed before giving up.
        last_state: String,
        /// The target statuses.
        expected: Vec<String>,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The operation was cancelled because the provider is stopping.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A long-running operation reached a terminal failure state.
    #[error("long-running operation failed: {0}")]
    OperationFailed(String),

    /// The Resource Manager API returned an error response.
    #[error("unexpected status {status} from the Resource Manager API: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error body or message.
        message: String,
    },

    /// The operation conflicts with the current state of the resource.
    #[error("{0}")]
    Conflict(String),

    /// An error annotated with the action that produced it.
    #[error("{action}: {source}")]
    Context {
        /// What the handler was doing, e.g. `creating Resource Group "rg"`.
        action: String,
        /// The underlying error.
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Get the error message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::AlreadyExists(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::Cancelled(msg)
            | Self::OperationFailed(msg)
            | Self::Conflict(msg) => msg.clone(),
            Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the error (or the error it wraps) is an HTTP 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { status, .. } => *status == 404,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether the error was caused by a deadline or a cancellation.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Cancelled(_) => true,
            Self::Context { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Build the error returned when a resource exists but is not in state.
    pub fn requires_import(resource_type: &str, id: &str) -> Self {
        Self::AlreadyExists(format!(
            "A resource with the ID {id:?} already exists - to be managed via Terraform this resource needs to be imported into the State. Please see the resource documentation for {resource_type:?} for more information."
        ))
    }

    /// Prefix the error with the action that failed.
    pub fn context(self, action: impl Into<String>) -> Self {
        Self::Context {
            action: action.into(),
            source: Box::new(self),
        }
    }
}

/// Attach handler context to the error side of a [`Result`].
pub trait ResultExt<T> {
    /// Wrap the error with `action`, computed lazily.
    fn with_context<F, S>(self, action: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F, S>(self, action: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| err.context(action()))
    }
}
