//! Long-running Resource Manager operations.
//!
//! Mutating calls return an [`OperationHandle`] as soon as the request has
//! been accepted. Callers then wait on the handle, which polls the operation
//! status through [`StateWaiter`] bounded by the handler's
//! [`OperationContext`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::client::ArmResource;
use crate::error::{ProviderError, Result};
use crate::poll::{Refresh, StateWaiter};
use crate::timeouts::OperationContext;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Status of an asynchronous operation as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Cancelled server-side.
    Canceled,
}

impl OperationStatus {
    /// The status as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }

    /// Whether the operation has stopped running.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a running operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationPoll {
    /// Current status.
    pub status: OperationStatus,
    /// Error message reported with a `Failed` or `Canceled` status.
    pub error: Option<String>,
    /// The resource the operation produced, once it has succeeded.
    pub resource: Option<ArmResource>,
}

impl OperationPoll {
    /// The operation is still running.
    pub fn in_progress() -> Self {
        Self {
            status: OperationStatus::InProgress,
            error: None,
            resource: None,
        }
    }

    /// The operation finished, optionally producing a resource.
    pub fn succeeded(resource: Option<ArmResource>) -> Self {
        Self {
            status: OperationStatus::Succeeded,
            error: None,
            resource,
        }
    }

    /// The operation failed with `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Failed,
            error: Some(message.into()),
            resource: None,
        }
    }
}

/// Fetches the current status of one operation.
#[async_trait::async_trait]
pub trait OperationPoller: Send + Sync {
    /// Query the operation status once.
    async fn poll(&self) -> Result<OperationPoll>;
}

/// A submitted operation that may still be running.
pub struct OperationHandle {
    description: String,
    poller: Option<Arc<dyn OperationPoller>>,
    result: Option<ArmResource>,
    poll_interval: Duration,
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("description", &self.description)
            .field("done", &self.is_done())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl OperationHandle {
    /// An operation the API completed synchronously.
    pub fn completed(description: impl Into<String>, result: Option<ArmResource>) -> Self {
        Self {
            description: description.into(),
            poller: None,
            result,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// An operation that has to be polled until it finishes.
    pub fn pending(description: impl Into<String>, poller: Arc<dyn OperationPoller>) -> Self {
        Self {
            description: description.into(),
            poller: Some(poller),
            result: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Poll at `interval` instead of the default ten seconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether the operation finished at submission time.
    pub fn is_done(&self) -> bool {
        self.poller.is_none()
    }

    /// What the operation is doing, e.g. `creating Resource Group "rg"`.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Wait until the operation finishes or the context expires.
    ///
    /// Returns the resource produced by the operation, if the API reported one.
    #[instrument(skip(self, ctx), fields(operation = %self.description))]
    pub async fn wait(self, ctx: &OperationContext) -> Result<Option<ArmResource>> {
        let Some(poller) = self.poller else {
            return Ok(self.result);
        };

        let waiter = StateWaiter::new(
            [OperationStatus::InProgress.as_str()],
            [OperationStatus::Succeeded.as_str()],
        )
        .poll_interval(self.poll_interval)
        .describe(self.description.clone())
        .within(ctx);

        let description = &self.description;
        let outcome = waiter
            .wait(|| {
                let poller = Arc::clone(&poller);
                async move {
                    let poll = poller.poll().await?;
                    debug!(status = %poll.status, "polled operation");
                    match poll.status {
                        OperationStatus::Failed | OperationStatus::Canceled => {
                            Err(ProviderError::OperationFailed(format!(
                                "{description}: operation {}: {}",
                                poll.status.as_str().to_lowercase(),
                                poll.error.as_deref().unwrap_or("no error details returned")
                            )))
                        },
                        status => Ok(Refresh::found(poll.resource, status.as_str())),
                    }
                }
            })
            .await?;

        Ok(outcome.flatten())
    }
}
