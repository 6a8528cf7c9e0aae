//! Waiting for eventually-consistent resources to settle.
//!
//! The Resource Manager control plane is eventually consistent: a resource
//! that was just created may 404 for a while, and a provisioning state may go
//! through several intermediate values before it reaches `Succeeded` or
//! `Ready`. [`StateWaiter`] repeatedly calls a refresh function until the
//! reported status is one of the target statuses, failing on the first error,
//! on any status outside the pending/target sets, or when the timeout elapses.
//!
//! ```
//! # async fn example() -> terraform_provider_azurestack::Result<()> {
//! use std::time::Duration;
//! use terraform_provider_azurestack::poll::{Refresh, StateWaiter};
//!
//! let rule = StateWaiter::new(["Initializing", "InProgress"], ["Ready"])
//!     .min_timeout(Duration::from_secs(60))
//!     .continuous_target_occurence(5)
//!     .timeout(Duration::from_secs(30 * 60))
//!     .wait(|| async { Ok(Refresh::found("rule", "Ready")) })
//!     .await?;
//! # let _ = rule;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, Result};
use crate::timeouts::OperationContext;

/// Status used by refresh functions that fold a 404 into an ordinary status,
/// so that a freshly created resource which is not yet visible counts as pending.
pub const RESPONSE_NOT_FOUND: &str = "ResponseNotFound";

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(180);

/// The outcome of one refresh call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh<T> {
    /// The fetched object. `None` means the resource does not exist.
    pub value: Option<T>,
    /// The status the object reported.
    pub status: String,
}

impl<T> Refresh<T> {
    /// The resource exists and reports `status`.
    pub fn found(value: T, status: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            status: status.into(),
        }
    }

    /// The resource does not exist.
    pub fn gone() -> Self {
        Self {
            value: None,
            status: String::new(),
        }
    }
}

/// Configuration for waiting on a status transition.
#[derive(Debug, Clone)]
pub struct StateWaiter {
    pending: Vec<String>,
    target: Vec<String>,
    delay: Duration,
    poll_interval: Option<Duration>,
    min_timeout: Duration,
    timeout: Duration,
    continuous_target_occurence: u32,
    not_found_checks: u32,
    cancel: Option<CancellationToken>,
    description: String,
}

impl StateWaiter {
    /// Wait while the status is in `pending` until it is in `target`.
    ///
    /// An empty `target` means "wait until the resource is gone".
    pub fn new<P, T, S1, S2>(pending: P, target: T) -> Self
    where
        P: IntoIterator<Item = S1>,
        T: IntoIterator<Item = S2>,
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            poll_interval: None,
            min_timeout: Duration::ZERO,
            timeout: Duration::from_secs(20 * 60),
            continuous_target_occurence: 1,
            not_found_checks: 20,
            cancel: None,
            description: "resource".to_string(),
        }
    }

    /// Wait this long before the first refresh.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Refresh at a fixed interval instead of backing off.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Lower bound for the backoff between refreshes.
    pub fn min_timeout(mut self, min: Duration) -> Self {
        self.min_timeout = min;
        self
    }

    /// Give up after this long.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of consecutive target observations required before succeeding.
    pub fn continuous_target_occurence(mut self, count: u32) -> Self {
        self.continuous_target_occurence = count.max(1);
        self
    }

    /// Number of consecutive "not found" refreshes tolerated.
    pub fn not_found_checks(mut self, count: u32) -> Self {
        self.not_found_checks = count;
        self
    }

    /// Abort the wait when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Bound the wait by a handler's remaining time and stop token.
    pub fn within(self, ctx: &OperationContext) -> Self {
        self.timeout(ctx.remaining())
            .cancel_on(ctx.stop_token().clone())
    }

    /// Name used in log lines.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Poll `refresh` until a target status is observed often enough.
    ///
    /// Returns the last fetched value, or `None` when the target set is empty
    /// and the resource disappeared.
    pub async fn wait<T, F, Fut>(&self, mut refresh: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Refresh<T>>>,
    {
        debug!(
            resource = %self.description,
            pending = ?self.pending,
            target = ?self.target,
            timeout = ?self.timeout,
            "waiting for state"
        );

        let mut last_state = String::new();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.poll_loop(&mut refresh, &mut last_state),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(resource = %self.description, last_state = %last_state, "timed out waiting for state");
                Err(ProviderError::Timeout {
                    last_state,
                    expected: self.target.clone(),
                    timeout: self.timeout,
                })
            },
        }
    }

    async fn poll_loop<T, F, Fut>(&self, refresh: &mut F, last_state: &mut String) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Refresh<T>>>,
    {
        if !self.delay.is_zero() {
            self.sleep(self.delay).await?;
        }

        let mut target_occurence = 0u32;
        let mut not_found_tick = 0u32;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let Refresh { value, status } = match refresh().await {
                Ok(r) => r,
                Err(err) => {
                    warn!(resource = %self.description, error = %err, "refresh failed");
                    return Err(err);
                },
            };
            trace!(resource = %self.description, status = %status, "refreshed");

            match value {
                None => {
                    if self.target.is_empty() {
                        return Ok(None);
                    }
                    target_occurence = 0;
                    not_found_tick += 1;
                    if not_found_tick > self.not_found_checks {
                        return Err(ProviderError::NotFound(format!(
                            "{} couldn't be found after {} checks",
                            self.description, self.not_found_checks
                        )));
                    }
                },
                Some(value) => {
                    not_found_tick = 0;
                    *last_state = status.clone();

                    if self.target.contains(&status) {
                        target_occurence += 1;
                        if target_occurence >= self.continuous_target_occurence {
                            debug!(resource = %self.description, state = %status, "reached target state");
                            return Ok(Some(value));
                        }
                    } else if self.pending.contains(&status) {
                        target_occurence = 0;
                    } else {
                        return Err(ProviderError::UnexpectedState {
                            state: status,
                            expected: self.target.clone(),
                        });
                    }
                },
            }

            // back off while pending, but re-check quickly while counting target hits
            if target_occurence == 0 {
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            let wait = match self.poll_interval {
                Some(interval) if !interval.is_zero() && interval < MAX_POLL_INTERVAL => interval,
                _ => backoff.max(self.min_timeout),
            };
            self.sleep(wait).await?;
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(ProviderError::Cancelled(format!(
                    "waiting for {}",
                    self.description
                ))),
                _ = tokio::time::sleep(duration) => Ok(()),
            },
            None => {
                tokio::time::sleep(duration).await;
                Ok(())
            },
        }
    }
}
