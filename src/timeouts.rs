//! Per-operation timeouts and the context every handler runs under.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};

/// The kind of handler being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Creating a resource.
    Create,
    /// Reading a resource or data source.
    Read,
    /// Updating a resource in place.
    Update,
    /// Deleting a resource.
    Delete,
}

/// Default timeouts for each handler of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Timeout for create.
    pub create: Duration,
    /// Timeout for read.
    pub read: Duration,
    /// Timeout for update.
    pub update: Duration,
    /// Timeout for delete.
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(30 * 60),
        }
    }
}

impl Timeouts {
    /// Same timeout for create, update and delete; five minutes for read.
    pub fn uniform(mutate: Duration) -> Self {
        Self {
            create: mutate,
            update: mutate,
            delete: mutate,
            ..Self::default()
        }
    }

    /// Timeout for the given operation.
    pub fn for_operation(&self, op: Operation) -> Duration {
        match op {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }

    /// Apply user overrides from a resource's `timeouts` block.
    pub fn with_overrides(mut self, overrides: &TimeoutsBlock) -> Result<Self> {
        if let Some(v) = &overrides.create {
            self.create = parse_duration(v)?;
        }
        if let Some(v) = &overrides.read {
            self.read = parse_duration(v)?;
        }
        if let Some(v) = &overrides.update {
            self.update = parse_duration(v)?;
        }
        if let Some(v) = &overrides.delete {
            self.delete = parse_duration(v)?;
        }
        Ok(self)
    }
}

/// The `timeouts { ... }` block a user can place in a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsBlock {
    /// Override for create, e.g. `"90m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    /// Override for read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    /// Override for update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    /// Override for delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

impl TimeoutsBlock {
    /// Read the optional `timeouts` block out of a configuration value.
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        match config.get("timeouts") {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            // a single block arrives as a list of zero or one objects
            Some(serde_json::Value::Array(items)) => match items.first() {
                Some(v) if !v.is_null() => Ok(serde_json::from_value(crate::resource::strip_nulls(v))?),
                _ => Ok(Self::default()),
            },
            Some(v) => Ok(serde_json::from_value(crate::resource::strip_nulls(v))?),
        }
    }
}

/// Longest duration accepted, roughly 292 years.
pub const MAX_DURATION: Duration = Duration::from_nanos(i64::MAX as u64);

/// How far out a deadline is placed when `now + timeout` cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Parse a duration such as `"30m"`, `"1h30m"`, `"1.5h"` or `"500ms"`.
///
/// Each component is a decimal number, optionally with a fraction, followed
/// by one of `ns`, `us` (or `µs`), `ms`, `s`, `m` or `h`. Signs are not
/// accepted, and the total must not exceed [`MAX_DURATION`].
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || ProviderError::Validation(format!("invalid duration {input:?}"));
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        let (whole, fraction) = match rest[..number_len].split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (&rest[..number_len], ""),
        };
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid());
        }
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3600 * 1_000_000_000,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let mut nanos = whole.checked_mul(unit_nanos).ok_or_else(invalid)?;
        // digits past nanosecond precision of an hour cannot matter
        let fraction = &fraction[..fraction.len().min(20)];
        if !fraction.is_empty() {
            let scale = 10u128.pow(fraction.len() as u32);
            let digits: u128 = fraction.parse().map_err(|_| invalid())?;
            nanos = nanos.checked_add(digits * unit_nanos / scale).ok_or_else(invalid)?;
        }
        total = total.checked_add(nanos).ok_or_else(invalid)?;
        if total > MAX_DURATION.as_nanos() {
            return Err(invalid());
        }
    }
    // bounded by MAX_DURATION above
    Ok(Duration::from_nanos(total as u64))
}

/// Deadline and cancellation for a single handler invocation.
///
/// Every wait a handler performs (API calls, the state poller, long-running
/// operations) goes through [`OperationContext::run`] or checks
/// [`OperationContext::remaining`], so exceeding the operation's timeout or
/// stopping the provider surfaces as an ordinary error.
#[derive(Debug, Clone)]
pub struct OperationContext {
    operation: Operation,
    deadline: Instant,
    timeout: Duration,
    stop: CancellationToken,
}

impl OperationContext {
    /// Start a context for `operation` that expires after `timeout`.
    pub fn new(operation: Operation, timeout: Duration, stop: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            operation,
            deadline: now.checked_add(timeout).unwrap_or(now + FAR_FUTURE),
            timeout,
            stop,
        }
    }

    /// The operation this context was created for.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Whether the handler is creating a new resource.
    pub fn is_new_resource(&self) -> bool {
        self.operation == Operation::Create
    }

    /// The full timeout this context was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// The provider stop token.
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Whether the provider has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Run `fut` bounded by the deadline and the stop token.
    pub async fn run<F, T>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.stop.cancelled() => Err(ProviderError::Cancelled(what.to_string())),
            res = tokio::time::timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(ProviderError::Timeout {
                    last_state: String::new(),
                    expected: vec![what.to_string()],
                    timeout: self.timeout,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration(" 2h ").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("m30").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration(".h").is_err());
        assert!(parse_duration("1.2.3s").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    #[test]
    fn test_parse_duration_fractions_and_small_units() {
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(".5m").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2.s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1s250ms").unwrap(), Duration::from_millis(1250));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("3µs").unwrap(), Duration::from_micros(3));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        assert!(parse_duration("9999999999999999h").is_err());
        assert!(parse_duration("18446744073709551615s").is_err());
        assert!(parse_duration("99999999999999999999999999999999999999999h").is_err());
        assert!(parse_duration("2562047h2562047h").is_err());
        assert!(parse_duration("2562047h").is_ok());
    }

    #[tokio::test]
    async fn test_context_with_huge_timeout() {
        let ctx = OperationContext::new(Operation::Create, Duration::MAX, CancellationToken::new());
        assert!(ctx.remaining() > Duration::from_secs(86400 * 365));
        assert_eq!(ctx.run("creating", async { Ok(1) }).await.unwrap(), 1);
    }

    #[test]
    fn test_default_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.for_operation(Operation::Create), Duration::from_secs(1800));
        assert_eq!(t.for_operation(Operation::Read), Duration::from_secs(300));

        let rg = Timeouts::uniform(Duration::from_secs(90 * 60));
        assert_eq!(rg.delete, Duration::from_secs(5400));
        assert_eq!(rg.read, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides_from_config() {
        let block = TimeoutsBlock::from_config(&serde_json::json!({
            "name": "example",
            "timeouts": {"create": "1h", "delete": "10m"}
        }))
        .unwrap();
        let t = Timeouts::default().with_overrides(&block).unwrap();
        assert_eq!(t.create, Duration::from_secs(3600));
        assert_eq!(t.delete, Duration::from_secs(600));
        assert_eq!(t.update, Duration::from_secs(1800));

        let none = TimeoutsBlock::from_config(&serde_json::json!({"name": "x"})).unwrap();
        assert_eq!(none, TimeoutsBlock::default());

        let listed = TimeoutsBlock::from_config(&serde_json::json!({
            "timeouts": [{"read": "2m", "update": null}]
        }))
        .unwrap();
        assert_eq!(listed.read.as_deref(), Some("2m"));
        assert_eq!(listed.update, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let ctx = OperationContext::new(
            Operation::Create,
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        let result: Result<()> = ctx
            .run("creating", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_run_cancelled_by_stop() {
        let stop = CancellationToken::new();
        let ctx = OperationContext::new(Operation::Delete, Duration::from_secs(60), stop.clone());
        stop.cancel();
        let result: Result<()> = ctx
            .run("deleting", std::future::pending::<Result<()>>())
            .await;
        assert!(matches!(result, Err(ProviderError::Cancelled(_))));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = OperationContext::new(
            Operation::Read,
            Duration::from_secs(60),
            CancellationToken::new(),
        );
        assert_eq!(ctx.run("reading", async { Ok(7) }).await.unwrap(), 7);
        assert!(!ctx.is_new_resource());
    }
}
