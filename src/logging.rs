//! Logging and tracing setup.
//!
//! Logs are written to **stderr** using the `tracing` ecosystem. The filter is
//! taken from `RUST_LOG` when present. Otherwise the level Terraform asked for
//! through `TF_LOG` is honoured, so `TF_LOG=DEBUG terraform apply` surfaces the
//! provider's debug output alongside Terraform's own.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: full `tracing` filter directives (highest precedence)
//! - `TF_LOG`: Terraform log level (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`, `JSON`)
//! - `TF_ACC`: when set, the default drops to `warn` to keep acceptance output readable

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the default logging subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level, used when neither
/// `RUST_LOG` nor `TF_LOG` is set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Try to initialize logging, returning false if a subscriber was already set.
///
/// Useful in tests, where several cases may race to install the subscriber.
pub fn try_init_logging() -> bool {
    subscriber("info").try_init().is_ok()
}

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry().with(build_filter(default_level)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = default_directive(
            std::env::var("TF_LOG").ok().as_deref(),
            std::env::var_os("TF_ACC").is_some(),
            default_level,
        );
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Pick the filter directive from Terraform's own logging variables.
pub(crate) fn default_directive<'a>(
    tf_log: Option<&str>,
    acceptance: bool,
    default_level: &'a str,
) -> &'a str {
    match tf_log.map(|v| v.trim().to_ascii_uppercase()) {
        Some(level) if !level.is_empty() => match level.as_str() {
            "TRACE" | "JSON" => "trace",
            "DEBUG" => "debug",
            "INFO" => "info",
            "WARN" => "warn",
            "ERROR" => "error",
            _ => "info",
        },
        _ if acceptance => "warn",
        _ => default_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("terraform_provider_azurestack=debug").is_ok());
        assert!(EnvFilter::try_new("warn,terraform_provider_azurestack::poll=trace").is_ok());
    }

    #[test]
    fn test_tf_log_levels() {
        assert_eq!(default_directive(Some("TRACE"), false, "info"), "trace");
        assert_eq!(default_directive(Some("debug"), false, "info"), "debug");
        assert_eq!(default_directive(Some("JSON"), false, "info"), "trace");
        assert_eq!(default_directive(Some("WARN"), true, "info"), "warn");
        assert_eq!(default_directive(Some("verbose"), false, "error"), "info");
    }

    #[test]
    fn test_default_without_tf_log() {
        assert_eq!(default_directive(None, false, "debug"), "debug");
        assert_eq!(default_directive(Some(""), false, "error"), "error");
        // acceptance runs stay quiet unless TF_LOG asks otherwise
        assert_eq!(default_directive(None, true, "info"), "warn");
    }
}
