use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use sdgen_client::client::DEFAULT_MAX_PAYLOAD_BYTES;
use sdgen_core::error::CoreError;
use sdgen_core::job::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};

/// Gateway used when `SDGEN_GATEWAY_URL` is unset (local replica port).
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:4943";
/// Per-request HTTP timeout when `SDGEN_REQUEST_TIMEOUT_SECS` is unset.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local gateway. Command-line
/// flags override individual values after loading.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Gateway base URL.
    pub gateway_url: String,
    /// Status checks before a job counts as timed out.
    pub max_attempts: u32,
    /// Pause between two status checks.
    pub retry_delay: Duration,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
    /// Largest result payload accepted.
    pub max_payload_bytes: usize,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

/// A variable was set but could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("Invalid value '{value}' for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `SDGEN_GATEWAY_URL`          | `http://127.0.0.1:4943`  |
    /// | `SDGEN_MAX_ATTEMPTS`         | `30`                     |
    /// | `SDGEN_RETRY_DELAY_SECS`     | `2`                      |
    /// | `SDGEN_REQUEST_TIMEOUT_SECS` | `30`                     |
    /// | `SDGEN_MAX_PAYLOAD_BYTES`    | `10485760`               |
    /// | `SDGEN_LOG_JSON`             | `false`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let gateway_url = lookup("SDGEN_GATEWAY_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

        let max_attempts: u32 = parse_var(&lookup, "SDGEN_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError {
                var: "SDGEN_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let retry_delay_secs: u64 = parse_var(
            &lookup,
            "SDGEN_RETRY_DELAY_SECS",
            DEFAULT_RETRY_DELAY.as_secs(),
        )?;
        let request_timeout_secs: u64 = parse_var(
            &lookup,
            "SDGEN_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let max_payload_bytes: usize =
            parse_var(&lookup, "SDGEN_MAX_PAYLOAD_BYTES", DEFAULT_MAX_PAYLOAD_BYTES)?;
        let log_json: bool = parse_var(&lookup, "SDGEN_LOG_JSON", false)?;

        Ok(Self {
            gateway_url,
            max_attempts,
            retry_delay: Duration::from_secs(retry_delay_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_payload_bytes,
            log_json,
        })
    }

    /// The polling policy described by this configuration.
    pub fn retry_policy(&self) -> Result<RetryPolicy, CoreError> {
        RetryPolicy::new(self.max_attempts, self.retry_delay)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
