use std::time::Duration;

use genctl_core::timing::{effective_poll_interval, DEFAULT_POLL_INTERVAL, HEALTH_CHECK_TIMEOUT};

/// Default base URL of the generation server.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:7860/";

/// Default request body chunk size for upload progress.
pub const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Controller configuration loaded from environment variables.
///
/// All fields have defaults suitable for a generation server on the local
/// machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Base URL of the generation server.
    pub server_url: String,
    /// Poll cadence while generating. Zero disables polling.
    pub poll_interval: Duration,
    /// Upper bound on a single health check.
    pub health_timeout: Duration,
    /// Request body chunk size; controls upload progress granularity.
    pub upload_chunk_bytes: usize,
}

/// Rejected configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            health_timeout: HEALTH_CHECK_TIMEOUT,
            upload_chunk_bytes: DEFAULT_UPLOAD_CHUNK_BYTES,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                  |
    /// |-----------------------------|--------------------------|
    /// | `GENCTL_SERVER_URL`         | `http://localhost:7860/` |
    /// | `GENCTL_POLL_INTERVAL_MS`   | `1000`                   |
    /// | `GENCTL_HEALTH_TIMEOUT_MS`  | `5000`                   |
    /// | `GENCTL_UPLOAD_CHUNK_BYTES` | `65536`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server_url = lookup("GENCTL_SERVER_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.server_url);

        let poll_interval = match lookup("GENCTL_POLL_INTERVAL_MS") {
            Some(raw) => {
                Duration::from_millis(parse(&raw, "GENCTL_POLL_INTERVAL_MS", "milliseconds")?)
            }
            None => defaults.poll_interval,
        };

        let health_timeout = match lookup("GENCTL_HEALTH_TIMEOUT_MS") {
            Some(raw) => {
                let ms: u64 = parse(&raw, "GENCTL_HEALTH_TIMEOUT_MS", "positive milliseconds")?;
                if ms == 0 {
                    return Err(invalid("GENCTL_HEALTH_TIMEOUT_MS", raw, "positive milliseconds"));
                }
                Duration::from_millis(ms)
            }
            None => defaults.health_timeout,
        };

        let upload_chunk_bytes = match lookup("GENCTL_UPLOAD_CHUNK_BYTES") {
            Some(raw) => {
                let bytes: usize =
                    parse(&raw, "GENCTL_UPLOAD_CHUNK_BYTES", "a positive byte count")?;
                if bytes == 0 {
                    return Err(invalid("GENCTL_UPLOAD_CHUNK_BYTES", raw, "a positive byte count"));
                }
                bytes
            }
            None => defaults.upload_chunk_bytes,
        };

        Ok(Self {
            server_url,
            poll_interval,
            health_timeout,
            upload_chunk_bytes,
        })
    }

    /// The poll cadence sessions actually use; `None` disables polling.
    pub fn effective_poll_interval(&self) -> Option<Duration> {
        effective_poll_interval(self.poll_interval)
    }
}

fn parse<T: std::str::FromStr>(
    raw: &str,
    key: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, raw.to_string(), expected))
}

fn invalid(key: &'static str, value: String, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value,
        expected,
    }
}
