//! Device configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::DeviceId;
use crate::observability::LogFormat;

/// Default per-request timeout for remote calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connect timeout for remote calls.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration for a scout device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutConfig {
    /// Directory holding the record store and write queue.
    pub data_dir: PathBuf,

    /// Base URL of the remote authority. `None` means offline-only.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Timeout applied to each remote request.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Timeout for establishing a connection to the remote authority.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Identifier attached to pushes.
    pub device_id: DeviceId,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".scout"),
            remote_url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            log_format: LogFormat::default(),
            device_id: DeviceId::generate(),
        }
    }
}

impl ScoutConfig {
    /// Loads configuration from environment variables on top of defaults.
    ///
    /// - `SCOUT_DATA_DIR`
    /// - `SCOUT_REMOTE_URL`
    /// - `SCOUT_REQUEST_TIMEOUT_SECS`
    /// - `SCOUT_CONNECT_TIMEOUT_SECS`
    /// - `SCOUT_LOG_FORMAT` (`json` or `pretty`)
    /// - `SCOUT_DEVICE_ID`
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable is present but cannot be
    /// parsed, or if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`ScoutConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name).and_then(|v| {
                let trimmed = v.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
        };

        let mut config = Self::default();

        if let Some(dir) = var("SCOUT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.remote_url = var("SCOUT_REMOTE_URL");
        if let Some(secs) = parse_u64("SCOUT_REQUEST_TIMEOUT_SECS", var("SCOUT_REQUEST_TIMEOUT_SECS"))? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64("SCOUT_CONNECT_TIMEOUT_SECS", var("SCOUT_CONNECT_TIMEOUT_SECS"))? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(format) = var("SCOUT_LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(Error::InvalidInput(format!(
                        "SCOUT_LOG_FORMAT must be 'json' or 'pretty', got '{other}'"
                    )));
                }
            };
        }
        if let Some(device) = var("SCOUT_DEVICE_ID") {
            config.device_id = DeviceId::new(device)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for zero timeouts or a remote URL that is not http(s).
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "request timeout must be greater than zero".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "connect timeout must be greater than zero".into(),
            ));
        }
        if let Some(url) = &self.remote_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::InvalidInput(format!(
                    "SCOUT_REMOTE_URL must be an http(s) URL, got '{url}'"
                )));
            }
        }
        Ok(())
    }
}

fn parse_u64(name: &str, value: Option<String>) -> Result<Option<u64>> {
    value
        .map(|v| {
            v.parse::<u64>()
                .map_err(|e| Error::InvalidInput(format!("{name} must be an integer: {e}")))
        })
        .transpose()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
