//! Service configuration
//!
//! Loaded in layers: built-in defaults, then `config/iecsrv.yaml` (or the file
//! given with `--config`), then `IECSRV_*` environment variables with `__`
//! separating nested keys (`IECSRV_RETRY__MAX_ATTEMPTS=5`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IecSrvError, Result};

pub const SERVICE_NAME: &str = "iecsrv";
pub const ENV_PREFIX: &str = "IECSRV_";
pub const DEFAULT_CONFIG_PATH: &str = "config/iecsrv.yaml";
pub const DEFAULT_MMS_PORT: u16 = 102;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IecSrvConfig {
    pub retry: RetryConfig,
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
    pub devices: DevicesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 1.0,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// MMS port used for every device
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Bound of a single read or write on an open association
    pub operation_timeout_ms: u64,
    /// Wall-clock bound of one request, enforced by the front end
    pub request_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_MMS_PORT,
            connect_timeout_ms: 5000,
            operation_timeout_ms: 10_000,
            request_timeout_ms: 120_000,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: PathBuf,
    pub json: bool,
    /// Write the rolling log file in addition to the console
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
            json: false,
            file: true,
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self, level_override: Option<&str>, ansi: bool) -> common::LogConfig {
        common::LogConfig {
            service_name: SERVICE_NAME.to_string(),
            log_dir: self.file.then(|| self.dir.clone()),
            level: level_override.unwrap_or(&self.level).to_string(),
            enable_json: self.json,
            ansi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// YAML file with the device configuration records
    pub file: PathBuf,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("config/devices.yaml"),
        }
    }
}

impl IecSrvConfig {
    /// Load and validate
    ///
    /// Without an explicit path the default file is used when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        let path = path.or_else(|| default_path.exists().then_some(default_path));
        match path {
            Some(p) => debug!("Loading configuration from {}", p.display()),
            None => debug!("No configuration file, using defaults and environment"),
        }

        let config: Self = common::load_config(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts < 1 {
            return Err(IecSrvError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(IecSrvError::config(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        if self.retry.max_delay_ms < self.retry.delay_ms {
            return Err(IecSrvError::config(
                "retry.max_delay_ms must not be below retry.delay_ms",
            ));
        }
        if self.connection.port == 0 {
            return Err(IecSrvError::config("connection.port must be non-zero"));
        }
        if self.connection.connect_timeout_ms == 0
            || self.connection.operation_timeout_ms == 0
            || self.connection.request_timeout_ms == 0
        {
            return Err(IecSrvError::config("connection timeouts must be non-zero"));
        }
        Ok(())
    }
}
