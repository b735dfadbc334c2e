//! Effective server configuration and its built-in defaults

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_MLFLOW_URI: &str = "http://localhost:4040";
pub const DEFAULT_TIMER_SECS: u64 = 600;

/// Fully resolved configuration.
///
/// Built once at startup by [`crate::config::ConfigResolver`] and never
/// mutated afterwards. Worker threads share it read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Network bind address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Number of HTTP worker threads
    pub workers: usize,
    /// MLflow tracking / model registry endpoint
    pub mlflow_uri: String,
    /// Prefix for every route (empty or `/something`)
    pub basepath: String,
    /// Seconds between model refreshes
    pub timer: u64,
    /// Prefer Staging versions over Production
    pub staging: bool,
    /// Only serve models carrying at least one of these tags
    pub tags: Vec<String>,
    /// Allowed bearer tokens; empty disables the check
    pub tokens: Vec<String>,
    /// Bearer token for the MLflow server
    pub mlflow_token: Option<String>,
    /// Skip TLS certificate verification towards MLflow
    pub mlflow_noverify: bool,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            mlflow_uri: DEFAULT_MLFLOW_URI.to_string(),
            basepath: String::new(),
            timer: DEFAULT_TIMER_SECS,
            staging: false,
            tags: Vec::new(),
            tokens: Vec::new(),
            mlflow_token: None,
            mlflow_noverify: false,
        }
    }
}

impl EffectiveConfig {
    /// Check range constraints that the type system does not capture.
    ///
    /// `source_of` maps a field name to the source that set it, so errors
    /// point at the file or flag the user has to fix.
    pub fn validate(&self, source_of: impl Fn(&str) -> String) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::value(source_of("host"), "host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::value(
                source_of("port"),
                "port",
                "must be between 1 and 65535",
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::value(source_of("workers"), "workers", "must be at least 1"));
        }
        if self.timer == 0 {
            return Err(ConfigError::value(
                source_of("timer"),
                "timer",
                "must be at least 1 second",
            ));
        }
        match reqwest::Url::parse(&self.mlflow_uri) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::value(
                    source_of("mlflow_uri"),
                    "mlflow",
                    format!("unsupported scheme '{}', expected http or https", url.scheme()),
                ))
            }
            Err(e) => {
                return Err(ConfigError::value(
                    source_of("mlflow_uri"),
                    "mlflow",
                    format!("'{}' is not a valid URL: {}", self.mlflow_uri, e),
                ))
            }
        }
        if !self.basepath.is_empty()
            && (!self.basepath.starts_with('/') || self.basepath.ends_with('/'))
        {
            return Err(ConfigError::value(
                source_of("basepath"),
                "basepath",
                "must start with '/' and must not end with '/'",
            ));
        }
        Ok(())
    }

    /// `host:port` as accepted by the HTTP listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
