//! Error types for configuration, registry access and model execution
//!
//! Strategy:
//! - Configuration errors are fatal: they are raised before the server starts
//!   and there is no partial-configuration mode.
//! - Registry and model errors happen at runtime: they are recorded in the
//!   server's error table and logged, the server keeps running.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving the effective configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but a line could not be parsed.
    #[error("Failed to parse config file '{}' at line {line}: {message}", path.display())]
    Parse { path: PathBuf, line: usize, message: String },

    /// The command line could not be parsed.
    #[error("Invalid command-line arguments: {0}")]
    Arguments(String),

    /// A recognized setting holds a value of the wrong type or out of range.
    #[error("Invalid value for '{field}' ({source_name}): {message}")]
    Value { source_name: String, field: String, message: String },

    /// A config file exists but could not be read.
    #[error("Failed reading config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        ConfigError::Parse { path: path.into(), line, message: message.into() }
    }

    pub fn value(
        source_name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ConfigError::Value {
            source_name: source_name.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for the `ConfigParseError` family (file syntax or CLI syntax).
    pub fn is_parse_error(&self) -> bool {
        matches!(self, ConfigError::Parse { .. } | ConfigError::Arguments(_))
    }

    /// True for the `ConfigValueError` family.
    pub fn is_value_error(&self) -> bool {
        matches!(self, ConfigError::Value { .. })
    }
}

/// Errors talking to the MLflow model registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse registry response: {0}")]
    Parse(String),
}

/// Errors loading a model or running a prediction.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model '{name}' has no registered versions")]
    NoVersions { name: String },

    #[error("Failed to load model '{name}': {reason}")]
    Load { name: String, reason: String },

    #[error("Prediction failed: {0}")]
    Predict(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    /// Short type name reported in HTTP error details.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelError::NoVersions { .. } => "NoVersions",
            ModelError::Load { .. } => "LoadError",
            ModelError::Predict(_) => "PredictionError",
            ModelError::Http(_) => "HttpError",
            ModelError::Io(_) => "IoError",
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_message_names_file_and_line() {
        let err = ConfigError::parse("./mlflow-pyfunc-server.cfg", 3, "expected 'key = value'");
        let msg = err.to_string();
        assert!(msg.contains("./mlflow-pyfunc-server.cfg"));
        assert!(msg.contains("line 3"));
        assert!(err.is_parse_error());
        assert!(!err.is_value_error());
    }

    #[test]
    fn arguments_error_counts_as_parse_error() {
        assert!(ConfigError::Arguments("unexpected argument".into()).is_parse_error());
    }

    #[test]
    fn value_error_names_field() {
        let err = ConfigError::value("command line", "workers", "must be at least 1");
        assert!(err.is_value_error());
        assert!(err.to_string().contains("'workers'"));
    }
}
