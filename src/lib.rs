//! mlflow-pyfunc-server: serve MLflow pyfunc models over HTTP
//!
//! Models are discovered in an MLflow model registry, started as scoring
//! processes and exposed under one HTTP endpoint each. Settings are resolved
//! from config files and the command line before anything starts.

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod serve;

pub use config::{ConfigResolver, EffectiveConfig, PartialConfig, Resolution};
pub use error::{ConfigError, ModelError, RegistryError};
