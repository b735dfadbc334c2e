//! MLflow model registry access

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};

pub mod client;

pub use client::MlflowClient;

/// A registered model as reported by the registry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RegisteredModel {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latest_versions: Vec<ModelVersion>,
    #[serde(default)]
    pub tags: Vec<ModelTag>,
}

impl RegisteredModel {
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.iter().any(|t| t.key == key)
    }
}

/// One version of a registered model.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelVersion {
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub current_stage: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub source: String,
    /// Milliseconds since the Unix epoch
    #[serde(default, deserialize_with = "lenient_i64")]
    pub creation_timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelTag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Anything that can enumerate registered models.
pub trait RegistrySource: Send + Sync {
    fn list_models(&self) -> Result<Vec<RegisteredModel>, RegistryError>;
}

// The REST gateway encodes int64 fields either as numbers or as strings.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(i64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
