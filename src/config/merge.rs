//! Partial configuration layers and their merge into [`EffectiveConfig`]
//!
//! Every source (config file or command line) produces a [`PartialConfig`].
//! Unset fields are skipped when serialized, so a layer only overrides the
//! settings it actually defines.

use super::cfg_file::{parse_bool, RawEntry, RawValue};
use super::settings::EffectiveConfig;
use crate::error::{ConfigError, ConfigResult};
use figment::providers::Serialized;
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Settings contributed by a single source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mlflow_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basepath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mlflow_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mlflow_noverify: Option<bool>,
}

impl PartialConfig {
    /// Names of the fields this layer defines.
    pub fn defined_fields(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &PartialConfig::default()
    }

    /// Type the raw entries of a config file.
    ///
    /// Unknown keys are skipped. A repeated scalar key keeps its last value;
    /// a repeated list key appends.
    pub fn from_entries(entries: &[RawEntry], source_name: &str) -> ConfigResult<Self> {
        let mut partial = PartialConfig::default();

        for entry in entries {
            let at = format!("{}:{}", source_name, entry.line);
            match entry.key.as_str() {
                "host" => partial.host = Some(scalar(entry, &at)?),
                "port" => partial.port = Some(number(entry, &at)?),
                "workers" => partial.workers = Some(number(entry, &at)?),
                "mlflow" | "mlflow_uri" => partial.mlflow_uri = Some(scalar(entry, &at)?),
                "basepath" => partial.basepath = Some(scalar(entry, &at)?),
                "timer" => partial.timer = Some(number(entry, &at)?),
                "staging" => partial.staging = Some(flag(entry, &at)?),
                "tags" => partial.tags.get_or_insert_with(Vec::new).extend(list(entry)),
                "token" | "tokens" => {
                    partial.tokens.get_or_insert_with(Vec::new).extend(list(entry))
                }
                "mlflow_token" => partial.mlflow_token = Some(scalar(entry, &at)?),
                "mlflow_noverify" => partial.mlflow_noverify = Some(flag(entry, &at)?),
                other => {
                    tracing::debug!("Ignoring unknown config key '{}' at {}", other, at);
                }
            }
        }

        Ok(partial)
    }
}

fn scalar(entry: &RawEntry, at: &str) -> ConfigResult<String> {
    match &entry.value {
        RawValue::Scalar(s) => Ok(s.clone()),
        RawValue::Flag => Err(ConfigError::value(at, &entry.key, "a value is required")),
        RawValue::List(_) => {
            Err(ConfigError::value(at, &entry.key, "expected a single value, found a list"))
        }
    }
}

fn number<T: FromStr>(entry: &RawEntry, at: &str) -> ConfigResult<T> {
    let s = scalar(entry, at)?;
    s.trim().parse::<T>().map_err(|_| {
        ConfigError::value(
            at,
            &entry.key,
            format!("expected a non-negative integer, found '{}'", s),
        )
    })
}

fn flag(entry: &RawEntry, at: &str) -> ConfigResult<bool> {
    match &entry.value {
        RawValue::Flag => Ok(true),
        RawValue::Scalar(s) => parse_bool(s).ok_or_else(|| {
            ConfigError::value(at, &entry.key, format!("expected true or false, found '{}'", s))
        }),
        RawValue::List(_) => {
            Err(ConfigError::value(at, &entry.key, "expected true or false, found a list"))
        }
    }
}

fn list(entry: &RawEntry) -> Vec<String> {
    match &entry.value {
        RawValue::Flag => Vec::new(),
        RawValue::Scalar(s) if s.is_empty() => Vec::new(),
        RawValue::Scalar(s) => vec![s.clone()],
        RawValue::List(items) => items.clone(),
    }
}

/// A named layer, lowest precedence first when passed to [`merge_layers`].
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub values: PartialConfig,
}

/// Result of merging: the config plus which source set each field.
#[derive(Debug, Clone)]
pub struct Merged {
    pub config: EffectiveConfig,
    pub origins: BTreeMap<String, String>,
}

pub const DEFAULTS_SOURCE: &str = "built-in default";

/// Merge layers over the built-in defaults. Later layers win.
pub fn merge_layers(layers: &[Layer]) -> ConfigResult<Merged> {
    let mut figment = Figment::from(Serialized::defaults(EffectiveConfig::default()));
    let mut origins = BTreeMap::new();

    for layer in layers {
        for field in layer.values.defined_fields() {
            origins.insert(field, layer.name.clone());
        }
        figment = figment.merge(Serialized::defaults(&layer.values));
    }

    let config: EffectiveConfig = figment.extract().map_err(|e| {
        let field = e.path.join(".");
        let source_name =
            origins.get(&field).cloned().unwrap_or_else(|| DEFAULTS_SOURCE.to_string());
        ConfigError::value(source_name, field, e.to_string())
    })?;

    Ok(Merged { config, origins })
}
