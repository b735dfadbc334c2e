//! Resolution of the effective configuration from all sources

use super::loader::{load_config_file, ConfigFs};
use super::merge::{merge_layers, Layer, PartialConfig, DEFAULTS_SOURCE};
use super::settings::EffectiveConfig;
use crate::error::ConfigResult;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const CLI_SOURCE: &str = "command line";

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: EffectiveConfig,
    /// Sources that contributed at least one value, lowest precedence first
    pub sources: Vec<String>,
    /// Field name -> source that set it; absent means built-in default
    pub origins: BTreeMap<String, String>,
}

impl Resolution {
    pub fn origin_of(&self, field: &str) -> &str {
        self.origins.get(field).map(String::as_str).unwrap_or(DEFAULTS_SOURCE)
    }
}

/// Merges defaults, candidate config files and command-line values.
///
/// Precedence, highest first: command line, later candidate file, earlier
/// candidate file, built-in defaults. Resolution runs once and stops at the
/// first error; a malformed file of any precedence fails the whole run.
pub struct ConfigResolver<'a> {
    fs: &'a dyn ConfigFs,
    candidates: Vec<PathBuf>,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(fs: &'a dyn ConfigFs, candidates: Vec<PathBuf>) -> Self {
        Self { fs, candidates }
    }

    pub fn resolve(self, cli: PartialConfig) -> ConfigResult<Resolution> {
        let mut layers = Vec::with_capacity(self.candidates.len() + 1);

        for path in &self.candidates {
            match load_config_file(self.fs, path)? {
                Some(values) if values.is_empty() => {
                    tracing::debug!("Config file {} sets nothing", path.display());
                }
                Some(values) => {
                    tracing::debug!("Loaded config file {}", path.display());
                    layers.push(Layer { name: path.display().to_string(), values });
                }
                None => {}
            }
        }

        if !cli.is_empty() {
            layers.push(Layer { name: CLI_SOURCE.to_string(), values: cli });
        }

        let merged = merge_layers(&layers)?;
        merged.config.validate(|field| {
            merged.origins.get(field).cloned().unwrap_or_else(|| DEFAULTS_SOURCE.to_string())
        })?;

        Ok(Resolution {
            config: merged.config,
            sources: layers.into_iter().map(|l| l.name).collect(),
            origins: merged.origins,
        })
    }
}
