//! Shared CLI utilities.

use crate::config::EffectiveConfig;
use std::path::PathBuf;

/// The user's home directory, if known.
pub fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("USERPROFILE").filter(|v| !v.is_empty()).map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("HOME").filter(|v| !v.is_empty()).map(PathBuf::from)
    }
}

/// Copy of `config` with secrets masked, for display.
pub fn redacted(config: &EffectiveConfig) -> EffectiveConfig {
    let mut shown = config.clone();
    shown.tokens = shown.tokens.iter().map(|_| "***".to_string()).collect();
    shown.mlflow_token = shown.mlflow_token.as_ref().map(|_| "***".to_string());
    shown
}
