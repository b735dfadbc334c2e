//! Config file discovery and loading

use super::cfg_file::parse_cfg;
use super::merge::PartialConfig;
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "mlflow-pyfunc-server";

/// Candidate config files in the order they are checked.
///
/// Project-local file first, then the user-home file. Later entries take
/// precedence over earlier ones when both define a setting.
pub fn candidate_paths(cwd: &Path, home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![cwd.join(format!("{SERVICE_NAME}.cfg"))];
    if let Some(home) = home {
        paths.push(home.join(format!(".{SERVICE_NAME}.cfg")));
    }
    paths
}

/// Read access to config files.
pub trait ConfigFs {
    /// Raw file content, or `Ok(None)` when the file does not exist.
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

impl ConfigFs for OsFs {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// In-memory files, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryFs {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

impl ConfigFs for MemoryFs {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        Ok(self.files.get(path).cloned())
    }
}

/// Load one config file. A missing file yields `Ok(None)`.
pub fn load_config_file(fs: &dyn ConfigFs, path: &Path) -> ConfigResult<Option<PartialConfig>> {
    let Some(bytes) = fs
        .read(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?
    else {
        tracing::debug!("Config file not found: {}", path.display());
        return Ok(None);
    };
    let content = decode_utf8(bytes, path)?;

    let entries = parse_cfg(&content, path)?;
    let partial = PartialConfig::from_entries(&entries, &path.display().to_string())?;
    Ok(Some(partial))
}

/// Invalid UTF-8 is a parse error located at the line holding the first bad byte.
fn decode_utf8(bytes: Vec<u8>, path: &Path) -> ConfigResult<String> {
    String::from_utf8(bytes).map_err(|e| {
        let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
        let line = valid.iter().filter(|&&b| b == b'\n').count() + 1;
        ConfigError::parse(path, line, "file is not valid UTF-8")
    })
}
