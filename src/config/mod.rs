//! Configuration loading and merging
//!
//! Handles loading from config files and CLI arguments with proper
//! precedence (CLI > later file > earlier file > Defaults).

pub mod cfg_file;
pub mod loader;
pub mod merge;
pub mod resolver;
pub mod settings;

pub use loader::{candidate_paths, ConfigFs, MemoryFs, OsFs, SERVICE_NAME};
pub use merge::PartialConfig;
pub use resolver::{ConfigResolver, Resolution};
pub use settings::EffectiveConfig;
