//! Module and pack descriptors.
//!
//! A module is described by a `bob.toml` at its root; each pack directory
//! carries a `pack.toml`. Both are plain serde structs loaded with `toml`.
//! Validation beyond syntax (platform filtering, toolchain binding, locator
//! parsing) happens in [`crate::graph`].

mod types;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::MOD_FILE_NAME;

pub use types::{ExternalConfig, IncludeConfig, LocatorConfig, ModConfig, PackConfig, TargetConfig, ToolchainConfig};

/// Errors that can occur while reading descriptors.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("no {MOD_FILE_NAME} found in '{0}' or any parent directory")]
  ModNotFound(PathBuf),
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
  let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  toml::from_str(&content).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source: Box::new(source),
  })
}

impl ModConfig {
  /// Load a module descriptor from disk.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    debug!(path = %path.display(), "loading module descriptor");
    read_toml(path)
  }
}

impl PackConfig {
  /// Load a pack descriptor from disk.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    debug!(path = %path.display(), "loading pack descriptor");
    read_toml(path)
  }
}

/// Search `start` and its ancestors for a module descriptor.
pub fn find_mod_file(start: &Path) -> Result<PathBuf, ConfigError> {
  let start = dunce::canonicalize(start).map_err(|source| ConfigError::Read {
    path: start.to_path_buf(),
    source,
  })?;

  for dir in start.ancestors() {
    let candidate = dir.join(MOD_FILE_NAME);
    if candidate.is_file() {
      return Ok(candidate);
    }
  }

  Err(ConfigError::ModNotFound(start))
}
