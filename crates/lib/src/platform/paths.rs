use std::path::PathBuf;

use crate::consts::{APP_NAME, CACHE_ENV_VAR};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the default cache root for fetched artifacts and compiled packs
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  if let Ok(path) = std::env::var(CACHE_ENV_VAR) {
    return PathBuf::from(path);
  }
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Local"))
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the default cache root for fetched artifacts and compiled packs
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  if let Ok(path) = std::env::var(CACHE_ENV_VAR) {
    return PathBuf::from(path);
  }
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}
