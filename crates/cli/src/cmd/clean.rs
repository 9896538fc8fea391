//! Implementation of the `bob clean` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use bob_lib::platform::paths::cache_dir;

use crate::output::{print_info, print_success};

/// Remove the whole cache root. Fetched artifacts and compiled packs are
/// recreated by the next build.
pub fn cmd_clean(cache: Option<PathBuf>) -> Result<()> {
  let root = cache.unwrap_or_else(cache_dir);

  if !root.exists() {
    print_info(&format!("Cache {} is already empty", root.display()));
    return Ok(());
  }

  std::fs::remove_dir_all(&root).with_context(|| format!("failed to remove cache {}", root.display()))?;
  print_success(&format!("Removed cache {}", root.display()));
  Ok(())
}
