//! Local filesystem backend.
//!
//! A directory source is exposed by replacing the output directory with a
//! symlink to it. A file source is treated as an archive and extracted.

use std::path::Path;

use tracing::debug;

use super::{FetchError, symlink_dir, unpack};
use crate::interrupt::Interrupt;

/// Strip the `file://` prefix from a normalized locator.
pub fn source_path(url: &str) -> &Path {
  Path::new(url.strip_prefix("file://").unwrap_or(url))
}

pub async fn fetch(url: &str, out: &Path, interrupt: &Interrupt) -> Result<(), FetchError> {
  interrupt.check()?;
  let source = source_path(url).to_path_buf();
  let meta = tokio::fs::metadata(&source)
    .await
    .map_err(|_| FetchError::SourceNotFound(source.clone()))?;

  if meta.is_dir() {
    tokio::fs::remove_dir(out).await.map_err(FetchError::io(out))?;
    symlink_dir(&source, out).map_err(FetchError::io(out))?;
    debug!(source = %source.display(), out = %out.display(), "linked directory source");
    return Ok(());
  }

  let name = source
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let out = out.to_path_buf();
  let interrupt = interrupt.clone();
  tokio::task::spawn_blocking(move || unpack::unpack(&source, &name, &out, &interrupt))
    .await
    .map_err(|e| FetchError::Join(e.to_string()))??;
  Ok(())
}
