//! The Sum ledger (`bob.sum`).
//!
//! Records the verified SHA256 of every artifact a build materialized, keyed
//! by the artifact's cache identity (plus sub-path). A digest disagreeing with
//! a recorded one is an integrity failure unless re-pinning was requested.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "http-9f86d0.../bin/gcc": {
//!       "url": "https://example.com/gcc-14.tar.gz",
//!       "sha256": "2c26b46b..."
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Current ledger format version.
pub const SUM_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumEntry {
  /// Locator the digest was taken from, kept for humans reading the file.
  pub url: String,
  pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumFile {
  pub version: u32,
  pub entries: BTreeMap<String, SumEntry>,
}

#[derive(Debug, Error)]
pub enum SumError {
  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("unsupported sum file version {0}, expected {SUM_VERSION}")]
  UnsupportedVersion(u32),

  #[error("checksum mismatch for '{url}' ({key}): recorded {recorded}, got {actual}")]
  Mismatch {
    key: String,
    url: String,
    recorded: String,
    actual: String,
  },
}

/// Result of checking a digest against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verified {
  /// First sighting, now recorded.
  Recorded,
  Matched,
  /// Mismatch replaced because re-pinning was requested.
  Repinned { previous: String },
}

impl Default for SumFile {
  fn default() -> Self {
    Self {
      version: SUM_VERSION,
      entries: BTreeMap::new(),
    }
  }
}

/// The ledger bound to its on-disk location.
#[derive(Debug)]
pub struct Sum {
  path: PathBuf,
  file: SumFile,
  dirty: bool,
}

impl Sum {
  /// Load the ledger at `path`. A missing file yields an empty ledger.
  pub fn load(path: &Path) -> Result<Self, SumError> {
    let file = match fs::read_to_string(path) {
      Ok(content) => {
        let file: SumFile = serde_json::from_str(&content).map_err(|source| SumError::Parse {
          path: path.to_path_buf(),
          source,
        })?;
        if file.version != SUM_VERSION {
          return Err(SumError::UnsupportedVersion(file.version));
        }
        file
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => SumFile::default(),
      Err(source) => {
        return Err(SumError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    debug!(path = %path.display(), entries = file.entries.len(), "loaded sum ledger");
    Ok(Self {
      path: path.to_path_buf(),
      file,
      dirty: false,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn get(&self, key: &str) -> Option<&SumEntry> {
    self.file.entries.get(key)
  }

  pub fn len(&self) -> usize {
    self.file.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.file.entries.is_empty()
  }

  /// Check `sha256` against the recorded digest for `key`, recording it on
  /// first sighting. A mismatch fails unless `repin` is set.
  pub fn verify_or_record(&mut self, key: &str, url: &str, sha256: &str, repin: bool) -> Result<Verified, SumError> {
    match self.file.entries.get(key) {
      Some(entry) if entry.sha256 == sha256 => return Ok(Verified::Matched),
      Some(entry) if !repin => {
        return Err(SumError::Mismatch {
          key: key.to_string(),
          url: url.to_string(),
          recorded: entry.sha256.clone(),
          actual: sha256.to_string(),
        });
      }
      _ => {}
    }

    let new = SumEntry {
      url: url.to_string(),
      sha256: sha256.to_string(),
    };
    self.dirty = true;
    match self.file.entries.insert(key.to_string(), new) {
      Some(previous) => {
        warn!(url, key, previous = %previous.sha256, current = sha256, "re-pinned checksum");
        Ok(Verified::Repinned {
          previous: previous.sha256,
        })
      }
      None => {
        debug!(url, key, sha256, "recorded checksum");
        Ok(Verified::Recorded)
      }
    }
  }

  /// Write the ledger back if anything changed.
  ///
  /// The content goes to a sibling temp file first and is renamed over the
  /// ledger, so an interrupted save leaves the previous ledger intact.
  pub fn save(&mut self) -> Result<(), SumError> {
    if !self.dirty {
      return Ok(());
    }
    let content = serde_json::to_string_pretty(&self.file).map_err(|e| SumError::Write {
      path: self.path.clone(),
      source: io::Error::other(e),
    })?;

    let temp_path = self.temp_path();
    fs::write(&temp_path, content).map_err(|source| SumError::Write {
      path: temp_path.clone(),
      source,
    })?;
    fs::rename(&temp_path, &self.path).map_err(|source| SumError::Write {
      path: self.path.clone(),
      source,
    })?;
    self.dirty = false;
    debug!(path = %self.path.display(), entries = self.file.entries.len(), "saved sum ledger");
    Ok(())
  }

  fn temp_path(&self) -> PathBuf {
    let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    self.path.with_file_name(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const A: &str = "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";
  const B: &str = "fcde2b2edba56bf408601fb721fe9b5c338d10ee429ea04fae5511b68fbf8fb9";

  #[test]
  fn missing_file_is_empty() {
    let temp = TempDir::new().unwrap();
    let sum = Sum::load(&temp.path().join("bob.sum")).unwrap();
    assert!(sum.is_empty());
  }

  #[test]
  fn records_then_matches() {
    let temp = TempDir::new().unwrap();
    let mut sum = Sum::load(&temp.path().join("bob.sum")).unwrap();

    assert_eq!(sum.verify_or_record("http-1", "https://x/a", A, false).unwrap(), Verified::Recorded);
    assert_eq!(sum.verify_or_record("http-1", "https://x/a", A, false).unwrap(), Verified::Matched);
  }

  #[test]
  fn mismatch_is_an_error_without_repin() {
    let temp = TempDir::new().unwrap();
    let mut sum = Sum::load(&temp.path().join("bob.sum")).unwrap();
    sum.verify_or_record("http-1", "https://x/a", A, false).unwrap();

    let err = sum.verify_or_record("http-1", "https://x/a", B, false).unwrap_err();
    assert!(matches!(err, SumError::Mismatch { ref recorded, .. } if recorded == A));
    assert_eq!(sum.get("http-1").unwrap().sha256, A);
  }

  #[test]
  fn repin_replaces_entry() {
    let temp = TempDir::new().unwrap();
    let mut sum = Sum::load(&temp.path().join("bob.sum")).unwrap();
    sum.verify_or_record("http-1", "https://x/a", A, false).unwrap();

    assert_eq!(
      sum.verify_or_record("http-1", "https://x/a", B, true).unwrap(),
      Verified::Repinned { previous: A.to_string() }
    );
    assert_eq!(sum.get("http-1").unwrap().sha256, B);
  }

  #[test]
  fn persists_across_loads() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bob.sum");

    let mut sum = Sum::load(&path).unwrap();
    sum.verify_or_record("git-1", "git://h/r@v1", A, false).unwrap();
    sum.save().unwrap();

    let mut reloaded = Sum::load(&path).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert!(reloaded.verify_or_record("git-1", "git://h/r@v1", B, false).is_err());
  }

  #[test]
  fn save_replaces_ledger_without_leftovers() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bob.sum");
    let mut sum = Sum::load(&path).unwrap();
    sum.verify_or_record("git-1", "git://h/r@v1", A, false).unwrap();
    sum.save().unwrap();

    assert!(!temp.path().join("bob.sum.tmp").exists());
    assert_eq!(Sum::load(&path).unwrap().get("git-1").unwrap().sha256, A);
  }

  #[test]
  fn failed_save_keeps_previous_ledger() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bob.sum");
    let mut sum = Sum::load(&path).unwrap();
    sum.verify_or_record("git-1", "git://h/r@v1", A, false).unwrap();
    sum.save().unwrap();

    // A directory in the way of the temp file makes the write fail
    fs::create_dir(temp.path().join("bob.sum.tmp")).unwrap();
    sum.verify_or_record("git-2", "git://h/s@v1", B, false).unwrap();
    assert!(matches!(sum.save(), Err(SumError::Write { .. })));

    let reloaded = Sum::load(&path).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.get("git-1").unwrap().sha256, A);
  }

  #[test]
  fn unchanged_ledger_is_not_written() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bob.sum");
    let mut sum = Sum::load(&path).unwrap();
    sum.save().unwrap();
    assert!(!path.exists());
  }

  #[test]
  fn rejects_unknown_version() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bob.sum");
    fs::write(&path, r#"{"version": 9, "entries": {}}"#).unwrap();
    assert!(matches!(Sum::load(&path), Err(SumError::UnsupportedVersion(9))));
  }
}
