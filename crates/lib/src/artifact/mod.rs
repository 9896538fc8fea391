//! Artifacts: versioned blobs obtainable from a file path, a git repository,
//! or an HTTP(S) URL.
//!
//! An [`Artifact`] is declared by a toolchain, target, include or external and
//! stays unmaterialized until the [`Loader`] fetches it into
//! `<cache root>/<kind>-<hex(identity)>/`. Every variant offers the same four
//! operations so orchestration code never branches on the concrete kind:
//!
//! - [`Artifact::load`]: materialize (single-flight, idempotent)
//! - [`Artifact::clean`]: drop the identity's cache subtree
//! - [`Artifact::sha256`]: digest the materialized file
//! - [`Artifact::symlink`]: expose the materialized file under a link root
//!
//! # Locators
//!
//! `<protocol>://<location>[@<revision>]` with protocols `file`, `git`, `http`
//! and `https`. An optional sub-path selects a file or directory inside the
//! fetched content without changing the identity.

pub mod file;
pub mod git;
pub mod http;
pub mod unpack;

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::config::LocatorConfig;
use crate::interrupt::Interrupted;
use crate::loader::{Fetcher, LoadError, Loader};
use crate::util::hash::{ContentHash, hash_file};

pub use unpack::UnpackError;

/// The fetch mechanism behind an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
  File,
  Git,
  Http,
}

impl Kind {
  /// Stable discriminant fed into identity hashing.
  pub fn discriminant(&self) -> u8 {
    match self {
      Self::File => 0,
      Self::Git => 1,
      Self::Http => 2,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::File => "file",
      Self::Git => "git",
      Self::Http => "http",
    }
  }
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Content-derived cache key: SHA256 over the encoded (kind, locator) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; 32]);

impl Identity {
  pub fn of(kind: Kind, url: &str) -> Self {
    let mut hasher = Sha256::new();
    // The discriminant is a single digit, so the separator can't be ambiguous
    hasher.update(format!("{}-{}", kind.discriminant(), url).as_bytes());
    Self(hasher.finalize().into())
  }

  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }

  /// Name of the cache directory holding this identity's content.
  pub fn dir_name(&self, kind: Kind) -> String {
    format!("{}-{}", kind, self.to_hex())
  }
}

impl fmt::Display for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_hex())
  }
}

/// Errors raised by a fetch backend while materializing content.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("io error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("source '{0}' does not exist")]
  SourceNotFound(PathBuf),

  #[error("invalid git locator '{url}': {reason}")]
  InvalidGitLocator { url: String, reason: String },

  #[error("git {stage} failed for '{url}': {message}")]
  Git {
    url: String,
    stage: &'static str,
    message: String,
  },

  #[error("revision '{rev}' not found in '{url}'")]
  RevisionNotFound { url: String, rev: String },

  #[error("request to '{url}' failed: {message}")]
  Http { url: String, message: String },

  #[error("'{url}' returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error(transparent)]
  Unpack(#[from] UnpackError),

  #[error("cache lock failed at '{path}': {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("fetch task aborted: {0}")]
  Join(String),

  #[error(transparent)]
  Interrupted(#[from] Interrupted),
}

impl FetchError {
  pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
    move |source| Self::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Errors raised by [`Artifact`] operations.
#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("invalid locator '{url}': expected '<protocol>://<location>'")]
  MalformedLocator { url: String },

  #[error("unsupported protocol '{protocol}' in '{url}'")]
  UnsupportedProtocol { url: String, protocol: String },

  #[error("invalid sub-path '{path}' for '{url}'")]
  InvalidSubPath { url: String, path: String },

  #[error("invalid git locator '{url}': {reason}")]
  InvalidGitLocator { url: String, reason: String },

  #[error(transparent)]
  Load(#[from] LoadError),

  #[error("'{path}' of '{url}' not found after load")]
  MissingContent { url: String, path: PathBuf },

  #[error("'{path}' of '{url}' is a directory; operation needs a file")]
  IsDirectory { url: String, path: PathBuf },

  #[error("io error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash '{url}': {source}")]
  Digest {
    url: String,
    #[source]
    source: crate::util::hash::DigestError,
  },
}

/// A declared, fetchable, cacheable, hashable, symlinkable unit of content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
  kind: Kind,
  url: String,
  subpath: Option<PathBuf>,
  identity: Identity,
}

impl Artifact {
  /// Create an artifact from an already normalized locator.
  pub fn new(kind: Kind, url: impl Into<String>) -> Self {
    let url = url.into();
    let identity = Identity::of(kind, &url);
    Self {
      kind,
      url,
      subpath: None,
      identity,
    }
  }

  /// Parse a configured locator. Relative `file://` locations resolve against
  /// `base`, the directory of the descriptor that declared them.
  pub fn from_config(cfg: &LocatorConfig, base: &Path) -> Result<Self, ArtifactError> {
    let (kind, url) = parse_locator(&cfg.url, base)?;
    let mut artifact = Self::new(kind, url);

    if let Some(path) = cfg.path.as_deref().filter(|p| !p.is_empty()) {
      let subpath = PathBuf::from(path);
      let escapes = subpath
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
      if escapes {
        return Err(ArtifactError::InvalidSubPath {
          url: cfg.url.clone(),
          path: path.to_string(),
        });
      }
      artifact.subpath = Some(subpath);
    }

    Ok(artifact)
  }

  pub fn kind(&self) -> Kind {
    self.kind
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn identity(&self) -> Identity {
    self.identity
  }

  pub fn subpath(&self) -> Option<&Path> {
    self.subpath.as_deref()
  }

  /// Key under which this artifact's digest is recorded in the sum ledger.
  pub fn ledger_key(&self) -> String {
    let dir = self.identity.dir_name(self.kind);
    match &self.subpath {
      Some(sub) => format!("{}/{}", dir, sub.to_string_lossy().replace('\\', "/")),
      None => dir,
    }
  }

  /// Human-readable reference used in errors and logs.
  pub fn describe(&self) -> String {
    match &self.subpath {
      Some(sub) => format!("{} ({})", self.url, sub.display()),
      None => self.url.clone(),
    }
  }

  /// The identity-named cache directory under `cache_root`.
  pub fn cache_dir(&self, cache_root: &Path) -> PathBuf {
    cache_root.join(self.identity.dir_name(self.kind))
  }

  /// The path this artifact denotes inside its cache directory.
  pub fn content_path(&self, cache_root: &Path) -> PathBuf {
    let dir = self.cache_dir(cache_root);
    match &self.subpath {
      Some(sub) => dir.join(sub),
      None => dir,
    }
  }

  /// Materialize the artifact and return its content path.
  ///
  /// Repeated calls return the cached path without refetching unless
  /// [`Artifact::clean`] ran in between or `clean` is set.
  pub async fn load<F: Fetcher>(&self, loader: &Loader<F>, clean: bool) -> Result<PathBuf, ArtifactError> {
    loader.load(self.kind, &self.url, clean).await?;

    let content = self.content_path(loader.root());
    if !content.exists() {
      return Err(ArtifactError::MissingContent {
        url: self.url.clone(),
        path: content,
      });
    }
    Ok(content)
  }

  /// Remove this identity's entire cache subtree.
  pub fn clean<F: Fetcher>(&self, loader: &Loader<F>) -> Result<(), ArtifactError> {
    loader.evict(self.kind, &self.url)?;
    let dir = self.cache_dir(loader.root());
    debug!(url = %self.url, path = %dir.display(), "cleaning artifact cache");
    remove_path(&dir).map_err(|source| ArtifactError::Io { path: dir, source })
  }

  /// SHA256 of the materialized content. Directories are rejected.
  pub fn sha256<F: Fetcher>(&self, loader: &Loader<F>) -> Result<ContentHash, ArtifactError> {
    let content = self.materialized_file(loader.root())?;
    hash_file(&content).map_err(|source| ArtifactError::Digest {
      url: self.url.clone(),
      source,
    })
  }

  /// Create `link_root/<basename>` pointing at the materialized content and
  /// return the link path. Directories are rejected.
  pub fn symlink<F: Fetcher>(&self, link_root: &Path, loader: &Loader<F>) -> Result<PathBuf, ArtifactError> {
    let content = self.materialized_file(loader.root())?;
    let io_err = |path: &Path| {
      let path = path.to_path_buf();
      move |source| ArtifactError::Io { path, source }
    };

    let name = content.file_name().ok_or_else(|| ArtifactError::IsDirectory {
      url: self.url.clone(),
      path: content.clone(),
    })?;
    let link = link_root.join(name);

    std::fs::create_dir_all(link_root).map_err(io_err(link_root))?;
    remove_path(&link).map_err(io_err(&link))?;
    symlink_file(&content, &link).map_err(io_err(&link))?;

    debug!(link = %link.display(), target = %content.display(), "linked artifact");
    Ok(link)
  }

  fn materialized_file(&self, cache_root: &Path) -> Result<PathBuf, ArtifactError> {
    let content = self.content_path(cache_root);
    let meta = std::fs::metadata(&content).map_err(|_| ArtifactError::MissingContent {
      url: self.url.clone(),
      path: content.clone(),
    })?;
    if meta.is_dir() {
      return Err(ArtifactError::IsDirectory {
        url: self.url.clone(),
        path: content,
      });
    }
    Ok(content)
  }
}

impl fmt::Display for Artifact {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.describe())
  }
}

/// Split a locator into its kind and normalized url.
fn parse_locator(url: &str, base: &Path) -> Result<(Kind, String), ArtifactError> {
  let Some((protocol, location)) = url.split_once("://") else {
    return Err(ArtifactError::MalformedLocator { url: url.to_string() });
  };
  if location.is_empty() {
    return Err(ArtifactError::MalformedLocator { url: url.to_string() });
  }

  match protocol.to_ascii_lowercase().as_str() {
    "file" => {
      let path = Path::new(location);
      let absolute = if path.is_absolute() { path.to_path_buf() } else { base.join(path) };
      Ok((Kind::File, format!("file://{}", absolute.display())))
    }
    "git" => {
      let normalized = format!("git://{}", location);
      git::parse_locator(&normalized).map_err(|e| match e {
        FetchError::InvalidGitLocator { url, reason } => ArtifactError::InvalidGitLocator { url, reason },
        other => ArtifactError::InvalidGitLocator {
          url: normalized.clone(),
          reason: other.to_string(),
        },
      })?;
      Ok((Kind::Git, normalized))
    }
    scheme @ ("http" | "https") => Ok((Kind::Http, format!("{}://{}", scheme, location))),
    _ => Err(ArtifactError::UnsupportedProtocol {
      url: url.to_string(),
      protocol: protocol.to_string(),
    }),
  }
}

/// Remove a file, symlink or directory tree. Missing paths are fine.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
  match std::fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
    Ok(_) => remove_link_or_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

#[cfg(unix)]
fn remove_link_or_file(path: &Path) -> io::Result<()> {
  std::fs::remove_file(path)
}

#[cfg(windows)]
fn remove_link_or_file(path: &Path) -> io::Result<()> {
  // Directory symlinks must be removed with remove_dir on Windows
  std::fs::remove_file(path).or_else(|_| std::fs::remove_dir(path))
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}

#[cfg(unix)]
pub(crate) fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub(crate) fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_dir(target, link)
}
