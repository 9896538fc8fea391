//! Error, option and result types for target builds.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::config::{ConfigError, PackConfig};
use crate::graph::{GraphError, Toolchain};
use crate::interrupt::Interrupted;
use crate::loader::lock::CacheLockError;
use crate::sum::SumError;
use crate::util::hash::DigestError;

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("target '{target}' is not available in module '{module}'")]
  UnknownTarget { module: String, target: String },

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("included module '{module}' is invalid: {source}")]
  Graph {
    module: String,
    #[source]
    source: GraphError,
  },

  #[error("library target '{target}' of included module '{module}' has no toolchain for this host")]
  NoRemoteToolchain { module: String, target: String },

  #[error("pack '{pack}' of module '{module}' not found")]
  PackNotFound { module: String, pack: String },

  #[error("pack dependency cycle in module '{module}' through '{pack}'")]
  PackCycle { module: String, pack: String },

  #[error("{owner}: {source}")]
  Artifact {
    owner: String,
    #[source]
    source: ArtifactError,
  },

  #[error("{owner}: '{first}' and '{second}' would both be linked as '{link}'")]
  LinkCollision {
    owner: String,
    link: PathBuf,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("failed to digest '{path}': {source}")]
  Digest {
    path: PathBuf,
    #[source]
    source: DigestError,
  },

  #[error(transparent)]
  Sum(#[from] SumError),

  #[error(transparent)]
  Lock(#[from] CacheLockError),

  #[error("io error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to run '{program}': {source}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("compiling '{file}' of pack '{pack}' failed with exit code {code:?}:\n{stderr}")]
  Compile {
    pack: String,
    file: PathBuf,
    code: Option<i32>,
    stderr: String,
  },

  #[error("linking target '{target}' failed with exit code {code:?}:\n{stderr}")]
  Link {
    target: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("build task failed: {0}")]
  Join(String),

  #[error(transparent)]
  Interrupted(#[from] Interrupted),
}

impl ProcessError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| Self::Io { path, source }
  }

  pub(crate) fn join(err: tokio::task::JoinError) -> Self {
    Self::Join(err.to_string())
  }
}

/// Build configuration for one invocation.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
  /// Drop cached content of every artifact before fetching it.
  pub clean: bool,
  /// Where the linked output goes. Defaults to `<module dir>/build`.
  pub output_dir: Option<PathBuf>,
  /// Maximum number of concurrent fetches and compilations.
  pub parallelism: usize,
  /// Replace mismatching sum ledger entries instead of failing.
  pub repin: bool,
}

impl Default for ProcessorOptions {
  fn default() -> Self {
    Self {
      clean: false,
      output_dir: None,
      parallelism: num_cpus(),
      repin: false,
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// One compilation unit of the closure.
#[derive(Debug, Clone)]
pub struct PackUnit {
  pub module: String,
  pub name: String,
  pub dir: PathBuf,
  pub config: PackConfig,
  /// Slot of the toolchain compiling this pack in the closure.
  pub toolchain: String,
  /// Pack header directories visible to this pack, in `-I` order: its own,
  /// those of its transitive deps, then those of the libraries its module
  /// includes.
  pub header_dirs: Vec<PathBuf>,
}

impl PackUnit {
  /// `module/pack`, used in logs and errors.
  pub fn label(&self) -> String {
    format!("{}/{}", self.module, self.name)
  }

  /// Header directories this pack exports.
  pub fn include_dirs(&self) -> Vec<PathBuf> {
    if self.config.includes.is_empty() {
      return vec![self.dir.clone()];
    }
    self.config.includes.iter().map(|i| self.dir.join(i)).collect()
  }
}

/// A toolchain taking part in the build, keyed by a slot name unique within it.
#[derive(Debug, Clone)]
pub struct ToolchainSlot {
  pub slot: String,
  pub toolchain: Arc<Toolchain>,
}

/// A compiled pack.
#[derive(Debug, Clone)]
pub struct PackResult {
  pub label: String,
  pub cache_dir: PathBuf,
  pub objects: Vec<PathBuf>,
  /// Objects came from the pack cache without invoking the compiler.
  pub cached: bool,
}

/// Result of a successful target build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
  pub target: String,
  pub library: bool,
  pub output: PathBuf,
  pub packs: Vec<PackResult>,
  pub artifacts: usize,
  /// Backend fetches performed, as opposed to cache hits.
  pub fetched: usize,
}

impl BuildOutcome {
  pub fn compiled(&self) -> usize {
    self.packs.iter().filter(|p| !p.cached).count()
  }
}
