//! Module graph: the host-filtered, immutable view of one `bob.toml`.
//!
//! [`load_mod`] favors partial availability. Entries that don't apply to the
//! current host, or whose locators can't be turned into artifacts, are dropped
//! with a warning and reported back as [`Skipped`] records. Only structural
//! problems in the descriptor itself fail the load.

mod external;
mod include;
mod target;
mod toolchain;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::config::{LocatorConfig, ModConfig};
use crate::platform::{Arch, Host, Platform};

pub use external::External;
pub use include::Include;
pub use target::Target;
pub use toolchain::Toolchain;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("module name must not be empty")]
  EmptyModuleName,

  #[error("module '{module}' declares {kind} '{name}' more than once")]
  Duplicate {
    module: String,
    kind: EntryKind,
    name: String,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
  Toolchain,
  Target,
  Include,
  External,
}

impl fmt::Display for EntryKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Toolchain => "toolchain",
      Self::Target => "target",
      Self::Include => "include",
      Self::External => "external",
    };
    write!(f, "{}", s)
  }
}

/// Why a configured entry is absent from the resolved [`Mod`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
  UnsupportedArch(Arch),
  UnsupportedPlatform(Platform),
  InvalidArtifact { role: &'static str, message: String },
  /// None of the preferred toolchains is available on this host.
  NoToolchain(Vec<String>),
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UnsupportedArch(arch) => write!(f, "architecture {} not supported", arch),
      Self::UnsupportedPlatform(platform) => write!(f, "platform {} not supported", platform),
      Self::InvalidArtifact { role, message } => write!(f, "invalid {} artifact: {}", role, message),
      Self::NoToolchain(names) => write!(f, "none of the toolchains [{}] is available", names.join(", ")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
  pub kind: EntryKind,
  pub name: String,
  pub reason: SkipReason,
}

/// A resolved module. Built once per invocation, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mod {
  pub name: String,
  /// Directory of the module's `bob.toml`; relative locators and pack
  /// directories resolve against it.
  pub root: PathBuf,
  pub host: Host,
  pub toolchains: BTreeMap<String, Arc<Toolchain>>,
  pub targets: BTreeMap<String, Target>,
  pub includes: BTreeMap<String, Include>,
  pub externals: BTreeMap<String, External>,
}

#[derive(Debug)]
pub struct LoadOutcome {
  pub module: Mod,
  pub skipped: Vec<Skipped>,
}

impl LoadOutcome {
  pub fn skipped(&self, kind: EntryKind) -> impl Iterator<Item = &Skipped> {
    self.skipped.iter().filter(move |s| s.kind == kind)
  }
}

/// Resolve `cfg` for `host`. `root` is the directory of the descriptor.
pub fn load_mod(cfg: &ModConfig, host: Host, root: &Path) -> Result<LoadOutcome, GraphError> {
  if cfg.module.trim().is_empty() {
    return Err(GraphError::EmptyModuleName);
  }

  let module = cfg.module.as_str();
  check_unique(module, EntryKind::Toolchain, cfg.toolchains.iter().map(|t| t.name.as_str()))?;
  check_unique(module, EntryKind::Target, cfg.targets.iter().map(|t| t.pack.as_str()))?;
  check_unique(module, EntryKind::Include, cfg.includes.iter().map(|i| i.module.as_str()))?;
  check_unique(module, EntryKind::External, cfg.externals.iter().map(|e| e.name.as_str()))?;

  let mut skipped = Vec::new();
  let mut skip = |kind: EntryKind, name: &str, reason: SkipReason| {
    match &reason {
      // Platform mismatches are expected for multi-host descriptors
      SkipReason::UnsupportedArch(_) | SkipReason::UnsupportedPlatform(_) => {
        debug!(module, %kind, name, %reason, "skipping entry")
      }
      _ => warn!(module, %kind, name, %reason, "skipping entry"),
    }
    skipped.push(Skipped {
      kind,
      name: name.to_string(),
      reason,
    });
  };

  let mut toolchains = BTreeMap::new();
  for tc in &cfg.toolchains {
    match Toolchain::from_config(tc, host, root) {
      Ok(toolchain) => {
        toolchains.insert(tc.name.clone(), Arc::new(toolchain));
      }
      Err(reason) => skip(EntryKind::Toolchain, &tc.name, reason),
    }
  }

  let mut targets = BTreeMap::new();
  for t in &cfg.targets {
    match Target::from_config(t, &toolchains) {
      Ok(target) => {
        debug!(module, target = %t.pack, toolchain = %target.toolchain.name, "bound target");
        targets.insert(t.pack.clone(), target);
      }
      Err(reason) => skip(EntryKind::Target, &t.pack, reason),
    }
  }

  let mut includes = BTreeMap::new();
  for i in &cfg.includes {
    match Include::from_config(i, root) {
      Ok(include) => {
        includes.insert(i.module.clone(), include);
      }
      Err(reason) => skip(EntryKind::Include, &i.module, reason),
    }
  }

  let mut externals = BTreeMap::new();
  for e in &cfg.externals {
    match External::from_config(e, root) {
      Ok(external) => {
        externals.insert(e.name.clone(), external);
      }
      Err(reason) => skip(EntryKind::External, &e.name, reason),
    }
  }

  Ok(LoadOutcome {
    module: Mod {
      name: cfg.module.clone(),
      root: root.to_path_buf(),
      host,
      toolchains,
      targets,
      includes,
      externals,
    },
    skipped,
  })
}

fn check_unique<'a>(module: &str, kind: EntryKind, names: impl Iterator<Item = &'a str>) -> Result<(), GraphError> {
  let mut seen = HashSet::new();
  for name in names {
    if !seen.insert(name) {
      return Err(GraphError::Duplicate {
        module: module.to_string(),
        kind,
        name: name.to_string(),
      });
    }
  }
  Ok(())
}

pub(crate) fn build_artifact(role: &'static str, cfg: &LocatorConfig, base: &Path) -> Result<Artifact, SkipReason> {
  Artifact::from_config(cfg, base).map_err(|e| SkipReason::InvalidArtifact {
    role,
    message: e.to_string(),
  })
}

pub(crate) fn build_optional(
  role: &'static str,
  cfg: Option<&LocatorConfig>,
  base: &Path,
) -> Result<Option<Artifact>, SkipReason> {
  cfg.map(|c| build_artifact(role, c, base)).transpose()
}
