use std::collections::BTreeMap;
use std::sync::Arc;

use super::{SkipReason, Toolchain};
use crate::config::TargetConfig;

/// A buildable pack bound to exactly one host-compatible toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
  pub name: String,
  pub library: bool,
  pub toolchain: Arc<Toolchain>,
}

impl Target {
  /// Bind the first toolchain in preference order that survived filtering.
  pub fn from_config(cfg: &TargetConfig, toolchains: &BTreeMap<String, Arc<Toolchain>>) -> Result<Self, SkipReason> {
    let toolchain = cfg
      .toolchains
      .iter()
      .find_map(|name| toolchains.get(name))
      .ok_or_else(|| SkipReason::NoToolchain(cfg.toolchains.clone()))?;

    Ok(Self {
      name: cfg.pack.clone(),
      library: cfg.library,
      toolchain: Arc::clone(toolchain),
    })
  }

  /// The same target built with a different toolchain.
  pub fn rebind(&self, toolchain: Arc<Toolchain>) -> Self {
    Self {
      name: self.name.clone(),
      library: self.library,
      toolchain,
    }
  }
}
