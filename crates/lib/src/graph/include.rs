use std::path::Path;

use super::{SkipReason, build_artifact, build_optional};
use crate::artifact::Artifact;
use crate::config::IncludeConfig;

/// Another module pulled in by this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
  pub name: String,
  pub source: Artifact,
  /// Layered over `source`; its `bob.toml` and pack directories win.
  pub overlay: Option<Artifact>,
  /// Build the included module's targets with their own toolchain instead of
  /// the requesting target's.
  pub remote_toolchain: bool,
}

impl Include {
  pub fn from_config(cfg: &IncludeConfig, base: &Path) -> Result<Self, SkipReason> {
    Ok(Self {
      name: cfg.module.clone(),
      source: build_artifact("source", &cfg.source, base)?,
      overlay: build_optional("overlay", cfg.overlay.as_ref(), base)?,
      remote_toolchain: cfg.remote_toolchain,
    })
  }

  pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
    std::iter::once(&self.source).chain(self.overlay.iter())
  }
}
