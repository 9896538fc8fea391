use std::path::Path;

use super::{SkipReason, build_artifact};
use crate::artifact::Artifact;
use crate::config::ExternalConfig;

/// Prebuilt headers and libraries consumed through search paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct External {
  pub name: String,
  pub rpaths: Vec<String>,
  pub headers: Vec<Artifact>,
  pub libraries: Vec<Artifact>,
}

impl External {
  pub fn from_config(cfg: &ExternalConfig, base: &Path) -> Result<Self, SkipReason> {
    Ok(Self {
      name: cfg.name.clone(),
      rpaths: cfg.rpaths.clone(),
      headers: cfg
        .headers
        .iter()
        .map(|h| build_artifact("header", h, base))
        .collect::<Result<_, _>>()?,
      libraries: cfg
        .libraries
        .iter()
        .map(|l| build_artifact("library", l, base))
        .collect::<Result<_, _>>()?,
    })
  }

  pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
    self.headers.iter().chain(self.libraries.iter())
  }
}
