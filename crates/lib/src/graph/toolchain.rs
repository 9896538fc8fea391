use std::path::Path;

use tracing::warn;

use super::{SkipReason, build_artifact, build_optional};
use crate::artifact::Artifact;
use crate::config::ToolchainConfig;
use crate::platform::{Arch, Host, Platform};

/// A compiler + linker + standard library bundle usable on the current host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
  pub name: String,
  pub compiler: Artifact,
  pub linker: Artifact,
  pub stdlib: Option<Artifact>,
  pub stdpplib: Option<Artifact>,
  pub supportlibs: Vec<Artifact>,
  pub startfiles: Vec<Artifact>,
}

impl Toolchain {
  /// Build a toolchain if it supports `host`.
  pub fn from_config(cfg: &ToolchainConfig, host: Host, base: &Path) -> Result<Self, SkipReason> {
    if !supports_arch(&cfg.name, &cfg.archs, host.arch) {
      return Err(SkipReason::UnsupportedArch(host.arch));
    }
    if !supports_platform(&cfg.name, &cfg.platforms, host.platform) {
      return Err(SkipReason::UnsupportedPlatform(host.platform));
    }

    Ok(Self {
      name: cfg.name.clone(),
      compiler: build_artifact("compiler", &cfg.compiler, base)?,
      linker: build_artifact("linker", &cfg.linker, base)?,
      stdlib: build_optional("stdlib", cfg.stdlib.as_ref(), base)?,
      stdpplib: build_optional("std++lib", cfg.stdpplib.as_ref(), base)?,
      supportlibs: cfg
        .supportlibs
        .iter()
        .map(|l| build_artifact("supportlib", l, base))
        .collect::<Result<_, _>>()?,
      startfiles: cfg
        .startfiles
        .iter()
        .map(|l| build_artifact("startfile", l, base))
        .collect::<Result<_, _>>()?,
    })
  }

  /// Every component artifact, in declaration order.
  pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
    [&self.compiler, &self.linker]
      .into_iter()
      .chain(self.stdlib.iter())
      .chain(self.stdpplib.iter())
      .chain(self.supportlibs.iter())
      .chain(self.startfiles.iter())
  }
}

fn supports_arch(toolchain: &str, tokens: &[String], arch: Arch) -> bool {
  tokens.iter().any(|token| match Arch::from_token(token) {
    Some(a) => a == arch,
    None => {
      warn!(toolchain, token = %token, "unknown architecture in toolchain");
      false
    }
  })
}

fn supports_platform(toolchain: &str, tokens: &[String], platform: Platform) -> bool {
  tokens.iter().any(|token| match Platform::from_token(token) {
    Some(p) => p == platform,
    None => {
      warn!(toolchain, token = %token, "unknown platform in toolchain");
      false
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::LocatorConfig;

  fn config(platforms: &[&str], archs: &[&str]) -> ToolchainConfig {
    ToolchainConfig {
      name: "gcc".to_string(),
      platforms: platforms.iter().map(|s| s.to_string()).collect(),
      archs: archs.iter().map(|s| s.to_string()).collect(),
      compiler: LocatorConfig::new("file:///opt/gcc").with_path("bin/gcc"),
      linker: LocatorConfig::new("file:///opt/gcc").with_path("bin/gcc"),
      stdlib: None,
      stdpplib: None,
      supportlibs: vec![],
      startfiles: vec![LocatorConfig::new("file:///opt/gcc").with_path("lib/crt1.o")],
    }
  }

  #[test]
  fn filters_by_platform_and_arch() {
    let cfg = config(&["linux"], &["arm64"]);
    let base = Path::new("/");

    assert!(Toolchain::from_config(&cfg, Host::new(Platform::Unix, Arch::Arm64), base).is_ok());
    assert_eq!(
      Toolchain::from_config(&cfg, Host::new(Platform::Unix, Arch::Amd64), base),
      Err(SkipReason::UnsupportedArch(Arch::Amd64))
    );
    assert_eq!(
      Toolchain::from_config(&cfg, Host::new(Platform::Windows, Arch::Arm64), base),
      Err(SkipReason::UnsupportedPlatform(Platform::Windows))
    );
  }

  #[test]
  fn unknown_tokens_are_ignored() {
    let cfg = config(&["plan9", "unix"], &["riscv64", "amd64"]);
    assert!(Toolchain::from_config(&cfg, Host::new(Platform::Unix, Arch::Amd64), Path::new("/")).is_ok());
  }

  #[test]
  fn bad_component_skips_toolchain() {
    let mut cfg = config(&["unix"], &["amd64"]);
    cfg.linker = LocatorConfig::new("ftp://nope/ld");
    let err = Toolchain::from_config(&cfg, Host::new(Platform::Unix, Arch::Amd64), Path::new("/")).unwrap_err();
    assert!(matches!(err, SkipReason::InvalidArtifact { role: "linker", .. }));
  }

  #[test]
  fn artifacts_lists_components() {
    let cfg = config(&["unix"], &["amd64"]);
    let tc = Toolchain::from_config(&cfg, Host::new(Platform::Unix, Arch::Amd64), Path::new("/")).unwrap();
    assert_eq!(tc.artifacts().count(), 3);
  }
}
