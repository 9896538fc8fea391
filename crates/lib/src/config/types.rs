use serde::{Deserialize, Serialize};

/// Where an artifact comes from: `<protocol>://<location>[@<revision>]`, plus
/// an optional path naming a file or directory inside the fetched content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorConfig {
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
}

impl LocatorConfig {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      path: None,
    }
  }

  pub fn with_path(mut self, path: impl Into<String>) -> Self {
    self.path = Some(path.into());
    self
  }
}

/// Contents of `bob.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModConfig {
  pub module: String,
  #[serde(default)]
  pub toolchains: Vec<ToolchainConfig>,
  #[serde(default)]
  pub targets: Vec<TargetConfig>,
  #[serde(default)]
  pub includes: Vec<IncludeConfig>,
  #[serde(default)]
  pub externals: Vec<ExternalConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
  pub name: String,
  #[serde(default)]
  pub platforms: Vec<String>,
  #[serde(default)]
  pub archs: Vec<String>,
  pub compiler: LocatorConfig,
  pub linker: LocatorConfig,
  #[serde(default)]
  pub stdlib: Option<LocatorConfig>,
  #[serde(default)]
  pub stdpplib: Option<LocatorConfig>,
  #[serde(default)]
  pub supportlibs: Vec<LocatorConfig>,
  #[serde(default)]
  pub startfiles: Vec<LocatorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
  /// Pack directory this target builds; also the target's name.
  pub pack: String,
  #[serde(default)]
  pub library: bool,
  /// Toolchain names in order of preference.
  #[serde(default)]
  pub toolchains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeConfig {
  #[serde(rename = "mod")]
  pub module: String,
  pub source: LocatorConfig,
  #[serde(default)]
  pub overlay: Option<LocatorConfig>,
  #[serde(default)]
  pub remote_toolchain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalConfig {
  pub name: String,
  #[serde(default)]
  pub rpaths: Vec<String>,
  #[serde(default)]
  pub headers: Vec<LocatorConfig>,
  #[serde(default)]
  pub libraries: Vec<LocatorConfig>,
}

/// Contents of `pack.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackConfig {
  /// Language standard revision, e.g. "17" becomes `-std=c17` or `-std=c++17`.
  #[serde(default)]
  pub std: Option<String>,
  #[serde(default)]
  pub compiler_flags: Vec<String>,
  /// Header directories, relative to the pack directory.
  #[serde(default)]
  pub includes: Vec<String>,
  /// Source files, relative to the pack directory. Empty means "all sources".
  #[serde(default)]
  pub sources: Vec<String>,
  /// Other packs of the same module this pack depends on.
  #[serde(default)]
  pub deps: Vec<String>,
}
