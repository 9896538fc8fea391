use std::fmt;
use std::str::FromStr;

use super::PlatformError;

/// CPU architecture variants a toolchain can declare support for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  Amd64,
  Arm64,
}

impl Arch {
  /// Detect the current CPU architecture at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::Amd64),
      "aarch64" => Some(Self::Arm64),
      _ => None,
    }
  }

  /// Parse a descriptor token. Rust-style names are accepted as aliases.
  pub fn from_token(token: &str) -> Option<Self> {
    match token.to_ascii_lowercase().as_str() {
      "amd64" | "x86_64" => Some(Self::Amd64),
      "arm64" | "aarch64" => Some(Self::Arm64),
      _ => None,
    }
  }

  /// Returns the canonical token for this architecture
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Amd64 => "amd64",
      Self::Arm64 => "arm64",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Arch {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_token(s).ok_or_else(|| PlatformError::UnknownArch(s.to_string()))
  }
}
