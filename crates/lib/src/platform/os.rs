use std::fmt;
use std::str::FromStr;

use super::PlatformError;

/// Operating system families a toolchain can declare support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
  Unix,
  Windows,
}

impl Platform {
  /// Detect the current platform at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::FAMILY {
      "unix" => Some(Self::Unix),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Parse a descriptor token. `linux` is accepted as an alias for `unix`.
  pub fn from_token(token: &str) -> Option<Self> {
    match token.to_ascii_lowercase().as_str() {
      "unix" | "linux" => Some(Self::Unix),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the canonical token for this platform
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Unix => "unix",
      Self::Windows => "windows",
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Platform {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_token(s).ok_or_else(|| PlatformError::UnknownPlatform(s.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn current_returns_supported_platform() {
    assert!(Platform::current().is_some(), "Current platform should be supported");
  }

  #[test]
  fn linux_is_an_alias_for_unix() {
    assert_eq!(Platform::from_token("linux"), Some(Platform::Unix));
    assert_eq!(Platform::from_token("UNIX"), Some(Platform::Unix));
    assert_eq!(Platform::from_token("windows"), Some(Platform::Windows));
  }

  #[test]
  fn unknown_token_is_rejected() {
    assert_eq!(Platform::from_token("plan9"), None);
    assert!("plan9".parse::<Platform>().is_err());
  }
}
