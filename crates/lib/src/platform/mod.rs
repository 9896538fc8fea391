pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;

use thiserror::Error;

pub use arch::Arch;
pub use os::Platform;

/// Errors raised when a platform or architecture cannot be determined.
#[derive(Debug, Error)]
pub enum PlatformError {
  #[error("unknown platform '{0}'; use one of unix, linux, windows")]
  UnknownPlatform(String),

  #[error("unknown architecture '{0}'; use one of amd64, arm64")]
  UnknownArch(String),

  #[error("host {0} is not supported")]
  UnsupportedHost(String),
}

/// The platform/architecture pair a module is resolved for (e.g. "unix-amd64")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Host {
  pub platform: Platform,
  pub arch: Arch,
}

impl Host {
  pub fn new(platform: Platform, arch: Arch) -> Self {
    Self { platform, arch }
  }

  /// Detect the current host at runtime
  pub fn current() -> Result<Self, PlatformError> {
    let platform = Platform::current().ok_or_else(|| PlatformError::UnsupportedHost(std::env::consts::OS.to_string()))?;
    let arch = Arch::current().ok_or_else(|| PlatformError::UnsupportedHost(std::env::consts::ARCH.to_string()))?;
    Ok(Self { platform, arch })
  }

  /// File name of a linked executable on this host.
  pub fn executable_name(&self, name: &str) -> String {
    match self.platform {
      Platform::Unix => name.to_string(),
      Platform::Windows => format!("{}.exe", name),
    }
  }

  /// File name of a linked shared library on this host.
  pub fn library_name(&self, name: &str) -> String {
    match self.platform {
      Platform::Unix => format!("lib{}.so", name),
      Platform::Windows => format!("{}.dll", name),
    }
  }
}

impl fmt::Display for Host {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.platform, self.arch)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn host_display_format() {
    let host = Host::new(Platform::Unix, Arch::Arm64);
    assert_eq!(host.to_string(), "unix-arm64");
  }

  #[test]
  fn output_names_follow_platform_conventions() {
    let unix = Host::new(Platform::Unix, Arch::Amd64);
    let windows = Host::new(Platform::Windows, Arch::Amd64);
    assert_eq!(unix.executable_name("app"), "app");
    assert_eq!(unix.library_name("z"), "libz.so");
    assert_eq!(windows.executable_name("app"), "app.exe");
    assert_eq!(windows.library_name("z"), "z.dll");
  }
}
