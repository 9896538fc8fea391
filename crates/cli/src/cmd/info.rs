use anyhow::Result;
use serde::Serialize;

use bob_lib::platform::Host;
use bob_lib::platform::paths::cache_dir;

use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Serialize)]
struct Info {
  version: &'static str,
  platform: &'static str,
  arch: &'static str,
  cache: String,
}

pub fn cmd_info(format: OutputFormat) -> Result<()> {
  let host = Host::current()?;
  let info = Info {
    version: env!("CARGO_PKG_VERSION"),
    platform: host.platform.as_str(),
    arch: host.arch.as_str(),
    cache: cache_dir().display().to_string(),
  };

  if format.is_json() {
    return print_json(&info);
  }

  println!("bob {}", info.version);
  print_stat("Platform", info.platform);
  print_stat("Arch", info.arch);
  print_stat("Cache", &info.cache);
  Ok(())
}
