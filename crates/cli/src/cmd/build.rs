//! Implementation of the `bob build` command.
//!
//! Locates and loads the module descriptor, resolves it for the requested host
//! and runs the build pipeline. Ctrl-C interrupts fetches, extraction and
//! compiler processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::warn;

use bob_lib::config::{ModConfig, find_mod_file};
use bob_lib::consts::MOD_FILE_NAME;
use bob_lib::graph::load_mod;
use bob_lib::interrupt::Interrupt;
use bob_lib::loader::Loader;
use bob_lib::platform::paths::cache_dir;
use bob_lib::platform::{Arch, Host, Platform};
use bob_lib::process::{Processor, ProcessorOptions};

use crate::output::{format_duration, print_stat, print_success};

pub struct BuildArgs {
  pub target: String,
  pub clean: bool,
  pub module: Option<PathBuf>,
  pub platform: Option<Platform>,
  pub arch: Option<Arch>,
  pub output: Option<PathBuf>,
  pub cache: Option<PathBuf>,
  pub repin: bool,
  pub jobs: Option<usize>,
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let started = Instant::now();

  let mod_file = locate_mod_file(args.module.as_deref())?;
  let cfg = ModConfig::load(&mod_file)?;
  let root = mod_file.parent().unwrap_or(Path::new("."));
  let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());

  let mut host = Host::current()?;
  if let Some(platform) = args.platform {
    host.platform = platform;
  }
  if let Some(arch) = args.arch {
    host.arch = arch;
  }

  let module = load_mod(&cfg, host, &root)
    .with_context(|| format!("invalid module descriptor {}", mod_file.display()))?
    .module;

  let mut options = ProcessorOptions {
    clean: args.clean,
    output_dir: args.output,
    repin: args.repin,
    ..Default::default()
  };
  if let Some(jobs) = args.jobs {
    options.parallelism = jobs.max(1);
  }

  let cache = args.cache.unwrap_or_else(cache_dir);
  let interrupt = Interrupt::new();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(async {
      let watcher = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
          if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping build");
            interrupt.trigger();
          }
        })
      };

      let processor = Processor::new(Arc::new(Loader::new(cache, interrupt.clone())), options);
      let result = processor.build(&module, &args.target).await;
      watcher.abort();
      result
    })
    .with_context(|| format!("failed to build target '{}' of module '{}'", args.target, module.name))?;

  print_success(&format!("Built {}", outcome.output.display()));
  print_stat("Target", &outcome.target);
  print_stat("Host", &module.host.to_string());
  print_stat("Packs compiled", &outcome.compiled().to_string());
  print_stat("Packs cached", &(outcome.packs.len() - outcome.compiled()).to_string());
  print_stat("Artifacts", &format!("{} ({} fetched)", outcome.artifacts, outcome.fetched));
  print_stat("Duration", &format_duration(started.elapsed()));
  Ok(())
}

/// `--mod` may name the descriptor or its directory. Without it the
/// descriptor is searched upward from the working directory.
fn locate_mod_file(module: Option<&Path>) -> Result<PathBuf> {
  match module {
    Some(path) if path.is_dir() => Ok(path.join(MOD_FILE_NAME)),
    Some(path) => Ok(path.to_path_buf()),
    None => {
      let cwd = std::env::current_dir().context("Failed to read working directory")?;
      Ok(find_mod_file(&cwd)?)
    }
  }
}
