//! Target builds.
//!
//! [`Processor::build`] turns a target of a resolved [`Mod`] into a linked
//! executable or shared library in four steps:
//!
//! 1. [`resolve`]: collect the target's closure of packs, includes, externals
//!    and toolchains.
//! 2. [`materialize`]: fetch every artifact through the shared [`Loader`] and
//!    verify it against the module's `bob.sum`.
//! 3. [`compile_packs`]: compile each pack, reusing cached objects.
//! 4. [`link`]: link everything with the target's toolchain.

mod command;
mod compile;
mod link;
mod materialize;
mod resolve;
#[cfg(test)]
mod testutil;
mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

pub use command::Invocation;
pub use compile::{CompileContext, compile_packs, list_sources};
pub use link::{link, link_invocation};
pub use materialize::{ExternalPaths, Materialized, ToolPaths, expose_external, expose_toolchain, materialize, verify};
pub use resolve::{Closure, resolve};
pub use types::{BuildOutcome, PackResult, PackUnit, ProcessError, ProcessorOptions, ToolchainSlot};

use crate::consts::{DEFAULT_OUTPUT_DIR, SUM_FILE_NAME};
use crate::graph::Mod;
use crate::loader::{Backends, Fetcher, Loader};
use crate::sum::Sum;

/// Builds targets, sharing one [`Loader`] across every build it runs.
pub struct Processor<F: Fetcher = Backends> {
  loader: Arc<Loader<F>>,
  options: ProcessorOptions,
}

impl<F: Fetcher> Processor<F> {
  pub fn new(loader: Arc<Loader<F>>, options: ProcessorOptions) -> Self {
    Self { loader, options }
  }

  pub fn loader(&self) -> &Arc<Loader<F>> {
    &self.loader
  }

  pub fn options(&self) -> &ProcessorOptions {
    &self.options
  }

  /// Where outputs of `module` land.
  pub fn output_dir(&self, module: &Mod) -> PathBuf {
    self
      .options
      .output_dir
      .clone()
      .unwrap_or_else(|| module.root.join(DEFAULT_OUTPUT_DIR))
  }

  /// Build `target` of `module`.
  pub async fn build(&self, module: &Mod, target: &str) -> Result<BuildOutcome, ProcessError> {
    let interrupt = self.loader.interrupt().clone();
    let fetched_before = self.loader.fetch_count();
    info!(module = %module.name, target, host = %module.host, "building");

    let closure = resolve(self.loader.as_ref(), module, target, self.options.clean).await?;
    let artifacts = closure.artifacts();
    let artifact_count = artifacts.len();

    let materialized = materialize(&self.loader, artifacts, self.options.clean, self.options.parallelism).await?;
    let mut sum = Sum::load(&module.root.join(SUM_FILE_NAME))?;
    verify(&materialized, &mut sum, self.options.repin)?;
    sum.save()?;
    interrupt.check()?;

    let build_dir = self.output_dir(module);
    std::fs::create_dir_all(&build_dir).map_err(ProcessError::io(&build_dir))?;

    let mut tools = HashMap::new();
    for slot in &closure.toolchains {
      tools.insert(
        slot.slot.clone(),
        expose_toolchain(slot, self.loader.as_ref(), &materialized, &build_dir)?,
      );
    }
    let externals = closure
      .externals
      .iter()
      .map(|ext| expose_external(ext, &materialized, self.loader.root(), &build_dir))
      .collect::<Result<Vec<_>, _>>()?;

    let external_dirs = externals.iter().flat_map(|e| e.header_dirs.iter().cloned()).collect();
    let ctx = CompileContext {
      cache_root: self.loader.root().to_path_buf(),
      external_dirs,
      interrupt: interrupt.clone(),
    };
    let packs = compile_packs(&closure.packs, &tools, ctx, self.options.parallelism).await?;

    let library = closure.target.library;
    let output = build_dir.join(output_name(module, &closure.target.name, library));
    let tool = tools.get(&closure.target_slot().slot).ok_or_else(|| {
      ProcessError::Join(format!("no toolchain slot for target '{}'", closure.target.name))
    })?;
    let invocation = link_invocation(tool, &packs, &externals, &output, library);
    remove_stale(&output)?;
    let output = link(&closure.target.name, &invocation, &output, &interrupt).await?;

    let outcome = BuildOutcome {
      target: closure.target.name.clone(),
      library,
      output,
      packs,
      artifacts: artifact_count,
      fetched: self.loader.fetch_count() - fetched_before,
    };
    info!(
      target = %outcome.target,
      output = %outcome.output.display(),
      compiled = outcome.compiled(),
      cached = outcome.packs.len() - outcome.compiled(),
      "build finished"
    );
    Ok(outcome)
  }
}

fn output_name(module: &Mod, target: &str, library: bool) -> String {
  if library {
    module.host.library_name(target)
  } else {
    module.host.executable_name(target)
  }
}

/// A failed link must not leave the previous output looking current.
fn remove_stale(output: &Path) -> Result<(), ProcessError> {
  match std::fs::remove_file(output) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(ProcessError::io(output)(e)),
  }
}
