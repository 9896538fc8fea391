//! Running compiler and linker processes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use super::ProcessError;
use crate::interrupt::{Interrupt, Interrupted};

/// A toolchain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: PathBuf,
  pub args: Vec<OsString>,
}

impl Invocation {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
    }
  }

  pub fn arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(&mut self, args: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  /// Argument `flag` immediately followed by `path`, e.g. `-I/usr/include`.
  pub fn joined(&mut self, flag: &str, path: &Path) -> &mut Self {
    let mut arg = OsString::from(flag);
    arg.push(path.as_os_str());
    self.arg(arg)
  }

  /// Run to completion in `cwd`. The child is killed if `interrupt` fires.
  pub async fn run(&self, cwd: &Path, interrupt: &Interrupt) -> Result<Output, ProcessError> {
    interrupt.check()?;
    debug!(program = %self.program.display(), args = ?self.args, "spawning process");

    let mut command = Command::new(&self.program);
    command.args(&self.args).current_dir(cwd).kill_on_drop(true);

    let output = tokio::select! {
      output = command.output() => output.map_err(|source| ProcessError::Spawn {
        program: self.program.clone(),
        source,
      })?,
      _ = interrupt.triggered() => return Err(Interrupted.into()),
    };

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      if !stderr.is_empty() {
        debug!(stderr = %stderr, "process stderr");
      }
    }
    Ok(output)
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn captures_output() {
    let mut inv = Invocation::new("/bin/sh");
    inv.args(["-c", "echo out; echo err >&2; exit 3"]);
    let output = inv.run(Path::new("/"), &Interrupt::new()).await.unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
    assert_eq!(String::from_utf8_lossy(&output.stderr), "err\n");
  }

  #[test]
  fn joined_arguments() {
    let mut inv = Invocation::new("cc");
    inv.joined("-I", Path::new("/usr/include")).arg("-c");
    assert_eq!(inv.args, vec![OsString::from("-I/usr/include"), OsString::from("-c")]);
  }

  #[tokio::test]
  async fn missing_program_fails_to_spawn() {
    let inv = Invocation::new("/definitely/not/a/compiler");
    assert!(matches!(
      inv.run(Path::new("/"), &Interrupt::new()).await,
      Err(ProcessError::Spawn { .. })
    ));
  }

  #[tokio::test]
  async fn interrupt_kills_process() {
    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      trigger.trigger();
    });

    let mut inv = Invocation::new("/bin/sh");
    inv.args(["-c", "sleep 30"]);
    let started = std::time::Instant::now();
    let err = inv.run(Path::new("/"), &interrupt).await.unwrap_err();
    assert!(matches!(err, ProcessError::Interrupted(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
  }
}
