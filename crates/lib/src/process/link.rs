//! Step 4: link the compiled objects into the target's output.

use std::path::{Path, PathBuf};

use tracing::info;

use super::command::Invocation;
use super::materialize::{ExternalPaths, ToolPaths};
use super::types::{PackResult, ProcessError};
use crate::interrupt::Interrupt;

/// Linker invocation for `output`.
///
/// Order matters to single-pass linkers: startup files, then objects, then
/// external libraries, then the toolchain's support and standard libraries.
pub fn link_invocation(
  tool: &ToolPaths,
  packs: &[PackResult],
  externals: &[ExternalPaths],
  output: &Path,
  library: bool,
) -> Invocation {
  let mut inv = Invocation::new(&tool.linker);
  inv.arg("-o").arg(output.as_os_str());
  if library {
    inv.arg("-shared");
  }
  if !tool.startfiles.is_empty() {
    inv.arg("-nostartfiles");
  }
  if tool.stdlib.is_some() {
    inv.arg("-nostdlib");
  }

  inv.args(tool.startfiles.iter().map(|p| p.as_os_str()));
  inv.args(packs.iter().flat_map(|p| p.objects.iter()).map(|o| o.as_os_str()));

  for ext in externals {
    for dir in &ext.library_dirs {
      inv.joined("-L", dir);
    }
  }
  inv.args(externals.iter().flat_map(|e| e.libraries.iter()).map(|l| l.as_os_str()));

  inv.args(tool.supportlibs.iter().map(|p| p.as_os_str()));
  inv.args(tool.stdlib.iter().map(|p| p.as_os_str()));
  inv.args(tool.stdpplib.iter().map(|p| p.as_os_str()));

  for rpath in externals.iter().flat_map(|e| e.rpaths.iter()) {
    inv.arg(format!("-Wl,-rpath,{}", rpath));
  }
  inv
}

pub async fn link(
  target: &str,
  invocation: &Invocation,
  output: &Path,
  interrupt: &Interrupt,
) -> Result<PathBuf, ProcessError> {
  let cwd = output.parent().unwrap_or(Path::new("."));
  info!(target, output = %output.display(), "linking");

  let result = invocation.run(cwd, interrupt).await?;
  if !result.status.success() {
    return Err(ProcessError::Link {
      target: target.to_string(),
      code: result.status.code(),
      stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
    });
  }
  Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tools(startfiles: bool, stdlib: bool) -> ToolPaths {
    ToolPaths {
      compiler: PathBuf::from("/b/bin/gcc/cc"),
      compiler_sha256: String::new(),
      linker: PathBuf::from("/b/bin/gcc/ld"),
      stdlib: stdlib.then(|| PathBuf::from("/b/lib/gcc/libc.a")),
      stdpplib: stdlib.then(|| PathBuf::from("/b/lib/gcc/libstdc++.a")),
      supportlibs: vec![PathBuf::from("/b/lib/gcc/libgcc.a")],
      startfiles: if startfiles { vec![PathBuf::from("/b/lib/gcc/crt1.o")] } else { vec![] },
    }
  }

  fn pack(objects: &[&str]) -> PackResult {
    PackResult {
      label: "app/app".to_string(),
      cache_dir: PathBuf::from("/c"),
      objects: objects.iter().map(PathBuf::from).collect(),
      cached: false,
    }
  }

  fn args(inv: &Invocation) -> Vec<String> {
    inv.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
  }

  #[test]
  fn full_argument_order() {
    let external = ExternalPaths {
      name: "z".to_string(),
      header_dirs: vec![],
      library_dirs: vec![PathBuf::from("/z/lib")],
      libraries: vec![PathBuf::from("/b/lib/z/libz.a")],
      rpaths: vec!["/opt/z".to_string()],
    };
    let inv = link_invocation(
      &tools(true, true),
      &[pack(&["/c/a.o", "/c/b.o"])],
      &[external],
      Path::new("/b/app"),
      false,
    );

    assert_eq!(inv.program, PathBuf::from("/b/bin/gcc/ld"));
    assert_eq!(
      args(&inv),
      [
        "-o",
        "/b/app",
        "-nostartfiles",
        "-nostdlib",
        "/b/lib/gcc/crt1.o",
        "/c/a.o",
        "/c/b.o",
        "-L/z/lib",
        "/b/lib/z/libz.a",
        "/b/lib/gcc/libgcc.a",
        "/b/lib/gcc/libc.a",
        "/b/lib/gcc/libstdc++.a",
        "-Wl,-rpath,/opt/z",
      ]
    );
  }

  #[test]
  fn library_without_custom_runtime() {
    let inv = link_invocation(&tools(false, false), &[pack(&["/c/a.o"])], &[], Path::new("/b/libapp.so"), true);
    assert_eq!(args(&inv), ["-o", "/b/libapp.so", "-shared", "/c/a.o", "/b/lib/gcc/libgcc.a"]);
  }
}
