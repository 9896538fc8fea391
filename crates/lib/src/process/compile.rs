//! Step 3: compile every pack of the closure into object files.
//!
//! Objects are cached per pack under `<cache>/pack-<key>`, where the key
//! digests everything that can change the compiler's output: the pack
//! configuration, each source file, the header directories on the pack's own
//! search path and the compiler itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::command::Invocation;
use super::materialize::ToolPaths;
use super::types::{PackResult, PackUnit, ProcessError};
use crate::artifact::remove_path;
use crate::consts::{COMPLETE_MARKER, DIGEST_EXCLUSIONS};
use crate::interrupt::Interrupt;
use crate::loader::lock::CacheLock;
use crate::util::hash::{DigestError, hash_file};

const C_EXTENSIONS: &[&str] = &["c"];
const CXX_EXTENSIONS: &[&str] = &["cc", "cpp", "cxx"];

/// Shared inputs of every compilation in one build.
#[derive(Debug, Clone)]
pub struct CompileContext {
  pub cache_root: PathBuf,
  /// External header directories, searched after each pack's own.
  pub external_dirs: Vec<PathBuf>,
  pub interrupt: Interrupt,
}

/// Compile `units` with at most `parallelism` packs in flight. Results come
/// back in unit order. The first failure aborts the remaining packs.
pub async fn compile_packs(
  units: &[PackUnit],
  tools: &HashMap<String, ToolPaths>,
  ctx: CompileContext,
  parallelism: usize,
) -> Result<Vec<PackResult>, ProcessError> {
  let ctx = Arc::new(ctx);
  let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
  let mut join_set = JoinSet::new();

  for (index, unit) in units.iter().cloned().enumerate() {
    let Some(tool) = tools.get(&unit.toolchain).cloned() else {
      return Err(ProcessError::Join(format!(
        "no toolchain slot '{}' for pack '{}'",
        unit.toolchain,
        unit.label()
      )));
    };
    let ctx = Arc::clone(&ctx);
    let semaphore = Arc::clone(&semaphore);

    join_set.spawn(async move {
      let _permit = semaphore
        .acquire()
        .await
        .map_err(|e| ProcessError::Join(e.to_string()))?;
      let result = compile_pack(&unit, &tool, &ctx).await?;
      Ok::<_, ProcessError>((index, result))
    });
  }

  let mut results: Vec<Option<PackResult>> = vec![None; units.len()];
  while let Some(joined) = join_set.join_next().await {
    match joined.map_err(ProcessError::join)? {
      Ok((index, result)) => results[index] = Some(result),
      Err(e) => {
        join_set.abort_all();
        return Err(e);
      }
    }
  }

  Ok(results.into_iter().flatten().collect())
}

async fn compile_pack(unit: &PackUnit, tool: &ToolPaths, ctx: &CompileContext) -> Result<PackResult, ProcessError> {
  ctx.interrupt.check()?;
  let label = unit.label();
  let search = search_path(unit, &ctx.external_dirs);

  let (sources, key) = {
    let unit = unit.clone();
    let compiler = tool.compiler_sha256.clone();
    let search = search.clone();
    tokio::task::spawn_blocking(move || -> Result<_, ProcessError> {
      let sources = list_sources(&unit)?;
      let headers = header_digest(&search)?;
      let key = pack_key(&unit, &sources, &compiler, &headers)?;
      Ok((sources, key))
    })
    .await
    .map_err(ProcessError::join)??
  };

  let name = format!("pack-{}", key);
  let cache_dir = ctx.cache_root.join(&name);
  let objects: Vec<PathBuf> = sources.iter().map(|s| cache_dir.join(object_name(s))).collect();

  std::fs::create_dir_all(&ctx.cache_root).map_err(ProcessError::io(&ctx.cache_root))?;
  let _lock = CacheLock::acquire(&ctx.cache_root.join(format!("{}.lock", name)), &name, &ctx.interrupt).await?;

  if cache_dir.join(COMPLETE_MARKER).exists() && objects.iter().all(|o| o.exists()) {
    debug!(pack = %label, dir = %cache_dir.display(), "pack cache hit");
    return Ok(PackResult {
      label,
      cache_dir,
      objects,
      cached: true,
    });
  }

  remove_path(&cache_dir).map_err(ProcessError::io(&cache_dir))?;
  std::fs::create_dir_all(&cache_dir).map_err(ProcessError::io(&cache_dir))?;

  info!(pack = %label, sources = sources.len(), "compiling");
  for (source, object) in sources.iter().zip(&objects) {
    let invocation = compile_invocation(&tool.compiler, unit, source, object, &search);
    let output = invocation.run(&unit.dir, &ctx.interrupt).await?;
    if !output.status.success() {
      return Err(ProcessError::Compile {
        pack: label,
        file: source.clone(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
      });
    }
  }

  let marker = cache_dir.join(COMPLETE_MARKER);
  std::fs::write(&marker, b"").map_err(ProcessError::io(&marker))?;

  Ok(PackResult {
    label,
    cache_dir,
    objects,
    cached: false,
  })
}

/// `-I` directories of `unit`: its own search path, then the externals.
fn search_path(unit: &PackUnit, external_dirs: &[PathBuf]) -> Vec<PathBuf> {
  let mut dirs = unit.header_dirs.clone();
  for dir in external_dirs {
    if !dirs.contains(dir) {
      dirs.push(dir.clone());
    }
  }
  dirs
}

/// Source files of `unit`, relative to its directory. Without an explicit
/// list every C or C++ source below the pack directory is compiled.
pub fn list_sources(unit: &PackUnit) -> Result<Vec<PathBuf>, ProcessError> {
  if !unit.config.sources.is_empty() {
    let mut sources = Vec::with_capacity(unit.config.sources.len());
    for source in &unit.config.sources {
      let path = unit.dir.join(source);
      if !path.is_file() {
        return Err(ProcessError::Io {
          path,
          source: std::io::Error::new(std::io::ErrorKind::NotFound, "listed source not found"),
        });
      }
      sources.push(PathBuf::from(source));
    }
    return Ok(sources);
  }

  let mut sources = Vec::new();
  for entry in WalkDir::new(&unit.dir).sort_by_file_name() {
    let entry = entry.map_err(|e| ProcessError::Io {
      path: unit.dir.clone(),
      source: std::io::Error::other(e.to_string()),
    })?;
    if !entry.file_type().is_file() || language(entry.path()).is_none() {
      continue;
    }
    if let Ok(rel) = entry.path().strip_prefix(&unit.dir) {
      sources.push(rel.to_path_buf());
    }
  }
  Ok(sources)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
  C,
  Cxx,
}

fn language(path: &Path) -> Option<Language> {
  let ext = path.extension()?.to_str()?.to_ascii_lowercase();
  if C_EXTENSIONS.contains(&ext.as_str()) {
    Some(Language::C)
  } else if CXX_EXTENSIONS.contains(&ext.as_str()) {
    Some(Language::Cxx)
  } else {
    None
  }
}

/// `src/a.c` becomes `src_a.c.o`, so sources with equal stems never collide.
fn object_name(source: &Path) -> String {
  let flat = source.to_string_lossy().replace(['/', '\\'], "_");
  format!("{}.o", flat)
}

fn compile_invocation(
  compiler: &Path,
  unit: &PackUnit,
  source: &Path,
  object: &Path,
  header_dirs: &[PathBuf],
) -> Invocation {
  let mut inv = Invocation::new(compiler);
  inv.arg("-c").arg(source.as_os_str()).arg("-o").arg(object.as_os_str());

  if let Some(std) = &unit.config.std {
    match language(source) {
      Some(Language::Cxx) => inv.arg(format!("-std=c++{}", std)),
      _ => inv.arg(format!("-std=c{}", std)),
    };
  }
  for dir in header_dirs {
    inv.joined("-I", dir);
  }
  inv.args(&unit.config.compiler_flags);
  inv
}

/// Digest of every non-source file visible through `dirs`. Sources are
/// tracked per pack, so editing one never invalidates the other packs.
fn header_digest(dirs: &[PathBuf]) -> Result<String, ProcessError> {
  let mut hasher = Sha256::new();
  for dir in dirs {
    hasher.update(dir.to_string_lossy().as_bytes());
    hasher.update(b"\n");
    if !dir.exists() {
      continue;
    }

    let walker = WalkDir::new(dir)
      .follow_root_links(true)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| {
        e.depth() == 0
          || e
            .file_name()
            .to_str()
            .map(|name| !DIGEST_EXCLUSIONS.contains(&name))
            .unwrap_or(true)
      });
    for entry in walker {
      let entry = entry.map_err(|e| ProcessError::Io {
        path: dir.clone(),
        source: std::io::Error::other(e.to_string()),
      })?;
      if !entry.file_type().is_file() || language(entry.path()).is_some() {
        continue;
      }
      let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
      let digest = hash_file(entry.path()).map_err(|e| digest_error(entry.path(), e))?;
      hasher.update(rel.to_string_lossy().replace('\\', "/").as_bytes());
      hasher.update(b":");
      hasher.update(digest.0.as_bytes());
      hasher.update(b"\n");
    }
  }
  Ok(hex::encode(hasher.finalize()))
}

fn pack_key(unit: &PackUnit, sources: &[PathBuf], compiler: &str, headers: &str) -> Result<String, ProcessError> {
  let config = serde_json::to_string(&unit.config).map_err(|e| ProcessError::Io {
    path: unit.dir.clone(),
    source: std::io::Error::other(e),
  })?;

  let mut hasher = Sha256::new();
  for part in [unit.label().as_str(), config.as_str(), compiler, headers] {
    hasher.update(part.as_bytes());
    hasher.update(b"\n");
  }
  for source in sources {
    let path = unit.dir.join(source);
    let digest = hash_file(&path).map_err(|e| digest_error(&path, e))?;
    hasher.update(source.to_string_lossy().replace('\\', "/").as_bytes());
    hasher.update(b":");
    hasher.update(digest.0.as_bytes());
    hasher.update(b"\n");
  }
  Ok(hex::encode(hasher.finalize()))
}

fn digest_error(path: &Path, source: DigestError) -> ProcessError {
  ProcessError::Digest {
    path: path.to_path_buf(),
    source,
  }
}
