//! Step 2: fetch every artifact of the closure, verify it against the sum
//! ledger, and expose toolchain and library files under the build directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::types::{ProcessError, ToolchainSlot};
use crate::artifact::{Artifact, remove_path};
use crate::consts::DIGEST_EXCLUSIONS;
use crate::graph::External;
use crate::loader::{Fetcher, Loader};
use crate::sum::{Sum, Verified};
use crate::util::hash::digest_path;

#[derive(Debug, Clone)]
pub struct MaterializedArtifact {
  pub owner: String,
  pub artifact: Artifact,
  pub path: PathBuf,
  pub sha256: String,
}

/// Materialized artifacts keyed by ledger key.
#[derive(Debug, Default)]
pub struct Materialized {
  entries: HashMap<String, MaterializedArtifact>,
}

impl Materialized {
  pub fn get(&self, artifact: &Artifact) -> Option<&MaterializedArtifact> {
    self.entries.get(&artifact.ledger_key())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn sorted(&self) -> Vec<&MaterializedArtifact> {
    let mut entries: Vec<_> = self.entries.values().collect();
    entries.sort_by(|a, b| a.artifact.ledger_key().cmp(&b.artifact.ledger_key()));
    entries
  }
}

/// Load all `artifacts` with at most `parallelism` fetches in flight. The
/// first failure aborts the rest.
pub async fn materialize<F: Fetcher>(
  loader: &Arc<Loader<F>>,
  artifacts: Vec<(String, Artifact)>,
  clean: bool,
  parallelism: usize,
) -> Result<Materialized, ProcessError> {
  let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
  let mut join_set = JoinSet::new();

  for (owner, artifact) in artifacts {
    let loader = Arc::clone(loader);
    let semaphore = Arc::clone(&semaphore);

    join_set.spawn(async move {
      let _permit = semaphore
        .acquire()
        .await
        .map_err(|e| ProcessError::Join(e.to_string()))?;

      let path = artifact
        .load(&loader, clean)
        .await
        .map_err(|source| ProcessError::Artifact {
          owner: owner.clone(),
          source,
        })?;

      let digest_target = path.clone();
      let sha256 = tokio::task::spawn_blocking(move || digest_path(&digest_target, DIGEST_EXCLUSIONS))
        .await
        .map_err(ProcessError::join)?
        .map_err(|source| ProcessError::Digest {
          path: path.clone(),
          source,
        })?;

      debug!(url = %artifact.url(), path = %path.display(), "materialized");
      Ok::<_, ProcessError>(MaterializedArtifact {
        owner,
        artifact,
        path,
        sha256: sha256.0,
      })
    });
  }

  let mut materialized = Materialized::default();
  while let Some(joined) = join_set.join_next().await {
    match joined.map_err(ProcessError::join)? {
      Ok(entry) => {
        materialized.entries.insert(entry.artifact.ledger_key(), entry);
      }
      Err(e) => {
        join_set.abort_all();
        return Err(e);
      }
    }
  }

  info!(artifacts = materialized.len(), "materialized artifacts");
  Ok(materialized)
}

/// Check every digest against the ledger, recording new ones.
pub fn verify(materialized: &Materialized, sum: &mut Sum, repin: bool) -> Result<(), ProcessError> {
  for entry in materialized.sorted() {
    let key = entry.artifact.ledger_key();
    match sum.verify_or_record(&key, entry.artifact.url(), &entry.sha256, repin)? {
      Verified::Matched => debug!(key = %key, "checksum verified"),
      Verified::Recorded | Verified::Repinned { .. } => {}
    }
  }
  Ok(())
}

/// Paths of a toolchain's components, ready for argument lists.
#[derive(Debug, Clone)]
pub struct ToolPaths {
  pub compiler: PathBuf,
  pub compiler_sha256: String,
  pub linker: PathBuf,
  pub stdlib: Option<PathBuf>,
  pub stdpplib: Option<PathBuf>,
  pub supportlibs: Vec<PathBuf>,
  pub startfiles: Vec<PathBuf>,
}

/// Search paths and libraries an external contributes.
#[derive(Debug, Clone, Default)]
pub struct ExternalPaths {
  pub name: String,
  pub header_dirs: Vec<PathBuf>,
  pub library_dirs: Vec<PathBuf>,
  pub libraries: Vec<PathBuf>,
  pub rpaths: Vec<String>,
}

/// Link a toolchain's files into per-role directories under
/// `<build>/bin/<slot>` and `<build>/lib/<slot>`, so components sharing a file
/// name never replace each other.
pub fn expose_toolchain<F: Fetcher>(
  slot: &ToolchainSlot,
  loader: &Loader<F>,
  materialized: &Materialized,
  build_dir: &Path,
) -> Result<ToolPaths, ProcessError> {
  let tc = &slot.toolchain;
  let owner = format!("toolchain '{}'", tc.name);
  let bin = build_dir.join("bin").join(&slot.slot);
  let lib = build_dir.join("lib").join(&slot.slot);
  let mut links = Links::new(&owner, loader.root());
  let mut link = |artifact: &Artifact, root: PathBuf| -> Result<PathBuf, ProcessError> {
    links.claim(artifact, &root)?;
    artifact.symlink(&root, loader).map_err(|source| ProcessError::Artifact {
      owner: owner.clone(),
      source,
    })
  };

  let compiler_sha256 = materialized
    .get(&tc.compiler)
    .map(|m| m.sha256.clone())
    .unwrap_or_default();

  let compiler = link(&tc.compiler, bin.join("compiler"))?;
  let linker = link(&tc.linker, bin.join("linker"))?;
  let stdlib = tc.stdlib.as_ref().map(|a| link(a, lib.join("stdlib"))).transpose()?;
  let stdpplib = tc.stdpplib.as_ref().map(|a| link(a, lib.join("stdpplib"))).transpose()?;
  let mut supportlibs = Vec::with_capacity(tc.supportlibs.len());
  for artifact in &tc.supportlibs {
    supportlibs.push(link(artifact, lib.join("supportlibs"))?);
  }
  let mut startfiles = Vec::with_capacity(tc.startfiles.len());
  for artifact in &tc.startfiles {
    startfiles.push(link(artifact, lib.join("startfiles"))?);
  }

  Ok(ToolPaths {
    compiler,
    compiler_sha256,
    linker,
    stdlib,
    stdpplib,
    supportlibs,
    startfiles,
  })
}

/// Link paths handed out during one expose call. A path may be claimed again
/// only for the same content.
struct Links<'a> {
  owner: &'a str,
  cache_root: &'a Path,
  claimed: HashMap<PathBuf, PathBuf>,
}

impl<'a> Links<'a> {
  fn new(owner: &'a str, cache_root: &'a Path) -> Self {
    Self {
      owner,
      cache_root,
      claimed: HashMap::new(),
    }
  }

  fn claim(&mut self, artifact: &Artifact, root: &Path) -> Result<(), ProcessError> {
    let content = artifact.content_path(self.cache_root);
    self.claim_path(&content, root)
  }

  fn claim_path(&mut self, content: &Path, root: &Path) -> Result<(), ProcessError> {
    let Some(name) = content.file_name() else {
      return Ok(());
    };
    let link = root.join(name);
    match self.claimed.get(&link) {
      Some(previous) if previous != content => Err(ProcessError::LinkCollision {
        owner: self.owner.to_string(),
        link,
        first: previous.clone(),
        second: content.to_path_buf(),
      }),
      Some(_) => Ok(()),
      None => {
        self.claimed.insert(link, content.to_path_buf());
        Ok(())
      }
    }
  }
}

/// Resolve an external's header and library artifacts. Library files are
/// linked into `<build>/lib/<name>`, library directories become search paths.
pub fn expose_external(
  external: &External,
  materialized: &Materialized,
  loader_root: &Path,
  build_dir: &Path,
) -> Result<ExternalPaths, ProcessError> {
  let mut paths = ExternalPaths {
    name: external.name.clone(),
    rpaths: external.rpaths.clone(),
    ..Default::default()
  };
  let content = |artifact: &Artifact| {
    materialized
      .get(artifact)
      .map(|m| m.path.clone())
      .unwrap_or_else(|| artifact.content_path(loader_root))
  };

  for header in &external.headers {
    let path = content(header);
    if path.is_dir() {
      paths.header_dirs.push(path);
    } else if let Some(parent) = path.parent() {
      paths.header_dirs.push(parent.to_path_buf());
    }
  }

  let owner = format!("external '{}'", external.name);
  let mut links = Links::new(&owner, loader_root);
  let lib_root = build_dir.join("lib").join(&external.name);
  for library in &external.libraries {
    let path = content(library);
    if path.is_dir() {
      paths.library_dirs.push(path);
      continue;
    }
    links.claim_path(&path, &lib_root)?;
    let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    let link = lib_root.join(name);
    std::fs::create_dir_all(&lib_root).map_err(ProcessError::io(&lib_root))?;
    remove_path(&link).map_err(ProcessError::io(&link))?;
    symlink(&path, &link).map_err(ProcessError::io(&link))?;
    paths.libraries.push(link);
  }

  Ok(paths)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}
