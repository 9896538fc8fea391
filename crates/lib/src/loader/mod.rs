//! Single-flight, content-addressed artifact loader.
//!
//! The [`Loader`] owns the in-memory job table for one build invocation.
//! Concurrent requests for the same identity share one fetch task and all
//! observe its result, success or failure. The table lock covers only
//! check-and-register, so fetches for unrelated identities run in parallel.
//!
//! # Cache layout
//!
//! ```text
//! <root>/
//! ├── file-<hex>/          symlink to a local directory, or extracted archive
//! ├── file-<hex>.lock      cross-process lock held while materializing
//! ├── git-<hex>/           checkout at the pinned revision
//! └── http-<hex>/          extracted download
//! ```
//!
//! A materialized real directory carries a `.bob-complete` marker. A directory
//! without it was left behind by an interrupted fetch and is refetched.

pub mod lock;

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::artifact::{self, FetchError, Identity, Kind};
use crate::consts::COMPLETE_MARKER;
use crate::interrupt::Interrupt;
use lock::{CacheLock, CacheLockError};

/// Error observed by every caller waiting on a job.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
  #[error("failed to load '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: Arc<FetchError>,
  },

  #[error("load of '{url}' was aborted before completing")]
  Aborted { url: String },

  #[error("'{url}' is still being fetched")]
  Busy { url: String },
}

impl LoadError {
  pub fn is_interrupted(&self) -> bool {
    matches!(self, Self::Fetch { source, .. } if matches!(**source, FetchError::Interrupted(_)))
  }
}

impl From<CacheLockError> for FetchError {
  fn from(err: CacheLockError) -> Self {
    match err {
      CacheLockError::Interrupted(i) => FetchError::Interrupted(i),
      CacheLockError::Open { path, source } | CacheLockError::Lock { path, source } => FetchError::Lock { path, source },
    }
  }
}

/// A backend able to materialize `url` into the empty directory `out`.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(
    &self,
    kind: Kind,
    url: &str,
    out: &Path,
    interrupt: &Interrupt,
  ) -> impl Future<Output = Result<(), FetchError>> + Send;
}

/// The production fetcher dispatching to the file, git and http backends.
#[derive(Debug, Clone, Default)]
pub struct Backends {
  client: reqwest::Client,
}

impl Backends {
  pub fn new(client: reqwest::Client) -> Self {
    Self { client }
  }
}

impl Fetcher for Backends {
  async fn fetch(&self, kind: Kind, url: &str, out: &Path, interrupt: &Interrupt) -> Result<(), FetchError> {
    match kind {
      Kind::File => artifact::file::fetch(url, out, interrupt).await,
      Kind::Git => artifact::git::fetch(url, out, interrupt).await,
      Kind::Http => artifact::http::fetch(&self.client, url, out, interrupt).await,
    }
  }
}

type JobResult = Option<Result<PathBuf, LoadError>>;

struct Job {
  clean: bool,
  rx: watch::Receiver<JobResult>,
}

/// Outcome of [`prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
  /// Complete content is already present.
  Cached,
  /// An empty output directory was created and must be filled.
  Fresh,
}

pub struct Loader<F: Fetcher = Backends> {
  root: PathBuf,
  interrupt: Interrupt,
  fetcher: Arc<F>,
  jobs: Mutex<HashMap<Identity, Job>>,
  fetch_count: Arc<AtomicUsize>,
}

impl Loader<Backends> {
  pub fn new(root: impl Into<PathBuf>, interrupt: Interrupt) -> Self {
    Self::with_fetcher(root, interrupt, Backends::default())
  }
}

impl<F: Fetcher> Loader<F> {
  pub fn with_fetcher(root: impl Into<PathBuf>, interrupt: Interrupt, fetcher: F) -> Self {
    Self {
      root: root.into(),
      interrupt,
      fetcher: Arc::new(fetcher),
      jobs: Mutex::new(HashMap::new()),
      fetch_count: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn interrupt(&self) -> &Interrupt {
    &self.interrupt
  }

  /// Output directory for an identity.
  pub fn output_path(&self, kind: Kind, url: &str) -> PathBuf {
    self.root.join(Identity::of(kind, url).dir_name(kind))
  }

  /// Materialize `url` and return its cache directory.
  ///
  /// Joins an existing job for the same identity if there is one, in which
  /// case `clean` is ignored. A job's result, including a failure, is kept for
  /// the lifetime of the loader unless [`Loader::evict`] drops it.
  pub async fn load(&self, kind: Kind, url: &str, clean: bool) -> Result<PathBuf, LoadError> {
    let identity = Identity::of(kind, url);

    let mut rx = {
      let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
      match jobs.get(&identity) {
        Some(job) => {
          if job.clean != clean {
            debug!(url, clean, registered = job.clean, "joining job registered with different clean flag");
          }
          job.rx.clone()
        }
        None => {
          let (tx, rx) = watch::channel(None);
          self.spawn_job(tx, kind, url.to_string(), clean);
          jobs.insert(identity, Job { clean, rx: rx.clone() });
          rx
        }
      }
    };

    let aborted = || LoadError::Aborted { url: url.to_string() };
    let done = rx.wait_for(Option::is_some).await.map_err(|_| aborted())?;
    match &*done {
      Some(result) => result.clone(),
      None => Err(aborted()),
    }
  }

  fn spawn_job(&self, tx: watch::Sender<JobResult>, kind: Kind, url: String, clean: bool) {
    let fetcher = Arc::clone(&self.fetcher);
    let root = self.root.clone();
    let interrupt = self.interrupt.clone();
    let fetch_count = Arc::clone(&self.fetch_count);

    tokio::spawn(async move {
      let result = run_job(&*fetcher, &root, kind, &url, clean, &interrupt, &fetch_count)
        .await
        .map_err(|e| LoadError::Fetch {
          url: url.clone(),
          source: Arc::new(e),
        });
      if let Err(e) = &result {
        debug!(url = %url, error = %e, "load failed");
      }
      tx.send_replace(Some(result));
    });
  }

  /// Forget a finished job so the next [`Loader::load`] fetches again.
  pub fn evict(&self, kind: Kind, url: &str) -> Result<(), LoadError> {
    let identity = Identity::of(kind, url);
    let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(job) = jobs.get(&identity)
      && job.rx.borrow().is_none()
    {
      return Err(LoadError::Busy { url: url.to_string() });
    }
    jobs.remove(&identity);
    Ok(())
  }

  /// Number of registered jobs that have not completed.
  pub fn pending(&self) -> usize {
    let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
    jobs.values().filter(|job| job.rx.borrow().is_none()).count()
  }

  /// Number of times a backend fetch was started.
  pub fn fetch_count(&self) -> usize {
    self.fetch_count.load(Ordering::SeqCst)
  }
}

async fn run_job<F: Fetcher>(
  fetcher: &F,
  root: &Path,
  kind: Kind,
  url: &str,
  clean: bool,
  interrupt: &Interrupt,
  fetch_count: &AtomicUsize,
) -> Result<PathBuf, FetchError> {
  let name = Identity::of(kind, url).dir_name(kind);
  let out = root.join(&name);
  let lock_path = root.join(format!("{}.lock", name));

  let _lock = CacheLock::acquire(&lock_path, &name, interrupt).await?;

  if prepare(&out, clean)? == Prepared::Cached {
    debug!(url, path = %out.display(), "cache hit");
    return Ok(out);
  }

  fetch_count.fetch_add(1, Ordering::SeqCst);
  info!(kind = %kind, url, "fetching");
  fetcher.fetch(kind, url, &out, interrupt).await?;
  mark_complete(&out)?;

  Ok(out)
}

/// Get `out` ready for a fetch.
///
/// With `clean` the existing output is removed first. Existing output counts
/// as cached when it is a live symlink or a directory carrying the completion
/// marker. Anything else left at `out` is removed before an empty directory is
/// created.
pub fn prepare(out: &Path, clean: bool) -> Result<Prepared, FetchError> {
  if clean {
    artifact::remove_path(out).map_err(FetchError::io(out))?;
  }

  match std::fs::symlink_metadata(out) {
    Ok(meta) if meta.file_type().is_symlink() => {
      if out.exists() {
        return Ok(Prepared::Cached);
      }
      warn!(path = %out.display(), "removing dangling cache link");
    }
    Ok(meta) if meta.is_dir() => {
      if out.join(COMPLETE_MARKER).exists() {
        return Ok(Prepared::Cached);
      }
      warn!(path = %out.display(), "removing incomplete cache entry");
    }
    Ok(_) => warn!(path = %out.display(), "removing unexpected file in cache"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(FetchError::io(out)(e)),
  }

  artifact::remove_path(out).map_err(FetchError::io(out))?;
  std::fs::create_dir_all(out).map_err(FetchError::io(out))?;
  Ok(Prepared::Fresh)
}

/// Mark a real output directory complete. Symlinked outputs need no marker.
fn mark_complete(out: &Path) -> Result<(), FetchError> {
  let meta = std::fs::symlink_metadata(out).map_err(FetchError::io(out))?;
  if meta.is_dir() {
    let marker = out.join(COMPLETE_MARKER);
    std::fs::write(&marker, b"").map_err(FetchError::io(&marker))?;
  }
  Ok(())
}
