//! Per-identity cross-process cache locking.
//!
//! Every fetch holds an exclusive advisory lock on `<root>/<kind>-<hex>.lock`
//! for the duration of prepare + fetch, so independent processes sharing one
//! cache root never materialize the same identity concurrently. Waiting for a
//! held lock is cancellable through the build's [`Interrupt`].

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::interrupt::{Interrupt, Interrupted};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub identity: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheLockError {
  #[error("failed to open lock file '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to acquire lock '{path}': {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Interrupted(#[from] Interrupted),
}

/// Held exclusive lock. Released when dropped.
#[derive(Debug)]
pub struct CacheLock {
  file: File,
  lock_path: PathBuf,
}

impl CacheLock {
  /// Try once without blocking. `Ok(None)` means another holder exists.
  pub fn try_acquire(lock_path: &Path, identity: &str) -> Result<Option<Self>, CacheLockError> {
    if let Some(parent) = lock_path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| CacheLockError::Open {
        path: lock_path.to_path_buf(),
        source,
      })?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(lock_path)
      .map_err(|source| CacheLockError::Open {
        path: lock_path.to_path_buf(),
        source,
      })?;

    if let Err(err) = try_lock(&file) {
      if is_contention(&err) {
        return Ok(None);
      }
      return Err(CacheLockError::Lock {
        path: lock_path.to_path_buf(),
        source: err,
      });
    }

    // Metadata is diagnostic only; failing to write it doesn't void the lock
    if let Err(e) = write_metadata(&file, identity) {
      debug!(path = %lock_path.display(), error = %e, "failed to write lock metadata");
    }

    Ok(Some(Self {
      file,
      lock_path: lock_path.to_path_buf(),
    }))
  }

  /// Wait until the lock is free, polling until `interrupt` fires.
  pub async fn acquire(lock_path: &Path, identity: &str, interrupt: &Interrupt) -> Result<Self, CacheLockError> {
    let mut logged = false;
    loop {
      interrupt.check()?;
      if let Some(lock) = Self::try_acquire(lock_path, identity)? {
        return Ok(lock);
      }
      if !logged {
        debug!(path = %lock_path.display(), "cache entry locked by another process, waiting");
        logged = true;
      }
      tokio::select! {
        _ = tokio::time::sleep(POLL_INTERVAL) => {}
        _ = interrupt.triggered() => return Err(Interrupted.into()),
      }
    }
  }

  /// Read the metadata through the held handle. Opening a second handle
  /// would fail on Windows where locks are mandatory.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, identity: &str) -> io::Result<()> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    identity: identity.to_string(),
  };

  file.set_len(0)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(io::Error::other)?;
  writer.flush()
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(unix)]
fn is_contention(err: &io::Error) -> bool {
  err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}

#[cfg(windows)]
fn is_contention(err: &io::Error) -> bool {
  use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
  err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32)
}
