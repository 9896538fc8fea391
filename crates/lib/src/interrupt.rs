//! Cooperative cancellation.
//!
//! An [`Interrupt`] is handed to every potentially blocking operation: HTTP
//! transfers, git clones, archive extraction, cache lock waits, and external
//! compiler/linker processes. Triggering it makes those operations return
//! [`Interrupted`] promptly. Blocking code polls [`Interrupt::as_atomic`] (the
//! same flag gix consumes), async code awaits [`Interrupt::triggered`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Notify;

/// Returned by operations aborted through an [`Interrupt`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation interrupted")]
pub struct Interrupted;

#[derive(Debug, Default)]
struct Inner {
  flag: AtomicBool,
  notify: Notify,
}

/// A cloneable cancellation signal. All clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
  inner: Arc<Inner>,
}

impl Interrupt {
  pub fn new() -> Self {
    Self::default()
  }

  /// Signal cancellation to every holder of this interrupt.
  pub fn trigger(&self) {
    self.inner.flag.store(true, Ordering::SeqCst);
    self.inner.notify.notify_waiters();
  }

  pub fn is_triggered(&self) -> bool {
    self.inner.flag.load(Ordering::SeqCst)
  }

  /// Fail fast if the interrupt has already fired.
  pub fn check(&self) -> Result<(), Interrupted> {
    if self.is_triggered() { Err(Interrupted) } else { Ok(()) }
  }

  /// The raw flag, for blocking APIs that poll an `AtomicBool`.
  pub fn as_atomic(&self) -> &AtomicBool {
    &self.inner.flag
  }

  /// Resolves once the interrupt fires. Returns immediately if it already has.
  pub async fn triggered(&self) {
    loop {
      let notified = self.inner.notify.notified();
      if self.is_triggered() {
        return;
      }
      notified.await;
      if self.is_triggered() {
        return;
      }
    }
  }
}
