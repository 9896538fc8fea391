//! Git backend.
//!
//! Locators take the form `git://<host>/<path>@<revision>` and are always
//! fetched over https. A 40-character lowercase hex revision is a commit hash,
//! anything else names a tag. The revision is checked out with a detached
//! HEAD so the cache holds exactly that tree.

use std::path::{Path, PathBuf};

use gix::remote::Direction;
use tracing::{debug, info};

use super::FetchError;
use crate::interrupt::Interrupt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
  Commit(String),
  Tag(String),
}

impl Revision {
  pub fn parse(rev: &str) -> Self {
    let is_commit = rev.len() == 40 && rev.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if is_commit {
      Self::Commit(rev.to_string())
    } else {
      Self::Tag(rev.to_string())
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Commit(s) | Self::Tag(s) => s,
    }
  }
}

/// Split a `git://` locator into its https clone url and revision.
pub fn parse_locator(url: &str) -> Result<(String, Revision), FetchError> {
  let invalid = |reason: String| FetchError::InvalidGitLocator {
    url: url.to_string(),
    reason,
  };

  let rest = url
    .strip_prefix("git://")
    .ok_or_else(|| invalid("expected 'git://<host>/<path>@<revision>'".to_string()))?;

  let ats = rest.matches('@').count();
  if ats != 1 {
    return Err(invalid(format!("expected exactly one '@', found {}", ats)));
  }
  let Some((location, rev)) = rest.split_once('@') else {
    return Err(invalid("missing revision".to_string()));
  };
  if location.is_empty() || rev.is_empty() {
    return Err(invalid("empty location or revision".to_string()));
  }

  Ok((format!("https://{}", location), Revision::parse(rev)))
}

pub async fn fetch(url: &str, out: &Path, interrupt: &Interrupt) -> Result<(), FetchError> {
  let (remote, rev) = parse_locator(url)?;
  interrupt.check()?;

  let url = url.to_string();
  let out = out.to_path_buf();
  let interrupt = interrupt.clone();
  tokio::task::spawn_blocking(move || clone_at(&url, &remote, &rev, &out, &interrupt))
    .await
    .map_err(|e| FetchError::Join(e.to_string()))?
}

fn git_error<'a, E: std::fmt::Display>(url: &'a str, stage: &'static str) -> impl FnOnce(E) -> FetchError + 'a {
  move |e| FetchError::Git {
    url: url.to_string(),
    stage,
    message: e.to_string(),
  }
}

/// Clone `remote` into `out` and check out `rev` on a detached HEAD.
fn clone_at(url: &str, remote: &str, rev: &Revision, out: &Path, interrupt: &Interrupt) -> Result<(), FetchError> {
  info!(url, rev = rev.as_str(), out = %out.display(), "cloning repository");

  let mut prepared = gix::prepare_clone(remote, out)
    .map_err(git_error(url, "clone"))?
    .configure_remote(|r| Ok(r.with_refspecs(Some("+refs/tags/*:refs/tags/*"), Direction::Fetch)?));

  let (repo, _outcome) = prepared
    .fetch_only(gix::progress::Discard, interrupt.as_atomic())
    .map_err(|e| {
      if interrupt.is_triggered() {
        FetchError::Interrupted(crate::interrupt::Interrupted)
      } else {
        git_error(url, "fetch")(e)
      }
    })?;
  interrupt.check()?;

  let commit_id = resolve(&repo, url, rev)?;
  debug!(url, commit = %commit_id, "resolved revision");
  checkout(&repo, url, commit_id, interrupt)?;
  Ok(())
}

fn resolve(repo: &gix::Repository, url: &str, rev: &Revision) -> Result<gix::ObjectId, FetchError> {
  let not_found = || FetchError::RevisionNotFound {
    url: url.to_string(),
    rev: rev.as_str().to_string(),
  };

  match rev {
    Revision::Commit(hash) => {
      let id = gix::ObjectId::from_hex(hash.as_bytes()).map_err(|_| not_found())?;
      repo.find_commit(id).map_err(|_| not_found())?;
      Ok(id)
    }
    Revision::Tag(tag) => {
      let spec = format!("refs/tags/{}", tag);
      let id = repo.rev_parse_single(spec.as_str()).map_err(|_| not_found())?;
      // Annotated tags peel to the commit they point at
      let commit = id
        .object()
        .map_err(git_error(url, "resolve"))?
        .peel_to_kind(gix::object::Kind::Commit)
        .map_err(|_| not_found())?;
      Ok(commit.id)
    }
  }
}

fn checkout(repo: &gix::Repository, url: &str, commit_id: gix::ObjectId, interrupt: &Interrupt) -> Result<(), FetchError> {
  use gix::refs::transaction::{Change, LogChange, PreviousValue, RefEdit};

  let workdir: PathBuf = repo
    .workdir()
    .ok_or_else(|| FetchError::Git {
      url: url.to_string(),
      stage: "checkout",
      message: "repository has no worktree".to_string(),
    })?
    .to_path_buf();

  let tree_id = repo
    .find_commit(commit_id)
    .map_err(git_error(url, "checkout"))?
    .tree_id()
    .map_err(git_error(url, "checkout"))?
    .detach();

  let mut index = repo.index_from_tree(&tree_id).map_err(git_error(url, "index"))?;
  let mut opts = repo
    .checkout_options(gix::worktree::stack::state::attributes::Source::IdMapping)
    .map_err(git_error(url, "checkout"))?;
  opts.destination_is_initially_empty = true;

  let objects = repo.objects.clone().into_arc().map_err(git_error(url, "checkout"))?;
  gix::worktree::state::checkout(
    &mut index,
    workdir,
    objects,
    &gix::progress::Discard,
    &gix::progress::Discard,
    interrupt.as_atomic(),
    opts,
  )
  .map_err(git_error(url, "checkout"))?;
  interrupt.check()?;
  index.write(Default::default()).map_err(git_error(url, "index"))?;

  repo
    .edit_reference(RefEdit {
      change: Change::Update {
        log: LogChange {
          message: format!("bob: checkout {}", commit_id).into(),
          ..Default::default()
        },
        expected: PreviousValue::Any,
        new: gix::refs::Target::Object(commit_id),
      },
      name: "HEAD".try_into().map_err(git_error(url, "checkout"))?,
      deref: false,
    })
    .map_err(git_error(url, "checkout"))?;

  Ok(())
}
