//! HTTP(S) backend: download an archive and extract it into the output
//! directory.

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{FetchError, unpack};
use crate::consts::DOWNLOAD_BLOB;
use crate::interrupt::{Interrupt, Interrupted};

/// Last path segment of `url` without query string, used as the archive
/// format hint.
pub fn url_file_name(url: &str) -> &str {
  let path = url.split(['?', '#']).next().unwrap_or(url);
  path.rsplit('/').next().unwrap_or_default()
}

pub async fn fetch(client: &reqwest::Client, url: &str, out: &Path, interrupt: &Interrupt) -> Result<(), FetchError> {
  let http_err = |e: reqwest::Error| FetchError::Http {
    url: url.to_string(),
    message: e.to_string(),
  };

  info!(url, "downloading");
  let mut response = tokio::select! {
    res = client.get(url).send() => res.map_err(http_err)?,
    _ = interrupt.triggered() => return Err(Interrupted.into()),
  };

  let status = response.status();
  if !status.is_success() {
    return Err(FetchError::Status {
      url: url.to_string(),
      status: status.as_u16(),
    });
  }

  let blob = out.join(DOWNLOAD_BLOB);
  let mut file = fs::File::create(&blob).await.map_err(FetchError::io(&blob))?;
  let mut size = 0usize;
  loop {
    let chunk = tokio::select! {
      chunk = response.chunk() => chunk.map_err(http_err)?,
      _ = interrupt.triggered() => return Err(Interrupted.into()),
    };
    let Some(chunk) = chunk else { break };
    size += chunk.len();
    file.write_all(&chunk).await.map_err(FetchError::io(&blob))?;
  }
  file.flush().await.map_err(FetchError::io(&blob))?;
  drop(file);
  debug!(url, size, "download complete");

  let name = url_file_name(url).to_string();
  let (blob_path, out_dir, interrupt) = (blob.clone(), out.to_path_buf(), interrupt.clone());
  tokio::task::spawn_blocking(move || unpack::unpack(&blob_path, &name, &out_dir, &interrupt))
    .await
    .map_err(|e| FetchError::Join(e.to_string()))??;

  fs::remove_file(&blob).await.map_err(FetchError::io(&blob))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::artifact::unpack::tests::tar_gz_bytes;
  use tempfile::TempDir;

  #[test]
  fn file_name_from_url() {
    assert_eq!(url_file_name("https://x.org/dl/v1/tc-linux.tar.gz"), "tc-linux.tar.gz");
    assert_eq!(url_file_name("https://x.org/a.zip?token=abc"), "a.zip");
    assert_eq!(url_file_name("https://x.org/"), "");
  }

  #[tokio::test]
  async fn downloads_and_unpacks() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/tc.tar.gz")
      .with_status(200)
      .with_body(tar_gz_bytes(&[("bin/cc", b"cc"), ("lib/libc.a", b"libc")]))
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let url = format!("{}/tc.tar.gz", server.url());
    fetch(&reqwest::Client::new(), &url, temp.path(), &Interrupt::new())
      .await
      .unwrap();

    mock.assert_async().await;
    assert_eq!(std::fs::read(temp.path().join("bin/cc")).unwrap(), b"cc");
    assert_eq!(std::fs::read(temp.path().join("lib/libc.a")).unwrap(), b"libc");
    assert!(!temp.path().join(DOWNLOAD_BLOB).exists());
  }

  #[tokio::test]
  async fn error_status_fails() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/missing.zip").with_status(404).create_async().await;

    let temp = TempDir::new().unwrap();
    let url = format!("{}/missing.zip", server.url());
    let err = fetch(&reqwest::Client::new(), &url, temp.path(), &Interrupt::new())
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }));
  }

  #[tokio::test]
  async fn interrupted_download() {
    let server = mockito::Server::new_async().await;
    let interrupt = Interrupt::new();
    interrupt.trigger();

    let temp = TempDir::new().unwrap();
    let url = format!("{}/slow.tar.gz", server.url());
    let err = fetch(&reqwest::Client::new(), &url, temp.path(), &interrupt)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Interrupted(_)));
  }
}
