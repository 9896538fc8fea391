//! Archive extraction shared by the file and http backends.
//!
//! The format is sniffed from the first bytes of the archive and the file name
//! is only consulted when the content is inconclusive.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info};

use crate::interrupt::{Interrupt, Interrupted};

#[derive(Debug, Error)]
pub enum UnpackError {
  #[error("io error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("corrupt archive '{path}': {message}")]
  Archive { path: PathBuf, message: String },

  #[error("unsupported archive format '{format}' for '{path}'")]
  UnsupportedFormat { path: PathBuf, format: &'static str },

  #[error("unknown archive format for '{0}'")]
  UnknownFormat(PathBuf),

  #[error("archive entry '{entry}' escapes the output directory")]
  UnsafePath { entry: String },

  #[error(transparent)]
  Interrupted(#[from] Interrupted),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Tar,
  TarGz,
  Zip,
}

const SNIFF_LEN: usize = 512;

/// Detect the archive format of `path`. `name` is the original file name,
/// which may differ from `path` for downloaded blobs.
pub fn detect(path: &Path, name: &str) -> Result<Format, UnpackError> {
  let mut file = File::open(path).map_err(io_err(path))?;
  let mut head = Vec::with_capacity(SNIFF_LEN);
  (&mut file)
    .take(SNIFF_LEN as u64)
    .read_to_end(&mut head)
    .map_err(io_err(path))?;

  if let Some(format) = sniff(&head, path)? {
    return Ok(format);
  }

  let lower = name.to_ascii_lowercase();
  if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
    Ok(Format::TarGz)
  } else if lower.ends_with(".tar") {
    Ok(Format::Tar)
  } else if lower.ends_with(".zip") {
    Ok(Format::Zip)
  } else {
    Err(UnpackError::UnknownFormat(path.to_path_buf()))
  }
}

fn sniff(head: &[u8], path: &Path) -> Result<Option<Format>, UnpackError> {
  let unsupported = |format| UnpackError::UnsupportedFormat {
    path: path.to_path_buf(),
    format,
  };

  if head.starts_with(&[0x1f, 0x8b]) {
    return Ok(Some(Format::TarGz));
  }
  if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
    return Ok(Some(Format::Zip));
  }
  if head.len() >= 262 && &head[257..262] == b"ustar" {
    return Ok(Some(Format::Tar));
  }
  if head.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
    return Err(unsupported("xz"));
  }
  if head.starts_with(b"BZh") {
    return Err(unsupported("bzip2"));
  }
  if head.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
    return Err(unsupported("zstd"));
  }
  if head.starts_with(&[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c]) {
    return Err(unsupported("7z"));
  }
  if head.starts_with(b"Rar!\x1a\x07") {
    return Err(unsupported("rar"));
  }
  Ok(None)
}

/// Extract `archive` into `out`, which must exist.
///
/// `name` is used as a format hint when sniffing is inconclusive. Entries
/// that would land outside `out` fail the whole extraction.
pub fn unpack(archive: &Path, name: &str, out: &Path, interrupt: &Interrupt) -> Result<(), UnpackError> {
  let format = detect(archive, name)?;
  debug!(archive = %archive.display(), ?format, "unpacking");

  match format {
    Format::TarGz => {
      let file = File::open(archive).map_err(io_err(archive))?;
      unpack_tar(Archive::new(GzDecoder::new(BufReader::new(file))), archive, out, interrupt)?;
    }
    Format::Tar => {
      let file = File::open(archive).map_err(io_err(archive))?;
      unpack_tar(Archive::new(BufReader::new(file)), archive, out, interrupt)?;
    }
    Format::Zip => unpack_zip(archive, out, interrupt)?,
  }

  info!(archive = %name, out = %out.display(), "unpacked");
  Ok(())
}

fn unpack_tar<R: Read>(
  mut tar: Archive<R>,
  archive: &Path,
  out: &Path,
  interrupt: &Interrupt,
) -> Result<(), UnpackError> {
  let corrupt = |e: io::Error| UnpackError::Archive {
    path: archive.to_path_buf(),
    message: e.to_string(),
  };

  tar.set_preserve_permissions(true);
  for entry in tar.entries().map_err(corrupt)? {
    interrupt.check()?;
    let mut entry = entry.map_err(corrupt)?;
    let entry_path = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();

    if entry.header().entry_type().is_dir() {
      continue;
    }

    // unpack_in creates parent directories and refuses paths outside `out`
    let inside = entry.unpack_in(out).map_err(corrupt)?;
    if !inside {
      return Err(UnpackError::UnsafePath { entry: entry_path });
    }
  }
  Ok(())
}

fn unpack_zip(archive: &Path, out: &Path, interrupt: &Interrupt) -> Result<(), UnpackError> {
  let corrupt = |e: zip::result::ZipError| UnpackError::Archive {
    path: archive.to_path_buf(),
    message: e.to_string(),
  };

  let file = File::open(archive).map_err(io_err(archive))?;
  let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(corrupt)?;

  for i in 0..zip.len() {
    interrupt.check()?;
    let mut entry = zip.by_index(i).map_err(corrupt)?;
    let Some(relative) = entry.enclosed_name() else {
      return Err(UnpackError::UnsafePath {
        entry: entry.name().to_string(),
      });
    };

    let dest = out.join(relative);
    if entry.is_dir() {
      continue;
    }
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let mut outfile = File::create(&dest).map_err(io_err(&dest))?;
    io::copy(&mut entry, &mut outfile).map_err(io_err(&dest))?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = entry.unix_mode() {
        fs::set_permissions(&dest, fs::Permissions::from_mode(mode)).map_err(io_err(&dest))?;
      }
    }
  }
  Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> UnpackError + '_ {
  move |source| UnpackError::Io {
    path: path.to_path_buf(),
    source,
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use flate2::Compression;
  use flate2::write::GzEncoder;
  use std::io::Write;
  use tempfile::TempDir;

  /// Build an in-memory tar with the given (path, contents) file entries.
  pub(crate) fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
      let mut header = tar::Header::new_gnu();
      header.set_size(data.len() as u64);
      header.set_mode(0o755);
      header.set_cksum();
      builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
  }

  pub(crate) fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes(files)).unwrap();
    encoder.finish().unwrap()
  }

  fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
    for (path, data) in files {
      writer.start_file(*path, options).unwrap();
      writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
  }

  fn write(temp: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = temp.path().join(name);
    fs::write(&path, bytes).unwrap();
    path
  }

  #[test]
  fn unpacks_tar_gz_regardless_of_name() {
    let temp = TempDir::new().unwrap();
    let blob = write(&temp, "blob", &tar_gz_bytes(&[("bin/cc", b"#!/bin/sh\n")]));
    let out = temp.path().join("out");
    fs::create_dir(&out).unwrap();

    unpack(&blob, "download", &out, &Interrupt::new()).unwrap();
    assert_eq!(fs::read_to_string(out.join("bin/cc")).unwrap(), "#!/bin/sh\n");
  }

  #[test]
  fn unpacks_plain_tar() {
    let temp = TempDir::new().unwrap();
    let blob = write(&temp, "x.bin", &tar_bytes(&[("include/a.h", b"int a;")]));
    let out = temp.path().join("out");
    fs::create_dir(&out).unwrap();

    assert_eq!(detect(&blob, "x.bin").unwrap(), Format::Tar);
    unpack(&blob, "x.bin", &out, &Interrupt::new()).unwrap();
    assert!(out.join("include/a.h").is_file());
  }

  #[test]
  fn unpacks_zip_with_modes() {
    let temp = TempDir::new().unwrap();
    let blob = write(&temp, "tc.zip", &zip_bytes(&[("bin/ld", b"ld")]));
    let out = temp.path().join("out");
    fs::create_dir(&out).unwrap();

    unpack(&blob, "tc.zip", &out, &Interrupt::new()).unwrap();
    let ld = out.join("bin/ld");
    assert_eq!(fs::read(&ld).unwrap(), b"ld");

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      assert_eq!(fs::metadata(&ld).unwrap().permissions().mode() & 0o777, 0o755);
    }
  }

  #[test]
  fn rejects_known_unsupported_formats() {
    let temp = TempDir::new().unwrap();
    let xz = write(&temp, "a.tar.xz", &[0xfd, b'7', b'z', b'X', b'Z', 0x00, 1, 2]);
    assert!(matches!(
      detect(&xz, "a.tar.xz"),
      Err(UnpackError::UnsupportedFormat { format: "xz", .. })
    ));

    let zst = write(&temp, "a.tar.zst", &[0x28, 0xb5, 0x2f, 0xfd, 0]);
    assert!(matches!(
      detect(&zst, "a.tar.zst"),
      Err(UnpackError::UnsupportedFormat { format: "zstd", .. })
    ));
  }

  #[test]
  fn unknown_content_is_an_error() {
    let temp = TempDir::new().unwrap();
    let blob = write(&temp, "readme", b"just text");
    assert!(matches!(detect(&blob, "readme"), Err(UnpackError::UnknownFormat(_))));
  }

  #[test]
  fn interrupt_stops_extraction() {
    let temp = TempDir::new().unwrap();
    let blob = write(&temp, "a.tgz", &tar_gz_bytes(&[("a", b"a"), ("b", b"b")]));
    let out = temp.path().join("out");
    fs::create_dir(&out).unwrap();

    let interrupt = Interrupt::new();
    interrupt.trigger();
    assert!(matches!(
      unpack(&blob, "a.tgz", &out, &interrupt),
      Err(UnpackError::Interrupted(_))
    ));
  }
}
