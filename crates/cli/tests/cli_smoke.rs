//! CLI smoke tests for bob.
//!
//! These tests run the binary against throwaway modules with a fake
//! shell-script toolchain and an isolated cache.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

fn bob_cmd() -> Command {
  cargo_bin_cmd!("bob")
}

/// Writes "fake" to the `-o` path.
const FAKE_CC: &str = r#"#!/bin/sh
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  prev="$arg"
done
if [ -n "$out" ]; then echo "fake" > "$out"; fi
exit 0
"#;

/// A module with one executable target `hello` and its cache, both under a
/// temporary directory.
struct TestModule {
  temp: TempDir,
}

impl TestModule {
  fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let tc = temp.path().join("tc/bin");
    fs::create_dir_all(&tc).unwrap();
    fs::write(tc.join("cc"), FAKE_CC).unwrap();
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(tc.join("cc"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    let module = temp.path().join("mod");
    fs::create_dir_all(module.join("hello")).unwrap();
    fs::write(module.join("hello/main.c"), "int main(void) { return 0; }\n").unwrap();
    fs::write(module.join("hello/pack.toml"), "std = \"11\"\n").unwrap();

    let tc_url = format!("file://{}", temp.path().join("tc").display());
    let descriptor = format!(
      r#"module = "demo"

[[toolchains]]
name = "gcc"
platforms = ["unix", "windows"]
archs = ["amd64", "arm64"]
compiler = {{ url = "{tc_url}", path = "bin/cc" }}
linker = {{ url = "{tc_url}", path = "bin/cc" }}

[[targets]]
pack = "hello"
toolchains = ["gcc"]
"#
    );
    fs::write(module.join("bob.toml"), descriptor).unwrap();
    Self { temp }
  }

  fn root(&self) -> PathBuf {
    self.temp.path().join("mod")
  }

  fn cache(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  fn cmd(&self) -> Command {
    let mut cmd = bob_cmd();
    cmd.current_dir(self.root()).env("BOB_CACHE", self.cache());
    cmd
  }
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  bob_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  bob_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("bob"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "clean", "info"] {
    bob_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

#[test]
fn build_requires_target() {
  bob_cmd().arg("build").assert().failure();
}

#[test]
fn unknown_platform_is_rejected() {
  bob_cmd()
    .args(["build", "hello", "--platform", "plan9"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("plan9"));
}

// =============================================================================
// info
// =============================================================================

#[test]
#[serial]
fn info_shows_platform() {
  bob_cmd()
    .arg("info")
    .env("BOB_CACHE", "/tmp/bob-info-cache")
    .assert()
    .success()
    .stdout(predicate::str::contains("Platform"))
    .stdout(predicate::str::contains("/tmp/bob-info-cache"));
}

#[test]
fn info_json_output_is_valid() {
  let output = bob_cmd().args(["info", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert!(value["platform"].is_string());
  assert!(value["arch"].is_string());
}

// =============================================================================
// clean
// =============================================================================

#[test]
fn clean_removes_cache_root() {
  let temp = TempDir::new().unwrap();
  let cache = temp.path().join("cache");
  fs::create_dir_all(cache.join("file-abc")).unwrap();

  bob_cmd()
    .arg("clean")
    .arg("--cache")
    .arg(&cache)
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed cache"));
  assert!(!cache.exists());
}

#[test]
fn clean_missing_cache_succeeds() {
  let temp = TempDir::new().unwrap();

  bob_cmd()
    .arg("clean")
    .arg("--cache")
    .arg(temp.path().join("nothing"))
    .assert()
    .success()
    .stdout(predicate::str::contains("already empty"));
}

// =============================================================================
// build
// =============================================================================

#[test]
fn build_without_descriptor_fails() {
  let temp = TempDir::new().unwrap();

  bob_cmd()
    .args(["build", "hello", "--mod"])
    .arg(temp.path())
    .env("BOB_CACHE", temp.path().join("cache"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("bob.toml"));
}

#[test]
fn build_unknown_target_fails() {
  let module = TestModule::new();

  module
    .cmd()
    .args(["build", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("nope"));
}

#[cfg(unix)]
#[test]
fn build_links_output() {
  let module = TestModule::new();

  module
    .cmd()
    .args(["build", "hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Built"))
    .stdout(predicate::str::contains("Packs compiled: 1"));

  assert!(module.root().join("build/hello").exists());
  assert!(module.root().join("bob.sum").exists());
}

#[cfg(unix)]
#[test]
fn second_build_is_cached() {
  let module = TestModule::new();
  module.cmd().args(["build", "hello"]).assert().success();

  module
    .cmd()
    .args(["build", "hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Packs cached: 1"))
    .stdout(predicate::str::contains("0 fetched"));
}

#[cfg(unix)]
#[test]
fn build_from_subdirectory_finds_descriptor() {
  let module = TestModule::new();
  let out = module.temp.path().join("out");

  module
    .cmd()
    .current_dir(module.root().join("hello"))
    .args(["build", "hello", "--output"])
    .arg(&out)
    .assert()
    .success();
  assert!(Path::new(&out).join("hello").exists());
}
