//! On-disk module fixtures with a fake shell-script toolchain.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::{ExternalConfig, IncludeConfig, LocatorConfig, ModConfig, PackConfig, TargetConfig, ToolchainConfig};
use crate::graph::{Mod, load_mod};
use crate::platform::Host;

/// Logs its arguments, writes a dummy file to the `-o` path, and fails on
/// any `broken.c` source.
const FAKE_CC: &str = r#"#!/bin/sh
echo "$@" >> "__LOG__"
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  case "$arg" in
    *broken.c) echo "$arg:1: error: expected ';'" >&2; exit 1;;
  esac
  prev="$arg"
done
if [ -n "$out" ]; then echo "fake" > "$out"; fi
exit 0
"#;

pub struct Fixture {
  temp: TempDir,
  cfg: RefCell<ModConfig>,
}

impl Fixture {
  /// A module `app` with one non-library target `app`, a `gcc` toolchain for
  /// every host, and one header-only external.
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("mod");
    fs::create_dir_all(&root).unwrap();

    let tc = temp.path().join("tc");
    write_fake_cc(&tc, &temp.path().join("tc.log"));

    let sysroot = temp.path().join("sysroot/include");
    fs::create_dir_all(&sysroot).unwrap();
    fs::write(sysroot.join("sys.h"), "#define SYS 1\n").unwrap();

    let tc_url = format!("file://{}", tc.display());
    let cfg = ModConfig {
      module: "app".to_string(),
      toolchains: vec![ToolchainConfig {
        name: "gcc".to_string(),
        platforms: vec!["unix".to_string(), "windows".to_string()],
        archs: vec!["amd64".to_string(), "arm64".to_string()],
        compiler: LocatorConfig::new(&tc_url).with_path("bin/cc"),
        linker: LocatorConfig::new(&tc_url).with_path("bin/cc"),
        stdlib: None,
        stdpplib: None,
        supportlibs: vec![],
        startfiles: vec![],
      }],
      targets: vec![TargetConfig {
        pack: "app".to_string(),
        library: false,
        toolchains: vec!["gcc".to_string()],
      }],
      includes: vec![],
      externals: vec![ExternalConfig {
        name: "sys".to_string(),
        rpaths: vec!["/opt/sys/lib".to_string()],
        headers: vec![LocatorConfig::new(format!("file://{}", sysroot.display()))],
        libraries: vec![],
      }],
    };

    Self {
      temp,
      cfg: RefCell::new(cfg),
    }
  }

  pub fn root(&self) -> PathBuf {
    self.temp.path().join("mod")
  }

  pub fn cache(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  /// Lines the fake toolchain logged, one per invocation.
  pub fn invocations(&self) -> Vec<String> {
    fs::read_to_string(self.temp.path().join("tc.log"))
      .map(|s| s.lines().map(str::to_string).collect())
      .unwrap_or_default()
  }

  /// Create pack `name` in the root module.
  pub fn pack(&self, name: &str, deps: &[&str], files: &[(&str, &str)]) {
    write_pack(&self.root().join(name), deps, files);
  }

  pub fn write_file(&self, relative: &str, content: &str) {
    let path = self.root().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  /// Create module `name` with library target `lib` and include it. The
  /// included module declares no toolchain usable on any host.
  pub fn include_module(&self, name: &str, lib: &str, remote_toolchain: bool) {
    let dir = self.temp.path().join("libs").join(name);
    fs::create_dir_all(&dir).unwrap();
    let included = ModConfig {
      module: name.to_string(),
      toolchains: vec![],
      targets: vec![TargetConfig {
        pack: lib.to_string(),
        library: true,
        toolchains: vec!["remote-only".to_string()],
      }],
      includes: vec![],
      externals: vec![],
    };
    fs::write(dir.join("bob.toml"), toml::to_string(&included).unwrap()).unwrap();
    write_pack(&dir.join(lib), &[], &[(&format!("{}.c", lib), "int lib;")]);

    self.cfg.borrow_mut().includes.push(IncludeConfig {
      module: name.to_string(),
      source: LocatorConfig::new(format!("file://{}", dir.display())),
      overlay: None,
      remote_toolchain,
    });
  }

  /// Take the linker from a second toolchain directory whose program is also
  /// named `bin/cc` but logs to its own file.
  pub fn separate_linker(&self) {
    let tc = self.temp.path().join("tc2");
    write_fake_cc(&tc, &self.temp.path().join("tc2.log"));
    let linker = LocatorConfig::new(format!("file://{}", tc.display())).with_path("bin/cc");
    self.cfg.borrow_mut().toolchains[0].linker = linker;
  }

  /// Lines logged by the linker set up with [`Fixture::separate_linker`].
  pub fn linker_invocations(&self) -> Vec<String> {
    fs::read_to_string(self.temp.path().join("tc2.log"))
      .map(|s| s.lines().map(str::to_string).collect())
      .unwrap_or_default()
  }

  pub fn set_overlay(&self, include: &str, url: &str) {
    let mut cfg = self.cfg.borrow_mut();
    let entry = cfg.includes.iter_mut().find(|i| i.module == include).unwrap();
    entry.overlay = Some(LocatorConfig::new(url));
  }

  pub fn set_target_library(&self, library: bool) {
    self.cfg.borrow_mut().targets[0].library = library;
  }

  /// Resolve the module for the current host and write its `bob.toml`.
  pub fn load(&self) -> Mod {
    let cfg = self.cfg.borrow();
    fs::write(self.root().join("bob.toml"), toml::to_string(&*cfg).unwrap()).unwrap();
    load_mod(&cfg, Host::current().unwrap(), &self.root()).unwrap().module
  }
}

fn write_fake_cc(tc: &Path, log: &Path) {
  fs::create_dir_all(tc.join("bin")).unwrap();
  let cc = tc.join("bin/cc");
  fs::write(&cc, FAKE_CC.replace("__LOG__", &log.to_string_lossy())).unwrap();
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(&cc, fs::Permissions::from_mode(0o755)).unwrap();
  }
}

fn write_pack(dir: &Path, deps: &[&str], files: &[(&str, &str)]) {
  fs::create_dir_all(dir).unwrap();
  let config = PackConfig {
    std: Some("17".to_string()),
    deps: deps.iter().map(|d| d.to_string()).collect(),
    ..Default::default()
  };
  fs::write(dir.join("pack.toml"), toml::to_string(&config).unwrap()).unwrap();
  for (name, content) in files {
    fs::write(dir.join(name), content).unwrap();
  }
}
