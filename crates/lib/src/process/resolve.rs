//! Step 1: compute the transitive closure of a target.
//!
//! The closure holds the target's own pack and every pack it depends on
//! through `deps`, every library target of every transitively included
//! module, every external, and the toolchains compiling all of them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use tracing::{debug, info};

use super::types::{PackUnit, ProcessError, ToolchainSlot};
use crate::artifact::Artifact;
use crate::config::{ConfigError, ModConfig, PackConfig};
use crate::consts::{MOD_FILE_NAME, PACK_FILE_NAME};
use crate::graph::{External, Include, Mod, Target, Toolchain, load_mod};
use crate::loader::{Fetcher, Loader};

#[derive(Debug, Clone)]
pub struct Closure {
  pub target: Target,
  /// The first slot belongs to the requested target.
  pub toolchains: Vec<ToolchainSlot>,
  /// The requested target's pack comes first.
  pub packs: Vec<PackUnit>,
  pub externals: Vec<External>,
  pub includes: Vec<Include>,
}

impl Closure {
  fn new(target: &Target) -> Self {
    let mut closure = Self {
      target: target.clone(),
      toolchains: Vec::new(),
      packs: Vec::new(),
      externals: Vec::new(),
      includes: Vec::new(),
    };
    closure.slot_for(&target.toolchain);
    closure
  }

  /// Slot name of `toolchain`, registering it on first use. Distinct
  /// toolchains sharing a name get numbered slots.
  fn slot_for(&mut self, toolchain: &Arc<Toolchain>) -> String {
    if let Some(existing) = self.toolchains.iter().find(|s| *s.toolchain == **toolchain) {
      return existing.slot.clone();
    }

    let mut slot = toolchain.name.clone();
    let mut n = 2;
    while self.toolchains.iter().any(|s| s.slot == slot) {
      slot = format!("{}-{}", toolchain.name, n);
      n += 1;
    }
    self.toolchains.push(ToolchainSlot {
      slot: slot.clone(),
      toolchain: Arc::clone(toolchain),
    });
    slot
  }

  fn add_pack(&mut self, unit: PackUnit) {
    if !self.packs.iter().any(|p| p.module == unit.module && p.name == unit.name) {
      self.packs.push(unit);
    }
  }

  fn add_externals<'a>(&mut self, externals: impl Iterator<Item = &'a External>) {
    for external in externals {
      if !self.externals.contains(external) {
        self.externals.push(external.clone());
      }
    }
  }

  /// The slot of the requested target's toolchain.
  pub fn target_slot(&self) -> &ToolchainSlot {
    &self.toolchains[0]
  }

  /// Every artifact to materialize, paired with a description of its owner.
  pub fn artifacts(&self) -> Vec<(String, Artifact)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |owner: String, artifact: &Artifact| {
      if seen.insert(artifact.ledger_key()) {
        out.push((owner, artifact.clone()));
      }
    };

    for slot in &self.toolchains {
      for artifact in slot.toolchain.artifacts() {
        push(format!("toolchain '{}'", slot.toolchain.name), artifact);
      }
    }
    for external in &self.externals {
      for artifact in external.artifacts() {
        push(format!("external '{}'", external.name), artifact);
      }
    }
    for include in &self.includes {
      for artifact in include.artifacts() {
        push(format!("include '{}'", include.name), artifact);
      }
    }
    out
  }
}

/// Resolve `target` of `module`. Included modules are fetched through
/// `loader` to read their descriptors.
pub async fn resolve<F: Fetcher>(
  loader: &Loader<F>,
  module: &Mod,
  target: &str,
  clean: bool,
) -> Result<Closure, ProcessError> {
  let target = module.targets.get(target).ok_or_else(|| ProcessError::UnknownTarget {
    module: module.name.clone(),
    target: target.to_string(),
  })?;

  let mut closure = Closure::new(target);
  let slot = closure.target_slot().slot.clone();
  for unit in pack_closure(&module.name, &[module.root.clone()], &target.name, &slot)? {
    closure.add_pack(unit);
  }
  closure.add_externals(module.externals.values());

  // Header dirs each include exports, and the dirs each module imports
  let mut exported: HashMap<String, Vec<PathBuf>> = HashMap::new();
  let mut imports: HashMap<String, Vec<PathBuf>> = HashMap::new();

  let mut visited = HashSet::new();
  let mut pending = vec![module.clone()];
  while let Some(current) = pending.pop() {
    for include in current.includes.values() {
      let key = include_key(include);
      if !visited.insert(key.clone()) {
        if let Some(dirs) = exported.get(&key) {
          extend_unique(imports.entry(current.name.clone()).or_default(), dirs);
        }
        continue;
      }

      let (cfg, child, layers) = load_include(loader, include, module, clean).await?;
      info!(include = %include.name, module = %child.name, "resolved include");
      closure.includes.push(include.clone());
      closure.add_externals(child.externals.values());

      for lib in cfg.targets.iter().filter(|t| t.library) {
        let toolchain = if include.remote_toolchain {
          child
            .targets
            .get(&lib.pack)
            .map(|t| Arc::clone(&t.toolchain))
            .ok_or_else(|| ProcessError::NoRemoteToolchain {
              module: child.name.clone(),
              target: lib.pack.clone(),
            })?
        } else {
          Arc::clone(&target.toolchain)
        };

        let slot = closure.slot_for(&toolchain);
        let units = pack_closure(&child.name, &layers, &lib.pack, &slot)?;
        if let Some(root) = units.first() {
          extend_unique(exported.entry(key.clone()).or_default(), &root.header_dirs);
        }
        for unit in units {
          closure.add_pack(unit);
        }
      }
      if let Some(dirs) = exported.get(&key) {
        extend_unique(imports.entry(current.name.clone()).or_default(), dirs);
      }
      pending.push(child);
    }
  }

  for unit in &mut closure.packs {
    if let Some(dirs) = imports.get(&unit.module) {
      extend_unique(&mut unit.header_dirs, dirs);
    }
  }

  debug!(
    target = %target.name,
    packs = closure.packs.len(),
    toolchains = closure.toolchains.len(),
    externals = closure.externals.len(),
    includes = closure.includes.len(),
    "resolved closure"
  );
  Ok(closure)
}

fn extend_unique(dirs: &mut Vec<PathBuf>, more: &[PathBuf]) {
  for dir in more {
    if !dirs.contains(dir) {
      dirs.push(dir.clone());
    }
  }
}

fn include_key(include: &Include) -> String {
  match &include.overlay {
    Some(overlay) => format!("{}+{}", include.source.ledger_key(), overlay.ledger_key()),
    None => include.source.ledger_key(),
  }
}

/// Materialize an include and load its module. Returns the parsed
/// descriptor, the resolved module and the directory layers to search for
/// packs, overlay first.
async fn load_include<F: Fetcher>(
  loader: &Loader<F>,
  include: &Include,
  parent: &Mod,
  clean: bool,
) -> Result<(ModConfig, Mod, Vec<PathBuf>), ProcessError> {
  let owner = || format!("include '{}'", include.name);

  let mut layers = Vec::new();
  if let Some(overlay) = &include.overlay {
    let path = overlay.load(loader, clean).await.map_err(|source| ProcessError::Artifact {
      owner: owner(),
      source,
    })?;
    layers.push(path);
  }
  let source = include.source.load(loader, clean).await.map_err(|source| ProcessError::Artifact {
    owner: owner(),
    source,
  })?;
  layers.push(source.clone());

  let mod_file = layers
    .iter()
    .map(|layer| layer.join(MOD_FILE_NAME))
    .find(|path| path.is_file())
    .ok_or(ConfigError::ModNotFound(source))?;
  let cfg = ModConfig::load(&mod_file)?;
  let root = mod_file.parent().unwrap_or(Path::new(".")).to_path_buf();

  let outcome = load_mod(&cfg, parent.host, &root).map_err(|source| ProcessError::Graph {
    module: include.name.clone(),
    source,
  })?;
  Ok((cfg, outcome.module, layers))
}

fn find_pack_dir(layers: &[PathBuf], pack: &str) -> Option<PathBuf> {
  layers.iter().map(|layer| layer.join(pack)).find(|dir| dir.is_dir())
}

fn load_pack_config(dir: &Path) -> Result<PackConfig, ProcessError> {
  let path = dir.join(PACK_FILE_NAME);
  if path.is_file() {
    Ok(PackConfig::load(&path)?)
  } else {
    Ok(PackConfig::default())
  }
}

/// `root` and every pack it reaches through `deps`, in discovery order, each
/// seeing its own headers and those of its transitive deps. Dependency cycles
/// are an error.
fn pack_closure(module: &str, layers: &[PathBuf], root: &str, toolchain: &str) -> Result<Vec<PackUnit>, ProcessError> {
  let mut graph: DiGraph<String, ()> = DiGraph::new();
  let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
  let mut queue = VecDeque::from([root.to_string()]);
  nodes.insert(root.to_string(), graph.add_node(root.to_string()));

  let mut units = Vec::new();
  while let Some(name) = queue.pop_front() {
    let dir = find_pack_dir(layers, &name).ok_or_else(|| ProcessError::PackNotFound {
      module: module.to_string(),
      pack: name.clone(),
    })?;
    let config = load_pack_config(&dir)?;

    let from = nodes[&name];
    for dep in &config.deps {
      let to = match nodes.get(dep) {
        Some(&index) => index,
        None => {
          let index = graph.add_node(dep.clone());
          nodes.insert(dep.clone(), index);
          queue.push_back(dep.clone());
          index
        }
      };
      graph.add_edge(from, to, ());
    }

    units.push(PackUnit {
      module: module.to_string(),
      name,
      dir,
      config,
      toolchain: toolchain.to_string(),
      header_dirs: Vec::new(),
    });
  }

  toposort(&graph, None).map_err(|cycle| ProcessError::PackCycle {
    module: module.to_string(),
    pack: graph[cycle.node_id()].clone(),
  })?;

  let exports: HashMap<String, Vec<PathBuf>> = units.iter().map(|u| (u.name.clone(), u.include_dirs())).collect();
  for unit in &mut units {
    let mut dfs = Dfs::new(&graph, nodes[&unit.name]);
    while let Some(node) = dfs.next(&graph) {
      if let Some(dirs) = exports.get(&graph[node]) {
        extend_unique(&mut unit.header_dirs, dirs);
      }
    }
  }

  Ok(units)
}
