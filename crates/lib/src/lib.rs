//! bob-lib: core of the bob C/C++ module build system.
//!
//! - [`graph`]: turns a parsed `bob.toml` into a host-filtered [`graph::Mod`]
//! - [`artifact`]: fetchable, cacheable, hashable units of content
//! - [`loader`]: single-flight, content-addressed materialization of artifacts
//! - [`sum`]: the ledger of verified artifact digests
//! - [`process`]: resolves, materializes, compiles and links one target

pub mod artifact;
pub mod config;
pub mod consts;
pub mod graph;
pub mod interrupt;
pub mod loader;
pub mod platform;
pub mod process;
pub mod sum;
pub mod util;
