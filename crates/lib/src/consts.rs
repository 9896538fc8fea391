//! Well-known names shared across the crate.

/// Application name, used for cache and config directories.
pub const APP_NAME: &str = "bob";

/// Module descriptor file name.
pub const MOD_FILE_NAME: &str = "bob.toml";

/// Pack descriptor file name, expected inside every pack directory.
pub const PACK_FILE_NAME: &str = "pack.toml";

/// Sum ledger file name, stored next to the module descriptor.
pub const SUM_FILE_NAME: &str = "bob.sum";

/// Environment variable overriding the cache root.
pub const CACHE_ENV_VAR: &str = "BOB_CACHE";

/// Marker written into a cache directory once its content is complete.
pub const COMPLETE_MARKER: &str = ".bob-complete";

/// Name of the temporary download blob inside an HTTP artifact directory.
pub const DOWNLOAD_BLOB: &str = ".bob-download.blob";

/// Entries ignored when computing directory digests.
pub const DIGEST_EXCLUSIONS: &[&str] = &[COMPLETE_MARKER, DOWNLOAD_BLOB, ".git"];

/// Default output directory, relative to the module root.
pub const DEFAULT_OUTPUT_DIR: &str = "build";
