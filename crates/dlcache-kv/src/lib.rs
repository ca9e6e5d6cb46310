//! # dlcache-kv
//!
//! Convenience layer over [`dlcache`] for caches holding one value per key.
//!
//! - Strings and raw bytes via `put` / `get_string`
//! - Any `serde` type as JSON via `put_json` / `get_json`
//! - Engine failures are logged with `tracing` and surface as `None`/`false`

#![warn(missing_docs)]

mod kv;

pub use kv::{KvCache, KvOptions, DEFAULT_APP_VERSION, DEFAULT_DIRECTORY, DEFAULT_MAX_SIZE};
