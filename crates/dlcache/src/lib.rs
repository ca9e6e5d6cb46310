//! # dlcache
//!
//! Size-bounded disk cache with least-recently-used eviction that survives
//! crashes and restarts.
//!
//! ## Architecture
//! - **Journal**: plain-text write-ahead log of `DIRTY`/`CLEAN`/`REMOVE`/`READ`
//!   records; replayed on open, compacted by atomic rename
//! - **Index**: hash map plus intrusive recency list (O(1) lookup and touch);
//!   eviction walks from the cold end past entries under edit
//! - **Edits**: values are staged in `.tmp` files and renamed into place on
//!   commit, after the journal has durably recorded the edit
//! - **Eviction**: least recently used entries go first once the byte budget
//!   is exceeded
//!
//! ```no_run
//! use std::io::Write;
//!
//! let cache = dlcache::DiskLruCache::open("/tmp/cache", 1, 1, 1024 * 1024)?;
//!
//! if let Some(editor) = cache.edit("greeting")? {
//!     editor.new_output_stream(0)?.write_all(b"hello")?;
//!     editor.commit()?;
//! }
//!
//! if let Some(mut snapshot) = cache.get("greeting")? {
//!     assert_eq!(snapshot.read_to_string(0)?, "hello");
//! }
//! # Ok::<(), dlcache::Error>(())
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod editor;
mod entry;
mod error;
pub mod journal;
mod lru;
mod snapshot;
mod stats;

pub use cache::DiskLruCache;
pub use config::{CacheConfig, DEFAULT_COMPACTION_THRESHOLD};
pub use editor::{Editor, SlotWriter};
pub use error::{Error, Result};
pub use lru::LruIndex;
pub use snapshot::Snapshot;
pub use stats::CacheStats;
