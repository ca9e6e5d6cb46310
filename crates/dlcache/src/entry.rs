//! Per-key metadata and value file naming
//!
//! Slot `i` of key `k` lives in `<dir>/k.i` once committed and in
//! `<dir>/k.i.tmp` while an edit is staging it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide commit counter. Only compared within one process lifetime.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Allocate the next commit sequence number
pub(crate) fn next_sequence_number() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// The edit currently holding an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingEdit {
    pub id: u64,
    /// Rebuilt from a `DIRTY` record during replay; no live `Editor` owns it
    pub recovered: bool,
}

/// Cache metadata for one key
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub key: String,
    /// Byte length of each slot's clean file
    pub sizes: Vec<u64>,
    /// True once any edit of this entry has been committed
    pub readable: bool,
    pub current_editor: Option<PendingEdit>,
    /// Sequence number of the most recent commit
    pub sequence_number: u64,
}

impl Entry {
    pub fn new(key: &str, value_count: usize) -> Self {
        Self {
            key: key.to_string(),
            sizes: vec![0; value_count],
            readable: false,
            current_editor: None,
            sequence_number: 0,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.sizes.iter().sum()
    }

    pub fn is_editing(&self) -> bool {
        self.current_editor.is_some()
    }

    pub fn clean_file(&self, dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("{}.{}", self.key, index))
    }

    pub fn dirty_file(&self, dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("{}.{}.tmp", self.key, index))
    }
}

/// Reject keys that cannot be written into a journal line or a file name
pub(crate) fn validate_key(key: &str) -> crate::Result<()> {
    let bad = key.is_empty()
        || key
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\');
    if bad {
        return Err(crate::Error::InvalidKey(key.to_string()));
    }
    Ok(())
}
