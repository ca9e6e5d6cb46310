//! Read-only views of committed entries

use std::fs::File;
use std::io::Read;

use crate::cache::{DiskLruCache, SnapshotParts};
use crate::editor::Editor;
use crate::error::{Error, Result};

/// Open readers on every slot of an entry as it was when looked up
///
/// The files stay readable even if the entry is replaced or evicted
/// afterwards.
pub struct Snapshot {
    cache: DiskLruCache,
    key: String,
    sequence_number: u64,
    inputs: Vec<File>,
    lengths: Vec<u64>,
}

impl Snapshot {
    pub(crate) fn new(cache: DiskLruCache, key: &str, parts: SnapshotParts) -> Self {
        Self {
            cache,
            key: key.to_string(),
            sequence_number: parts.sequence_number,
            inputs: parts.inputs,
            lengths: parts.lengths,
        }
    }

    /// Key of the entry
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Commit sequence number the snapshot was taken at
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Begin an edit, unless the entry has been committed since this
    /// snapshot was taken or is being edited right now
    pub fn edit(&self) -> Result<Option<Editor>> {
        self.cache.edit_with(&self.key, Some(self.sequence_number))
    }

    /// Reader for slot `index`
    pub fn input_stream(&mut self, index: usize) -> Option<&mut File> {
        self.inputs.get_mut(index)
    }

    /// Byte length of slot `index` when the snapshot was taken
    pub fn length(&self, index: usize) -> Option<u64> {
        self.lengths.get(index).copied()
    }

    /// Read the remaining bytes of slot `index`
    pub fn read_to_end(&mut self, index: usize) -> Result<Vec<u8>> {
        let value_count = self.inputs.len();
        let input = self
            .inputs
            .get_mut(index)
            .ok_or(Error::InvalidSlot { index, value_count })?;
        let mut buf = Vec::new();
        input.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read the remaining bytes of slot `index` as UTF-8
    pub fn read_to_string(&mut self, index: usize) -> Result<String> {
        let bytes = self.read_to_end(index)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Give up the slot readers
    pub fn into_input_streams(self) -> Vec<File> {
        self.inputs
    }
}
