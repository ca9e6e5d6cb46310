//! Cache engine
//!
//! Directory layout:
//! - `journal`: append-only log of entry state changes
//! - `journal.tmp`: scratch file while the journal is rebuilt
//! - `<key>.<i>`: committed value of slot `i`
//! - `<key>.<i>.tmp`: value of slot `i` staged by an open edit

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::editor::Editor;
use crate::entry::{next_sequence_number, validate_key, Entry, PendingEdit};
use crate::error::{Error, Result};
use crate::journal::{self, JournalWriter, Record, JOURNAL_FILE, JOURNAL_FILE_TMP};
use crate::lru::LruIndex;
use crate::snapshot::Snapshot;
use crate::stats::CacheStats;

/// Handle on an open cache directory
///
/// Cloning the handle shares the same cache. Calls are serialized on an
/// internal mutex; the engine itself does no parallel work.
#[derive(Clone)]
pub struct DiskLruCache {
    pub(crate) inner: Arc<Mutex<Inner>>,
}

/// Values read out of an entry for a snapshot
pub(crate) struct SnapshotParts {
    pub sequence_number: u64,
    pub inputs: Vec<File>,
    pub lengths: Vec<u64>,
}

pub(crate) struct Inner {
    directory: PathBuf,
    config: CacheConfig,
    /// Sum of slot sizes of every readable entry not held by a recovered edit
    size: u64,
    entries: LruIndex<String, Entry>,
    /// `None` once the cache is closed
    journal: Option<JournalWriter>,
    redundant_ops: usize,
    next_editor_id: u64,
    stats: CacheStats,
}

impl DiskLruCache {
    /// Open or create a cache in `directory`
    ///
    /// # Arguments
    /// * `directory` - Directory owned by the cache
    /// * `app_version` - Version stamp; a mismatch discards existing data
    /// * `value_count` - Number of value slots per entry
    /// * `max_size` - Byte budget across all entries
    pub fn open<P: AsRef<Path>>(
        directory: P,
        app_version: u32,
        value_count: usize,
        max_size: u64,
    ) -> Result<Self> {
        Self::open_with(directory, CacheConfig::new(app_version, value_count, max_size))
    }

    /// Open or create a cache with explicit configuration
    ///
    /// An existing journal is replayed. If it cannot be replayed the whole
    /// directory is deleted and an empty cache is created in its place.
    pub fn open_with<P: AsRef<Path>>(directory: P, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let directory = directory.as_ref();

        if directory.join(JOURNAL_FILE).is_file() {
            match Inner::recover(directory, config.clone()) {
                Ok(inner) => {
                    info!(
                        directory = %directory.display(),
                        entries = inner.entries.len(),
                        size = inner.size,
                        "cache opened"
                    );
                    return Ok(Self::from_inner(inner));
                }
                Err(Error::Corrupt(reason)) => {
                    warn!(
                        directory = %directory.display(),
                        %reason,
                        "cache is corrupt, removing"
                    );
                    remove_dir_if_exists(directory)?;
                }
                Err(e) => return Err(e),
            }
        }

        fs::create_dir_all(directory)?;
        let mut inner = Inner::new(directory, config);
        inner.rebuild_journal()?;
        info!(directory = %directory.display(), "created empty cache");

        Ok(Self::from_inner(inner))
    }

    fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Snapshot of `key`, or `None` if it has no readable value
    ///
    /// A hit appends a `READ` record and marks the entry most recently used.
    pub fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        let parts = self.inner.lock().snapshot_parts(key)?;
        Ok(parts.map(|parts| Snapshot::new(self.clone(), key, parts)))
    }

    /// Begin an edit of `key`
    ///
    /// Returns `None` if another edit of the same key is in progress.
    pub fn edit(&self, key: &str) -> Result<Option<Editor>> {
        self.edit_with(key, None)
    }

    /// Begin an edit only if `key` was last committed as `sequence_number`
    pub(crate) fn edit_with(
        &self,
        key: &str,
        sequence_number: Option<u64>,
    ) -> Result<Option<Editor>> {
        let id = self.inner.lock().begin_edit(key, sequence_number)?;
        Ok(id.map(|id| Editor::new(self.clone(), key, id)))
    }

    /// Remove `key` and delete its values
    ///
    /// Returns `false` if the key is absent or currently being edited.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.inner.lock().remove(key)
    }

    /// Bytes currently used by readable entries
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Configured byte budget
    pub fn max_size(&self) -> u64 {
        self.inner.lock().config.max_size
    }

    /// Change the byte budget, evicting entries if the new budget is smaller
    pub fn set_max_size(&self, max_size: u64) -> Result<()> {
        if max_size == 0 {
            return Err(Error::InvalidConfig("max_size must be positive".to_string()));
        }
        let mut inner = self.inner.lock();
        inner.journal()?;
        inner.config.max_size = max_size;
        inner.trim_to_size()?;
        inner.journal()?.flush()
    }

    /// Number of value slots per entry
    pub fn value_count(&self) -> usize {
        self.inner.lock().config.value_count
    }

    /// Number of tracked entries, including ones still being created
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when no entries are tracked
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Cache directory
    pub fn directory(&self) -> PathBuf {
        self.inner.lock().directory.clone()
    }

    /// Counters since open and the journal's current redundancy
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            redundant_records: inner.redundant_ops as u64,
            ..inner.stats
        }
    }

    /// True after `close` or `delete`
    pub fn is_closed(&self) -> bool {
        self.inner.lock().journal.is_none()
    }

    /// Trim to the byte budget and sync the journal
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.journal()?;
        inner.cleanup()?;
        inner.journal()?.flush()
    }

    /// Rewrite the journal with one record per live entry
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.journal()?;
        inner.rebuild_journal()?;
        inner.stats.compactions += 1;
        Ok(())
    }

    /// Abort open edits, trim, and close the journal
    ///
    /// Closing twice is a no-op. Every other call fails with
    /// [`Error::Closed`] afterwards.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().close()
    }

    /// Close the cache and delete its directory
    pub fn delete(self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.close()?;
        remove_dir_if_exists(&inner.directory)?;
        info!(directory = %inner.directory.display(), "cache deleted");
        Ok(())
    }
}

impl Inner {
    fn new(directory: &Path, config: CacheConfig) -> Self {
        Self {
            directory: directory.to_path_buf(),
            config,
            size: 0,
            entries: LruIndex::new(),
            journal: None,
            redundant_ops: 0,
            next_editor_id: 1,
            stats: CacheStats::default(),
        }
    }

    /// Rebuild state from an existing journal
    fn recover(directory: &Path, config: CacheConfig) -> Result<Self> {
        let header = config.header();
        let replay = journal::read_journal(&directory.join(JOURNAL_FILE), &header)?;

        let mut inner = Self::new(directory, config);
        let record_count = replay.records.len();
        for record in replay.records {
            inner.apply(record);
        }

        // Keys that only ever saw READ records carry no data.
        inner.entries.retain(|_, entry| entry.readable || entry.is_editing());
        inner.process_journal();
        inner.redundant_ops = record_count.saturating_sub(inner.entries.len());

        if replay.truncated {
            inner.rebuild_journal()?;
        } else {
            inner.journal = Some(JournalWriter::open_append(&directory.join(JOURNAL_FILE))?);
        }

        Ok(inner)
    }

    /// Apply one replayed record to the index
    fn apply(&mut self, record: Record) {
        if let Record::Remove(key) = &record {
            self.entries.remove(key.as_str());
            return;
        }

        let pending = matches!(record, Record::Dirty(_)).then(|| PendingEdit {
            id: self.allocate_editor_id(),
            recovered: true,
        });

        let key = record.key();
        if self.entries.get(key).is_none() {
            self.entries
                .push(key.to_string(), Entry::new(key, self.config.value_count));
        }
        let Some(entry) = self.entries.peek_mut(key) else {
            return;
        };

        match record {
            Record::Clean(_, sizes) => {
                entry.readable = true;
                entry.current_editor = None;
                entry.sizes = sizes;
            }
            Record::Dirty(_) => entry.current_editor = pending,
            Record::Read(_) | Record::Remove(_) => {}
        }
    }

    /// Compute the aggregate size after replay
    fn process_journal(&mut self) {
        delete_if_exists(&self.directory.join(JOURNAL_FILE_TMP));
        self.size = self
            .entries
            .iter_lru()
            .filter(|(_, entry)| !entry.is_editing())
            .map(|(_, entry)| entry.total_size())
            .sum();
    }

    /// Replace the journal with a compact one and reopen it for appending
    ///
    /// Entries are written least recently used first so a replay restores
    /// the same order. A readable entry under edit is written as `CLEAN`
    /// followed by `DIRTY`.
    ///
    /// The current writer stays in place until the new journal is ready, so
    /// a failed rebuild leaves the cache open on the old journal.
    fn rebuild_journal(&mut self) -> Result<()> {
        if let Some(old) = self.journal.as_mut() {
            if let Err(e) = old.flush() {
                debug!(error = %e, "flushing journal before rebuild failed");
            }
        }

        let mut records = Vec::with_capacity(self.entries.len());
        for (key, entry) in self.entries.iter_lru() {
            if entry.readable {
                records.push(Record::Clean(key.clone(), entry.sizes.clone()));
            }
            if entry.is_editing() {
                records.push(Record::Dirty(key.clone()));
            }
        }

        let rebuilt = JournalWriter::rebuild(&self.directory, &self.config.header(), &records)?;
        self.journal = Some(rebuilt);
        self.redundant_ops = 0;
        Ok(())
    }

    fn journal(&mut self) -> Result<&mut JournalWriter> {
        self.journal.as_mut().ok_or(Error::Closed)
    }

    fn allocate_editor_id(&mut self) -> u64 {
        let id = self.next_editor_id;
        self.next_editor_id += 1;
        id
    }

    fn journal_rebuild_required(&self) -> bool {
        self.redundant_ops >= self.config.compaction_threshold
            && self.redundant_ops >= self.entries.len()
    }

    /// Trim to budget and compact the journal if it has grown redundant
    fn cleanup(&mut self) -> Result<()> {
        self.trim_to_size()?;
        if self.journal_rebuild_required() {
            self.rebuild_journal()?;
            self.stats.compactions += 1;
        }
        Ok(())
    }

    fn snapshot_parts(&mut self, key: &str) -> Result<Option<SnapshotParts>> {
        self.journal()?;
        validate_key(key)?;

        let value_count = self.config.value_count;
        let entry = match self.entries.get(key) {
            Some(entry) if entry.readable => entry,
            _ => {
                self.stats.misses += 1;
                return Ok(None);
            }
        };

        let mut inputs = Vec::with_capacity(value_count);
        for index in 0..value_count {
            let path = entry.clean_file(&self.directory, index);
            match File::open(&path) {
                Ok(file) => inputs.push(file),
                Err(e) => {
                    // Value files deleted behind our back read as a miss.
                    debug!(file = %path.display(), error = %e, "value file missing");
                    self.stats.misses += 1;
                    return Ok(None);
                }
            }
        }

        let parts = SnapshotParts {
            sequence_number: entry.sequence_number,
            inputs,
            lengths: entry.sizes.clone(),
        };

        self.redundant_ops += 1;
        if let Err(e) = self.journal()?.append(&Record::Read(key.to_string())) {
            debug!(key, error = %e, "failed to record read");
        }
        self.stats.hits += 1;

        Ok(Some(parts))
    }

    /// Attach a new editor to `key`, returning its id
    ///
    /// The `DIRTY` record is synced before returning so no value file can
    /// exist for an edit the journal does not know about.
    fn begin_edit(&mut self, key: &str, sequence_number: Option<u64>) -> Result<Option<u64>> {
        self.journal()?;
        validate_key(key)?;

        let pending = PendingEdit {
            id: self.allocate_editor_id(),
            recovered: false,
        };

        let created = match self.entries.get(key) {
            Some(entry) => {
                if sequence_number.is_some_and(|seq| seq != entry.sequence_number) {
                    return Ok(None);
                }
                if entry.is_editing() {
                    return Ok(None);
                }
                entry.current_editor = Some(pending);
                false
            }
            None => {
                if sequence_number.is_some() {
                    return Ok(None);
                }
                let mut entry = Entry::new(key, self.config.value_count);
                entry.current_editor = Some(pending);
                self.entries.push(key.to_string(), entry);
                true
            }
        };

        let logged = self
            .journal()
            .and_then(|journal| {
                journal.append(&Record::Dirty(key.to_string()))?;
                journal.flush()
            });

        if let Err(e) = logged {
            if created {
                self.entries.remove(key);
            } else if let Some(entry) = self.entries.peek_mut(key) {
                entry.current_editor = None;
            }
            return Err(e);
        }

        Ok(Some(pending.id))
    }

    /// Staged file of slot `index` for the editor `id`
    pub(crate) fn dirty_file(&self, key: &str, id: u64, index: usize) -> Result<PathBuf> {
        let entry = self.editing_entry(key, id, index)?;
        Ok(entry.dirty_file(&self.directory, index))
    }

    /// Committed file of slot `index`, if the entry has ever been committed
    pub(crate) fn clean_file(&self, key: &str, id: u64, index: usize) -> Result<Option<PathBuf>> {
        let entry = self.editing_entry(key, id, index)?;
        Ok(entry
            .readable
            .then(|| entry.clean_file(&self.directory, index)))
    }

    fn editing_entry(&self, key: &str, id: u64, index: usize) -> Result<&Entry> {
        if self.journal.is_none() {
            return Err(Error::Closed);
        }
        if index >= self.config.value_count {
            return Err(Error::InvalidSlot {
                index,
                value_count: self.config.value_count,
            });
        }
        match self.entries.peek(key) {
            Some(entry) if entry.current_editor.map(|p| p.id) == Some(id) => Ok(entry),
            _ => Err(Error::StaleEditor(key.to_string())),
        }
    }

    /// Finish an editor's work
    ///
    /// An edit that saw write errors is aborted and the entry removed, so
    /// partially written values never become readable.
    pub(crate) fn commit(&mut self, key: &str, id: u64, has_errors: bool) -> Result<()> {
        if has_errors {
            warn!(key, "discarding edit after write failure");
            self.complete_edit(key, id, false)?;
            self.remove(key)?;
            return Ok(());
        }
        self.complete_edit(key, id, true)
    }

    pub(crate) fn complete_edit(&mut self, key: &str, id: u64, success: bool) -> Result<()> {
        self.journal()?;
        let value_count = self.config.value_count;

        let entry = match self.entries.peek_mut(key) {
            Some(entry) if entry.current_editor.map(|p| p.id) == Some(id) => entry,
            _ => return Err(Error::StaleEditor(key.to_string())),
        };

        // A first commit must produce every slot.
        if success && !entry.readable {
            let missing = (0..value_count).find(|&i| !entry.dirty_file(&self.directory, i).exists());
            if let Some(index) = missing {
                self.complete_edit(key, id, false)?;
                return Err(Error::MissingSlot {
                    key: key.to_string(),
                    index,
                });
            }
        }

        let mut failure = None;
        for index in 0..value_count {
            let dirty = entry.dirty_file(&self.directory, index);
            if !success {
                delete_if_exists(&dirty);
                continue;
            }
            if !dirty.exists() {
                continue;
            }
            let clean = entry.clean_file(&self.directory, index);
            match fs::rename(&dirty, &clean).and_then(|()| fs::metadata(&clean)) {
                Ok(metadata) => {
                    let old_length = entry.sizes[index];
                    entry.sizes[index] = metadata.len();
                    self.size = self.size + metadata.len() - old_length;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            return self.roll_back_commit(key, e);
        }

        let recovered = entry.current_editor.is_some_and(|p| p.recovered);
        entry.current_editor = None;

        let record = if entry.readable || success {
            if !success && recovered {
                // Sizes of entries held by a replayed edit were never counted.
                self.size += entry.total_size();
            }
            entry.readable = true;
            if success {
                entry.sequence_number = next_sequence_number();
                self.stats.commits += 1;
            } else {
                self.stats.aborts += 1;
            }
            Record::Clean(key.to_string(), entry.sizes.clone())
        } else {
            self.stats.aborts += 1;
            self.entries.remove(key);
            Record::Remove(key.to_string())
        };

        self.redundant_ops += 1;
        self.journal()?.append(&record)?;

        if self.size > self.config.max_size || self.journal_rebuild_required() {
            self.cleanup()?;
        }

        self.journal()?.flush()
    }

    /// Undo a commit whose promotion of staged files failed part way
    ///
    /// Staged files are deleted and the editor detached. A never-committed
    /// entry loses the files already promoted and is removed; a readable one
    /// keeps whatever is now on disk. The journal records the outcome and the
    /// promotion error is returned.
    fn roll_back_commit(&mut self, key: &str, error: io::Error) -> Result<()> {
        warn!(key, error = %error, "commit failed, rolling back");
        let value_count = self.config.value_count;

        let Some(entry) = self.entries.peek_mut(key) else {
            return Err(error.into());
        };
        entry.current_editor = None;

        let record = if entry.readable {
            for index in 0..value_count {
                delete_if_exists(&entry.dirty_file(&self.directory, index));
                let on_disk = fs::metadata(entry.clean_file(&self.directory, index))
                    .ok()
                    .filter(|metadata| metadata.is_file())
                    .map_or(0, |metadata| metadata.len());
                self.size = self.size.saturating_sub(entry.sizes[index]) + on_disk;
                entry.sizes[index] = on_disk;
            }
            Record::Clean(key.to_string(), entry.sizes.clone())
        } else {
            for index in 0..value_count {
                delete_if_exists(&entry.dirty_file(&self.directory, index));
                delete_if_exists(&entry.clean_file(&self.directory, index));
            }
            self.size = self.size.saturating_sub(entry.total_size());
            self.entries.remove(key);
            Record::Remove(key.to_string())
        };

        self.stats.aborts += 1;
        self.redundant_ops += 1;
        self.journal()?.append(&record)?;
        self.journal()?.flush()?;
        Err(error.into())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        self.journal()?;
        validate_key(key)?;

        let entry = match self.entries.peek(key) {
            Some(entry) if !entry.is_editing() => entry,
            _ => return Ok(false),
        };

        for index in 0..self.config.value_count {
            let clean = entry.clean_file(&self.directory, index);
            match fs::remove_file(&clean) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(entry) = self.entries.remove(key) {
            self.size -= entry.total_size();
        }

        self.redundant_ops += 1;
        self.journal()?.append(&Record::Remove(key.to_string()))?;
        Ok(true)
    }

    /// Evict least recently used entries until the budget is met
    ///
    /// Entries under edit cannot be removed; if only those remain the loop
    /// stops and the cache stays over budget until they finish.
    fn trim_to_size(&mut self) -> Result<()> {
        while self.size > self.config.max_size {
            let victim = self
                .entries
                .iter_lru()
                .find(|(_, entry)| !entry.is_editing())
                .map(|(key, _)| key.clone());

            let Some(key) = victim else {
                warn!(
                    size = self.size,
                    max_size = self.config.max_size,
                    "over budget but every entry is being edited"
                );
                break;
            };

            if !self.remove(&key)? {
                break;
            }
            self.stats.evictions += 1;
            debug!(key = %key, size = self.size, "evicted entry");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.journal.is_none() {
            return Ok(());
        }

        let editing: Vec<(String, u64)> = self
            .entries
            .iter_lru()
            .filter_map(|(key, entry)| entry.current_editor.map(|p| (key.clone(), p.id)))
            .collect();
        for (key, id) in editing {
            self.complete_edit(&key, id, false)?;
        }

        self.trim_to_size()?;
        self.journal()?.flush()?;
        self.journal = None;
        info!(
            directory = %self.directory.display(),
            hits = self.stats.hits,
            misses = self.stats.misses,
            commits = self.stats.commits,
            evictions = self.stats.evictions,
            "cache closed"
        );
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Delete a file that may legitimately be absent
fn delete_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(file = %path.display(), error = %e, "failed to delete file");
        }
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
