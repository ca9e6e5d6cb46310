//! In-progress edits
//!
//! An [`Editor`] stages slot values in temporary files. `commit` promotes
//! them over the committed files, `abort` throws them away. Dropping an
//! editor that was neither committed nor aborted aborts it.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::DiskLruCache;
use crate::error::Result;

/// Handle on an open edit of one entry
pub struct Editor {
    cache: DiskLruCache,
    key: String,
    id: u64,
    /// Set by any `SlotWriter` whose write or flush failed
    failed: Arc<AtomicBool>,
    finished: bool,
}

impl Editor {
    pub(crate) fn new(cache: DiskLruCache, key: &str, id: u64) -> Self {
        Self {
            cache,
            key: key.to_string(),
            id,
            failed: Arc::new(AtomicBool::new(false)),
            finished: false,
        }
    }

    /// Key being edited
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Writer for the new value of slot `index`
    ///
    /// Each call truncates whatever was staged for the slot before. Slots
    /// left unwritten keep their committed value.
    pub fn new_output_stream(&self, index: usize) -> Result<SlotWriter> {
        let path = self.cache.inner.lock().dirty_file(&self.key, self.id, index)?;
        let file = File::create(path)?;
        Ok(SlotWriter::new(
            BufWriter::new(file),
            Arc::clone(&self.failed),
        ))
    }

    /// Stage `value` as the whole new value of slot `index`
    pub fn set(&self, index: usize, value: impl AsRef<[u8]>) -> Result<()> {
        let mut writer = self.new_output_stream(index)?;
        writer.write_all(value.as_ref())?;
        writer.finish()?;
        Ok(())
    }

    /// Reader over the last committed value of slot `index`
    ///
    /// `None` if the entry has never been committed.
    pub fn new_input_stream(&self, index: usize) -> Result<Option<File>> {
        let path = self.cache.inner.lock().clean_file(&self.key, self.id, index)?;
        match path {
            Some(path) => match File::open(path) {
                Ok(file) => Ok(Some(file)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
            None => Ok(None),
        }
    }

    /// True if any staged write failed
    pub fn has_errors(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Publish the staged values
    ///
    /// If a staged write failed the edit is discarded and the entry is
    /// removed. A first edit that left a slot unwritten fails with
    /// [`Error::MissingSlot`](crate::Error::MissingSlot) and the entry stays absent.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let has_errors = self.has_errors();
        self.cache.inner.lock().commit(&self.key, self.id, has_errors)
    }

    /// Discard the staged values
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.cache.inner.lock().complete_edit(&self.key, self.id, false)
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.cache.inner.lock().complete_edit(&self.key, self.id, false);
        }
    }
}

/// Writer for one staged slot value
///
/// Failures are returned as usual and also recorded on the owning
/// [`Editor`], which then refuses to publish anything at commit.
pub struct SlotWriter<W: Write = BufWriter<File>> {
    writer: W,
    failed: Arc<AtomicBool>,
}

impl<W: Write> SlotWriter<W> {
    pub(crate) fn new(writer: W, failed: Arc<AtomicBool>) -> Self {
        Self { writer, failed }
    }

    fn track<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.failed.store(true, Ordering::Relaxed);
        }
        result
    }

    /// Flush buffered bytes, reporting any failure
    pub fn finish(mut self) -> io::Result<()> {
        self.flush()
    }
}

impl<W: Write> Write for SlotWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.writer.write(buf);
        self.track(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.writer.flush();
        self.track(result)
    }
}

impl<W: Write> Drop for SlotWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "disk gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_slot_writer_records_failure() {
        let failed = Arc::new(AtomicBool::new(false));
        let mut writer = SlotWriter::new(BrokenPipe, Arc::clone(&failed));

        assert!(writer.write_all(b"data").is_err());
        assert!(failed.load(Ordering::Relaxed));
    }

    #[test]
    fn test_slot_writer_success_leaves_flag_clear() {
        let failed = Arc::new(AtomicBool::new(false));
        let mut writer = SlotWriter::new(Vec::new(), Arc::clone(&failed));

        writer.write_all(b"data").unwrap();
        writer.finish().unwrap();
        assert!(!failed.load(Ordering::Relaxed));
    }

    #[test]
    fn test_commit_with_write_errors_removes_entry() {
        let dir = TempDir::new().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1, 1, 100).unwrap();

        let editor = cache.edit("foo").unwrap().unwrap();
        editor.set(0, "hello").unwrap();
        editor.commit().unwrap();
        assert_eq!(cache.size(), 5);

        let editor = cache.edit("foo").unwrap().unwrap();
        editor.set(0, "partial").unwrap();
        editor.failed.store(true, Ordering::Relaxed);
        assert!(editor.has_errors());
        editor.commit().unwrap();

        assert!(cache.get("foo").unwrap().is_none());
        assert_eq!(cache.size(), 0);
        assert!(!dir.path().join("foo.0").exists());
        assert!(!dir.path().join("foo.0.tmp").exists());
    }

    #[test]
    fn test_input_stream_reads_committed_value() {
        let dir = TempDir::new().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1, 1, 100).unwrap();

        let editor = cache.edit("foo").unwrap().unwrap();
        assert!(editor.new_input_stream(0).unwrap().is_none());
        editor.set(0, "old").unwrap();
        editor.commit().unwrap();

        let editor = cache.edit("foo").unwrap().unwrap();
        editor.set(0, "new").unwrap();
        let mut committed = String::new();
        editor
            .new_input_stream(0)
            .unwrap()
            .unwrap()
            .read_to_string(&mut committed)
            .unwrap();
        assert_eq!(committed, "old");
        editor.commit().unwrap();
    }

    #[test]
    fn test_slot_out_of_range() {
        let dir = TempDir::new().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1, 2, 100).unwrap();

        let editor = cache.edit("foo").unwrap().unwrap();
        assert!(matches!(
            editor.new_output_stream(2),
            Err(Error::InvalidSlot { index: 2, value_count: 2 })
        ));
    }

    #[test]
    fn test_drop_aborts_edit() {
        let dir = TempDir::new().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1, 1, 100).unwrap();

        {
            let editor = cache.edit("foo").unwrap().unwrap();
            editor.set(0, "never committed").unwrap();
        }

        assert!(cache.get("foo").unwrap().is_none());
        assert!(cache.is_empty());
        assert!(!dir.path().join("foo.0.tmp").exists());
        assert!(cache.edit("foo").unwrap().is_some());
    }

    #[test]
    fn test_editor_stale_after_close() {
        let dir = TempDir::new().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1, 1, 100).unwrap();

        let editor = cache.edit("foo").unwrap().unwrap();
        editor.set(0, "value").unwrap();
        cache.close().unwrap();

        assert!(matches!(editor.set(0, "again"), Err(Error::Closed)));
        assert!(matches!(editor.commit(), Err(Error::Closed)));

        let journal = fs::read_to_string(dir.path().join("journal")).unwrap();
        assert!(journal.ends_with("DIRTY foo\nREMOVE foo\n"));
    }
}
