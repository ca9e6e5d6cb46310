//! KvCache: single-value string and JSON storage on a DiskLruCache

use std::fs::File;
use std::path::PathBuf;

use dlcache::{DiskLruCache, Editor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default cache directory, relative to the working directory
pub const DEFAULT_DIRECTORY: &str = "data/cache";

/// Default byte budget (5 MiB)
pub const DEFAULT_MAX_SIZE: u64 = 5 * 1024 * 1024;

/// Default application version
pub const DEFAULT_APP_VERSION: u32 = 1;

/// Options for [`KvCache::open`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvOptions {
    /// Cache directory
    pub directory: PathBuf,
    /// Application version written to the journal header
    pub app_version: u32,
    /// Byte budget
    pub max_size: u64,
}

impl Default for KvOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            app_version: DEFAULT_APP_VERSION,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl KvOptions {
    /// Default options rooted at `directory`
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}

/// String/JSON cache where every key holds exactly one value
///
/// Engine failures are logged and reported as `None` or `false`; nothing
/// here returns an error once the cache is open.
pub struct KvCache {
    cache: DiskLruCache,
}

impl KvCache {
    /// Open the cache described by `options`
    pub fn open(options: &KvOptions) -> dlcache::Result<Self> {
        let cache =
            DiskLruCache::open(&options.directory, options.app_version, 1, options.max_size)?;
        Ok(Self { cache })
    }

    /// Underlying engine
    pub fn cache(&self) -> &DiskLruCache {
        &self.cache
    }

    /// Reader over the stored value of `key`
    pub fn input_stream(&self, key: &str) -> Option<File> {
        if key.is_empty() {
            return None;
        }

        match self.cache.get(key) {
            Ok(Some(snapshot)) => snapshot.into_input_streams().into_iter().next(),
            Ok(None) => {
                debug!(key, "no snapshot");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "get failed");
                None
            }
        }
    }

    /// Begin an edit of `key`
    ///
    /// `None` if the key is being edited already or the engine failed.
    pub fn editor(&self, key: &str) -> Option<Editor> {
        if key.is_empty() {
            return None;
        }

        match self.cache.edit(key) {
            Ok(editor) => editor,
            Err(e) => {
                warn!(key, error = %e, "edit failed");
                None
            }
        }
    }

    /// Remove `key`, returning whether anything was removed
    pub fn remove(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }

        self.cache.remove(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "remove failed");
            false
        })
    }

    /// Store `value` under `key`, returning whether it was committed
    pub fn put(&self, key: &str, value: &str) -> bool {
        self.put_bytes(key, value.as_bytes())
    }

    /// Store raw bytes under `key`, returning whether they were committed
    pub fn put_bytes(&self, key: &str, value: &[u8]) -> bool {
        let Some(editor) = self.editor(key) else {
            return false;
        };

        match write_value(editor, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "put failed");
                false
            }
        }
    }

    /// Stored value of `key` as a string
    pub fn get_string(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }

        let mut snapshot = match self.cache.get(key) {
            Ok(snapshot) => snapshot?,
            Err(e) => {
                warn!(key, error = %e, "get failed");
                return None;
            }
        };

        snapshot
            .read_to_string(0)
            .map_err(|e| warn!(key, error = %e, "read failed"))
            .ok()
    }

    /// Store `value` as JSON under `key`
    pub fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.put(key, &json),
            Err(e) => {
                warn!(key, error = %e, "serialize failed");
                false
            }
        }
    }

    /// Stored JSON value of `key`
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.get_string(key)?;
        if json.is_empty() {
            return None;
        }

        serde_json::from_str(&json)
            .map_err(|e| warn!(key, error = %e, "deserialize failed"))
            .ok()
    }

    /// Close the underlying cache
    pub fn close(&self) {
        if let Err(e) = self.cache.close() {
            warn!(error = %e, "close failed");
        }
    }
}

fn write_value(editor: Editor, value: &[u8]) -> dlcache::Result<()> {
    editor.set(0, value)?;
    editor.commit()
}
