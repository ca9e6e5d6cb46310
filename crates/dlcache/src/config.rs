//! Cache configuration

use crate::error::{Error, Result};
use crate::journal::JournalHeader;

/// Redundant journal records tolerated before the journal is rebuilt
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 2000;

/// Settings fixed for the lifetime of an open cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Written into the journal header; a different version invalidates the cache
    pub app_version: u32,
    /// Number of value slots per entry
    pub value_count: usize,
    /// Byte budget across all readable entries
    pub max_size: u64,
    /// Redundant records allowed before the journal is compacted
    pub compaction_threshold: usize,
}

impl CacheConfig {
    /// Configuration with the default compaction threshold
    pub fn new(app_version: u32, value_count: usize, max_size: u64) -> Self {
        Self {
            app_version,
            value_count,
            max_size,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }

    /// Override the compaction threshold
    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Reject settings the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::InvalidConfig("max_size must be positive".to_string()));
        }
        if self.value_count == 0 {
            return Err(Error::InvalidConfig(
                "value_count must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn header(&self) -> JournalHeader {
        JournalHeader {
            app_version: self.app_version,
            value_count: self.value_count,
        }
    }
}
