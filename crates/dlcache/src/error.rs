//! Error types for dlcache

use std::io;

use thiserror::Error;

/// Result type alias for dlcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
///
/// Edit conflicts (an edit already in progress, a stale snapshot) are not
/// errors; those calls return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Rejected configuration at open
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Journal could not be replayed
    #[error("Corrupt journal: {0}")]
    Corrupt(String),

    /// Cache is closed
    #[error("Cache is closed")]
    Closed,

    /// Key is empty or contains whitespace or a path separator
    #[error("Keys must not be empty or contain whitespace or path separators: {0:?}")]
    InvalidKey(String),

    /// Slot index out of range for the configured value count
    #[error("Slot index {index} out of range (value count {value_count})")]
    InvalidSlot {
        /// Requested slot
        index: usize,
        /// Configured value count
        value_count: usize,
    },

    /// First commit of an entry did not write every slot
    #[error("Edit of {key:?} didn't create a value for slot {index}")]
    MissingSlot {
        /// Entry key
        key: String,
        /// First slot without a staged value
        index: usize,
    },

    /// Editor is no longer the entry's current editor
    #[error("Editor for {0:?} is no longer active")]
    StaleEditor(String),
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        Error::Corrupt(format!("{:?}", err))
    }
}
