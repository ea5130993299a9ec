//! Error taxonomy for the collective and independent I/O paths.
//!
//! Internal invariant violations (for example an aggregator index that
//! falls outside the domain table) are programming errors and panic;
//! everything user- or system-triggered is reported through [`Error`].

use thiserror::Error;

/// Errors reported by the I/O engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, detected before any I/O is issued.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unsupported or malformed datatype description.
    #[error("invalid datatype: {0}")]
    Type(String),

    /// An underlying read, write, lock or size syscall failed.
    #[error("I/O error at offset {offset}: {source}")]
    Io {
        /// File byte offset of the failed access.
        offset: i64,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The communication substrate failed (peer disconnected, short
    /// message).
    #[error("communication error: {0}")]
    Comm(String),

    /// Another rank reported an I/O failure through the round size
    /// exchange; this rank aborted the collective call before posting
    /// further rounds.
    #[error("a peer rank failed during a collective I/O round")]
    PeerFailure,
}

impl Error {
    /// Wrap an OS error observed at a file offset.
    pub fn io(offset: i64, source: std::io::Error) -> Self {
        Self::Io { offset, source }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
