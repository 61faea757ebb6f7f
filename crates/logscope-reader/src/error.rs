use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while starting or running a line source
#[derive(Debug, Error)]
pub enum ReaderError {
    /// A file could not be opened (or positioned) when streaming started
    #[error("failed to tail file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A running source failed while reading
    #[error("failed reading from {origin}: {source}")]
    Read {
        origin: String,
        #[source]
        source: io::Error,
    },

    /// `start` was called twice
    #[error("reader has already been started")]
    AlreadyStarted,

    /// `start` was called after `close`
    #[error("reader has been closed")]
    Closed,
}

impl ReaderError {
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    pub fn read(origin: impl Into<String>, source: io::Error) -> Self {
        Self::Read {
            origin: origin.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;
