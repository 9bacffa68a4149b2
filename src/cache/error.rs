//! Error type shared by every cache operation
//!
//! One enum covers registry lookups, stream lifecycle violations, and
//! underlying filesystem failures, which are surfaced verbatim.

use std::fmt;
use std::io;

/// Errors returned by cache, stream, and handle operations.
#[derive(Debug)]
pub enum CacheError {
    /// The key is not registered in the cache.
    NotFound,
    /// A new reader was requested on a stream that is being removed.
    Removing,
    /// The writer was closed a second time.
    AlreadyClosed,
    /// A second writer was requested for the same stream.
    WriterTaken,
    /// Underlying filesystem failure.
    Io(io::Error),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::NotFound => write!(f, "key not found in cache"),
            CacheError::Removing => {
                write!(f, "cannot open a new reader while removing the stream")
            }
            CacheError::AlreadyClosed => write!(f, "stream already closed"),
            CacheError::WriterTaken => write!(f, "stream writer already created"),
            CacheError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl CacheError {
    /// True when the error is a lifecycle rejection rather than an I/O
    /// failure.
    #[inline(always)]
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, CacheError::Io(_))
    }
}
