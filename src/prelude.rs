//! Tailcache prelude - convenient imports for users
//!
//! Everything needed to open a cache and stream data through it.

// Re-export the public API
pub use crate::tailcache::{Cache, CacheBuilder};

// Re-export essential supporting types
pub use crate::cache::config::{CacheConfig, Clock};
pub use crate::cache::error::CacheError;
pub use crate::cache::filesystem::{DiskFs, FileSystem, MemFs, ReadHandle, WriteHandle};
pub use crate::cache::reader::Reader;
pub use crate::cache::writer::Writer;

// Reader and Writer speak the standard I/O traits
pub use std::io::{Read, Write};
