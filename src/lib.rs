//! Tailcache - filesystem-backed streaming cache
//!
//! A concurrent-safe map from string keys to byte streams persisted as
//! files. Each stream is written once while any number of readers consume it
//! concurrently; readers tail the growing file and block at end-of-data
//! until the writer appends more or closes.
//!
//! # Features
//!
//! - **One writer, many readers**: the first `get` of a key wins the writer;
//!   every other caller tails the stream through an independent reader
//! - **Streaming from the first byte**: readers start before the producer
//!   finishes and park on a broadcast latch at end-of-data
//! - **Crash-safe reload**: a new cache over the same directory re-registers
//!   every previously written entry as a read-only stream
//! - **Idle expiry**: a background reaper evicts entries unused past a
//!   configurable expiry, never touching streams with live handles
//! - **Pluggable storage**: disk-backed by default, with an in-memory
//!   filesystem double for deterministic tests

// Public API modules
pub mod prelude;
pub mod tailcache;

// Cache implementation modules
pub mod cache;

// Re-export the public API at the crate root for convenience
pub use cache::config::{CacheConfig, Clock};
pub use cache::error::CacheError;
pub use cache::filesystem::{DiskFs, FileSystem, MemFs, ReadHandle, WriteHandle};
pub use cache::reader::Reader;
pub use cache::writer::Writer;
pub use tailcache::{Cache, CacheBuilder};
