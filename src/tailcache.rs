//! Public cache API
//!
//! A thin facade over the internal registry: construction wires the
//! filesystem, reloads prior contents, and starts the reaper; the operation
//! surface forwards to the registry. Dropping the cache stops the reaper.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::cache::config::{CacheConfig, Clock, system_clock};
use crate::cache::error::CacheError;
use crate::cache::filesystem::{DiskFs, FileSystem};
use crate::cache::reader::Reader;
use crate::cache::reaper::Reaper;
use crate::cache::registry::Registry;
use crate::cache::writer::Writer;

/// Concurrent-safe map from string keys to byte streams persisted as files.
///
/// `get` on a missing key hands the caller the stream's one [`Writer`]
/// together with a [`Reader`]; every other `get` for that key returns only a
/// fresh reader, which tails the growing file and blocks at end-of-data
/// until the writer appends more or closes. Entries survive restarts: a new
/// cache over the same directory reloads them as read-only streams.
pub struct Cache {
    registry: Arc<Registry>,
    // Held for its Drop; stops the eviction thread with the cache.
    _reaper: Option<Reaper>,
}

impl Cache {
    /// Open a disk-backed cache rooted at `dir`, creating the directory with
    /// `mode` if missing. Entries idle past `expiry` are evicted in the
    /// background; a zero `expiry` keeps them forever.
    pub fn new(
        dir: impl Into<PathBuf>,
        mode: u32,
        expiry: Duration,
    ) -> Result<Self, CacheError> {
        let mut config = CacheConfig::new(dir);
        config.mode = mode;
        config.expiry = expiry;
        CacheBuilder::from_config(config).build()
    }

    /// Start configuring a cache rooted at `dir`.
    pub fn builder(dir: impl Into<PathBuf>) -> CacheBuilder {
        CacheBuilder::from_config(CacheConfig::new(dir))
    }

    /// Access the stream for `name`.
    ///
    /// On a miss the second element carries the writer; on a hit it is
    /// `None`. The reader is always live on success and must be closed (or
    /// dropped) for the entry to become removable.
    pub fn get(&self, name: &str) -> Result<(Reader, Option<Writer>), CacheError> {
        self.registry.get(name)
    }

    /// Whether `name` is registered. Never touches the filesystem.
    pub fn exists(&self, name: &str) -> bool {
        self.registry.exists(name)
    }

    /// Size of the stream on disk, or [`CacheError::NotFound`].
    pub fn size(&self, name: &str) -> Result<u64, CacheError> {
        self.registry.size(name)
    }

    /// Delete `name`, blocking until every live handle on it is closed.
    /// Unknown keys are a no-op. Safe to call concurrently with `get`.
    pub fn remove(&self, name: &str) -> Result<(), CacheError> {
        self.registry.remove(name)
    }

    /// Drop every entry and delete the cache root. Not safe to call while
    /// streams are being read or written.
    pub fn clean(&self) -> Result<(), CacheError> {
        self.registry.clean()
    }
}

/// Configures and opens a [`Cache`].
pub struct CacheBuilder {
    config: CacheConfig,
    clock: Clock,
    filesystem: Option<Arc<dyn FileSystem>>,
}

impl CacheBuilder {
    /// Builder seeded from an existing configuration.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            clock: system_clock(),
            filesystem: None,
        }
    }

    /// Unix mode for creating the cache root.
    pub fn mode(mut self, mode: u32) -> Self {
        self.config.mode = mode;
        self
    }

    /// Idle duration after which an unused entry is evicted. Zero never
    /// expires.
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.config.expiry = expiry;
        self
    }

    /// Cadence of eviction passes. Defaults to the expiry; zero disables
    /// the reaper.
    pub fn period(mut self, period: Duration) -> Self {
        self.config.period = Some(period);
        self
    }

    /// Source of "now" for expiry decisions.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Back the cache with a custom filesystem instead of the disk.
    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.filesystem = Some(fs);
        self
    }

    /// Open the cache: wire the filesystem, reload prior contents, start
    /// the reaper.
    pub fn build(self) -> Result<Cache, CacheError> {
        let CacheBuilder {
            config,
            clock,
            filesystem,
        } = self;

        let fs: Arc<dyn FileSystem> = match filesystem {
            Some(fs) => fs,
            None => Arc::new(DiskFs::new(&config.dir, config.mode)?),
        };
        let registry = Arc::new(Registry::new(config.dir.clone(), fs, clock)?);
        info!(
            "cache opened at {} ({} reloaded entries)",
            config.dir.display(),
            registry.len()
        );

        let period = config.effective_period();
        let reaper = if period.is_zero() {
            debug!("reaper disabled");
            None
        } else {
            Some(Reaper::spawn(
                Arc::clone(&registry),
                config.expiry,
                period,
            )?)
        };

        Ok(Cache {
            registry,
            _reaper: reaper,
        })
    }
}
