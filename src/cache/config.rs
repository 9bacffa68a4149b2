//! Cache configuration
//!
//! Plain data tunables plus the clock injection point the reaper and the
//! in-memory filesystem use for deterministic expiry decisions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Source of "now" for expiry decisions and access-time stamps. Injected per
/// cache so tests can pin time.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// The wall clock.
pub(crate) fn system_clock() -> Clock {
    Arc::new(SystemTime::now)
}

/// Tunables for one cache instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory holding one file per key digest.
    pub dir: PathBuf,
    /// Unix mode used when creating the root directory.
    pub mode: u32,
    /// Idle duration after which an unused entry is evicted. Zero keeps
    /// entries forever.
    pub expiry: Duration,
    /// Cadence of eviction passes; falls back to `expiry` when unset. Zero
    /// disables the reaper.
    pub period: Option<Duration>,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            mode: 0o700,
            expiry: Duration::ZERO,
            period: None,
        }
    }

    /// The effective cadence of eviction passes.
    pub fn effective_period(&self) -> Duration {
        self.period.unwrap_or(self.expiry)
    }
}
