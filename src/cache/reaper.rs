//! Periodic eviction of idle streams
//!
//! One named thread drives eviction passes off a crossbeam ticker; dropping
//! the handle disconnects the shutdown channel, which the select loop treats
//! as an orderly stop.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};
use log::debug;

use crate::cache::registry::Registry;

/// Handle to the background eviction thread.
pub(crate) struct Reaper {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Start an eviction pass over `registry` every `period`, removing
    /// entries idle for longer than `expiry`.
    pub(crate) fn spawn(
        registry: Arc<Registry>,
        expiry: Duration,
        period: Duration,
    ) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("tailcache-reaper".to_string())
            .spawn(move || {
                debug!("reaper started (expiry {:?}, period {:?})", expiry, period);
                let ticker = tick(period);
                loop {
                    select! {
                        recv(ticker) -> _ => registry.reap(expiry),
                        // Fires on an explicit stop and when the cache is
                        // dropped (sender disconnect).
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("reaper stopped");
            })?;
        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}
