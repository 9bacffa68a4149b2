//! One-writer many-reader stream over a single cache file
//!
//! The stream tracks every live handle in a shared cell; removal marks the
//! stream, wakes parked readers, and unlinks the file only once the count
//! drains to zero.

use std::sync::{Arc, Condvar, Mutex, OnceLock};

use crate::cache::error::CacheError;
use crate::cache::filesystem::FileSystem;
use crate::cache::latch::Latch;
use crate::cache::reader::Reader;
use crate::cache::writer::Writer;

#[derive(Debug, Default)]
struct HandleState {
    count: u64,
    removing: bool,
}

/// Live-handle accounting shared between a stream and the on-close hooks of
/// its writer and readers. Holding the count in one cell keeps the
/// back-reference free of ownership cycles.
#[derive(Debug, Default)]
pub(crate) struct Handles {
    state: Mutex<HandleState>,
    drained: Condvar,
}

impl Handles {
    /// Register one more live handle.
    ///
    /// The removing check and the increment share one critical section so no
    /// handle can slip in behind a removal mark.
    fn acquire(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock().unwrap();
        if state.removing {
            return Err(CacheError::Removing);
        }
        state.count += 1;
        Ok(())
    }

    /// Drop one live handle, waking a pending removal when the count hits
    /// zero.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.count = state.count.saturating_sub(1);
        if state.count == 0 {
            drop(state);
            self.drained.notify_all();
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().count > 0
    }

    /// Mark removal. Returns false when another caller already did.
    fn begin_removal(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        !std::mem::replace(&mut state.removing, true)
    }

    fn wait_drained(&self) {
        let mut state = self.state.lock().unwrap();
        while state.count > 0 {
            state = self.drained.wait(state).unwrap();
        }
    }
}

/// A named, append-once byte stream registered in the cache.
pub(crate) struct Stream {
    name: String,
    fs: Arc<dyn FileSystem>,
    latch: OnceLock<Arc<Latch>>,
    handles: Arc<Handles>,
}

impl Stream {
    /// A stream that has not produced anything yet. Reloaded entries use the
    /// same constructor and simply never gain a writer.
    pub(crate) fn new(name: String, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            name,
            fs,
            latch: OnceLock::new(),
            handles: Arc::new(Handles::default()),
        }
    }

    /// The path of the underlying file.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Whether any writer or reader handle is still live.
    pub(crate) fn is_open(&self) -> bool {
        self.handles.is_open()
    }

    pub(crate) fn size(&self) -> Result<u64, CacheError> {
        Ok(self.fs.size(&self.name)?)
    }

    /// Create the backing file (truncating any residue) and the stream's one
    /// writer. The writer is handed out by value exactly once; a second call
    /// fails with [`CacheError::WriterTaken`].
    pub(crate) fn create_writer(&self) -> Result<Writer, CacheError> {
        if self.latch.get().is_some() {
            return Err(CacheError::WriterTaken);
        }
        self.handles.acquire()?;
        let file = match self.fs.create(&self.name) {
            Ok(file) => file,
            Err(err) => {
                self.handles.release();
                return Err(err.into());
            }
        };
        let latch = Arc::new(Latch::new());
        if self.latch.set(Arc::clone(&latch)).is_err() {
            // Lost a race for the single writer slot.
            self.handles.release();
            let mut file = file;
            let _ = file.close();
            return Err(CacheError::WriterTaken);
        }
        Ok(Writer::new(file, latch, Arc::clone(&self.handles)))
    }

    /// Open an independent reader over the current contents.
    ///
    /// Fails with [`CacheError::Removing`] once removal has begun.
    pub(crate) fn next_reader(&self) -> Result<Reader, CacheError> {
        self.handles.acquire()?;
        let file = match self.fs.open(&self.name) {
            Ok(file) => file,
            Err(err) => {
                self.handles.release();
                return Err(err.into());
            }
        };
        let latch = self.latch.get().map(Arc::clone);
        Ok(Reader::new(file, latch, Arc::clone(&self.handles)))
    }

    /// Mark the stream removing, wake parked readers, block until every
    /// handle is closed, then unlink the file. A concurrent second removal
    /// is a no-op.
    pub(crate) fn remove(&self) -> Result<(), CacheError> {
        if !self.handles.begin_removal() {
            return Ok(());
        }
        if let Some(latch) = self.latch.get() {
            latch.cancel();
        }
        self.handles.wait_drained();
        self.fs.remove(&self.name)?;
        Ok(())
    }
}
