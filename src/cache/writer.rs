//! Write side of a cache stream
//!
//! The writer owns its file handle exclusively, so the type system enforces
//! the one-producer rule; every successful append publishes the new size
//! through the latch and wakes tailing readers.

use std::io::{self, Write};
use std::sync::Arc;

use crate::cache::error::CacheError;
use crate::cache::filesystem::WriteHandle;
use crate::cache::latch::Latch;
use crate::cache::stream::Handles;

/// Exclusive producer for one stream.
///
/// Bytes written become visible to readers in write order. Dropping an
/// unclosed writer seals the stream the same way [`Writer::close`] does.
pub struct Writer {
    file: Box<dyn WriteHandle>,
    latch: Arc<Latch>,
    handles: Arc<Handles>,
}

impl Writer {
    pub(crate) fn new(file: Box<dyn WriteHandle>, latch: Arc<Latch>, handles: Arc<Handles>) -> Self {
        Self {
            file,
            latch,
            handles,
        }
    }

    /// The path this writer appends to.
    pub fn name(&self) -> &str {
        self.file.name()
    }

    /// Bytes published to readers so far.
    pub fn size(&self) -> u64 {
        self.latch.size()
    }

    /// Seal the stream.
    ///
    /// Tailing readers drain whatever was written and then observe
    /// end-of-file. The second close fails with
    /// [`CacheError::AlreadyClosed`].
    pub fn close(&mut self) -> Result<(), CacheError> {
        self.latch.close()?;
        self.handles.release();
        self.file.close()?;
        Ok(())
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.latch.advance(n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        // close() already ran if the latch refuses a second close.
        if self.latch.close().is_ok() {
            self.handles.release();
            let _ = self.file.close();
        }
    }
}
