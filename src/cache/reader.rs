//! Read side of a cache stream
//!
//! Each reader owns an independent file handle and cursor, so readers never
//! observe each other. End-of-file on a still-open stream is not terminal:
//! it parks the reader on the latch until the writer appends or closes.

use std::io::{self, Read};
use std::sync::Arc;

use crate::cache::error::CacheError;
use crate::cache::filesystem::ReadHandle;
use crate::cache::latch::Latch;
use crate::cache::stream::Handles;

/// Consumer of one stream.
///
/// `read` follows a private cursor; [`Reader::read_at`] serves any offset
/// without disturbing it. Both block while the requested region is still
/// unwritten on an open stream, and return `Ok(0)` once the stream is sealed
/// and fully consumed. A reader over a reloaded (historical) entry has no
/// producer to wait on and reads the file verbatim.
pub struct Reader {
    file: Box<dyn ReadHandle>,
    latch: Option<Arc<Latch>>,
    handles: Arc<Handles>,
    pos: u64,
    released: bool,
}

impl Reader {
    pub(crate) fn new(
        file: Box<dyn ReadHandle>,
        latch: Option<Arc<Latch>>,
        handles: Arc<Handles>,
    ) -> Self {
        Self {
            file,
            latch,
            handles,
            pos: 0,
            released: false,
        }
    }

    /// The path this reader consumes.
    pub fn name(&self) -> &str {
        self.file.name()
    }

    /// Read into `buf` starting at absolute offset `off`.
    ///
    /// Blocks while `off` is past the published size of an open stream;
    /// never touches the sequential cursor.
    pub fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        let Some(latch) = &self.latch else {
            return self.file.read_at(buf, off);
        };
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.file.read_at(buf, off)?;
            if n > 0 {
                return Ok(n);
            }
            let (available, open) = latch.wait(off);
            if available == 0 && !open {
                return Ok(0);
            }
        }
    }

    /// Release this reader. The stream cannot be fully removed while any
    /// reader is still open; readers are also closed on drop.
    pub fn close(mut self) -> Result<(), CacheError> {
        self.shutdown()?;
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.handles.release();
        self.file.close()
    }
}

impl Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(latch) = self.latch.clone() else {
            return self.file.read(buf);
        };
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.file.read(buf)?;
            if n > 0 {
                self.pos += n as u64;
                return Ok(n);
            }
            let (available, open) = latch.wait(self.pos);
            if available == 0 && !open {
                return Ok(0);
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
