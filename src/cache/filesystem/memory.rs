//! In-memory filesystem double
//!
//! Carries the same observable contract as the disk implementation,
//! including truncate-on-create and positional reads that ignore the
//! sequential cursor. Access times come from an injected clock so expiry
//! tests are deterministic.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use dashmap::DashMap;

use super::{FileSystem, ReadHandle, WriteHandle};
use crate::cache::config::{Clock, system_clock};

/// In-memory [`FileSystem`] keyed by file name.
pub struct MemFs {
    files: DashMap<String, Arc<MemFile>>,
    clock: Clock,
}

struct MemFile {
    data: Mutex<Vec<u8>>,
    // (last read, last write)
    times: Mutex<(SystemTime, SystemTime)>,
}

impl MemFile {
    fn touch_read(&self, now: SystemTime) {
        self.times.lock().unwrap().0 = now;
    }

    fn touch_write(&self, now: SystemTime) {
        self.times.lock().unwrap().1 = now;
    }
}

fn not_found() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "no such cache file")
}

impl MemFs {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// A filesystem whose access times are stamped by `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            files: DashMap::new(),
            clock,
        }
    }

    fn lookup(&self, name: &str) -> io::Result<Arc<MemFile>> {
        self.files
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(not_found)
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFs {
    fn create(&self, name: &str) -> io::Result<Box<dyn WriteHandle>> {
        let now = (self.clock)();
        let file = Arc::clone(
            &self
                .files
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(MemFile {
                        data: Mutex::new(Vec::new()),
                        times: Mutex::new((now, now)),
                    })
                }),
        );
        file.data.lock().unwrap().clear();
        file.touch_write(now);
        Ok(Box::new(MemWriteHandle {
            name: name.to_string(),
            file,
            clock: Arc::clone(&self.clock),
            open: true,
        }))
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn ReadHandle>> {
        let file = self.lookup(name)?;
        Ok(Box::new(MemReadHandle {
            name: name.to_string(),
            file,
            clock: Arc::clone(&self.clock),
            pos: 0,
            open: true,
        }))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.files.remove(name).map(|_| ()).ok_or_else(not_found)
    }

    fn access_times(&self, name: &str) -> io::Result<(SystemTime, SystemTime)> {
        let file = self.lookup(name)?;
        let times = *file.times.lock().unwrap();
        Ok(times)
    }

    fn size(&self, name: &str) -> io::Result<u64> {
        let file = self.lookup(name)?;
        let len = file.data.lock().unwrap().len() as u64;
        Ok(len)
    }

    fn reload(&self, each: &mut dyn FnMut(&str)) -> io::Result<()> {
        // Snapshot the names first so the callback may touch the map.
        let names: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();
        for name in names {
            each(&name);
        }
        Ok(())
    }

    fn purge(&self) -> io::Result<()> {
        self.files.clear();
        Ok(())
    }
}

struct MemWriteHandle {
    name: String,
    file: Arc<MemFile>,
    clock: Clock,
    open: bool,
}

impl Write for MemWriteHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::other("write on closed handle"));
        }
        self.file.data.lock().unwrap().extend_from_slice(buf);
        self.file.touch_write((self.clock)());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteHandle for MemWriteHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }
}

struct MemReadHandle {
    name: String,
    file: Arc<MemFile>,
    clock: Clock,
    pos: u64,
    open: bool,
}

impl MemReadHandle {
    fn read_from(&self, buf: &mut [u8], off: u64) -> usize {
        let data = self.file.data.lock().unwrap();
        let start = (off.min(data.len() as u64)) as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        drop(data);
        self.file.touch_read((self.clock)());
        n
    }
}

impl Read for MemReadHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::other("read on closed handle"));
        }
        let n = self.read_from(buf, self.pos);
        self.pos += n as u64;
        Ok(n)
    }
}

impl ReadHandle for MemReadHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::other("read on closed handle"));
        }
        Ok(self.read_from(buf, off))
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }
}
