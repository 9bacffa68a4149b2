//! Disk-backed filesystem rooted at the cache directory

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::debug;

use super::{FileSystem, ReadHandle, WriteHandle};

/// [`FileSystem`] implementation over a real directory.
///
/// The root is created recursively at construction with the caller-supplied
/// Unix mode; opening an existing root is idempotent.
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    /// Open a filesystem rooted at `dir`, creating it with `mode` if needed.
    pub fn new(dir: impl AsRef<Path>, mode: u32) -> io::Result<Self> {
        let root = dir.as_ref().to_path_buf();
        create_root(&root, mode)?;
        Ok(Self { root })
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(unix)]
fn create_root(root: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(root)
}

#[cfg(not(unix))]
fn create_root(root: &Path, _mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().recursive(true).create(root)
}

impl FileSystem for DiskFs {
    fn create(&self, name: &str) -> io::Result<Box<dyn WriteHandle>> {
        let file = File::create(name)?;
        Ok(Box::new(DiskWriteHandle {
            name: name.to_string(),
            file: Some(file),
        }))
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn ReadHandle>> {
        let file = File::open(name)?;
        Ok(Box::new(DiskReadHandle {
            name: name.to_string(),
            file: Some(file),
        }))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(name)
    }

    fn access_times(&self, name: &str) -> io::Result<(SystemTime, SystemTime)> {
        let meta = fs::metadata(name)?;
        let wt = meta.modified()?;
        // noatime mounts and exotic platforms may not carry a read time.
        let rt = meta.accessed().unwrap_or(wt);
        Ok((rt, wt))
    }

    fn size(&self, name: &str) -> io::Result<u64> {
        Ok(fs::metadata(name)?.len())
    }

    fn reload(&self, each: &mut dyn FnMut(&str)) -> io::Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                debug!("reload: skipping non-file entry {:?}", entry.path());
                continue;
            }
            each(&entry.path().to_string_lossy());
        }
        Ok(())
    }

    fn purge(&self) -> io::Result<()> {
        fs::remove_dir_all(&self.root)
    }
}

struct DiskWriteHandle {
    name: String,
    file: Option<File>,
}

impl Write for DiskWriteHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("write on closed handle")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl WriteHandle for DiskWriteHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

struct DiskReadHandle {
    name: String,
    file: Option<File>,
}

impl DiskReadHandle {
    fn file(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::other("read on closed handle"))
    }
}

impl Read for DiskReadHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(io::Error::other("read on closed handle")),
        }
    }
}

impl ReadHandle for DiskReadHandle {
    fn name(&self) -> &str {
        &self.name
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file()?.read_at(buf, off)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        match self.file()?.seek_read(buf, off) {
            Ok(n) => Ok(n),
            // seek_read reports reads past end-of-file as an error; the
            // contract wants a zero-length read.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }
}
