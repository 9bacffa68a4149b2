//! Key→stream registry
//!
//! Holds the digest-keyed stream map behind a sharded concurrent map. The
//! per-shard entry lock gives `get` its miss-path atomicity: at most one
//! caller ever receives the writer for a key.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, error, warn};

use crate::cache::config::Clock;
use crate::cache::error::CacheError;
use crate::cache::filesystem::FileSystem;
use crate::cache::reader::Reader;
use crate::cache::stream::Stream;
use crate::cache::writer::Writer;

/// On-disk name for a user key: fixed-width lowercase hex MD5. A stable
/// encoding that is safe on case-insensitive filesystems, not a security
/// property.
fn file_name(key: &str) -> String {
    format!("{:x}", md5::compute(key.as_bytes()))
}

pub(crate) struct Registry {
    streams: DashMap<String, Arc<Stream>>,
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    clock: Clock,
}

impl Registry {
    /// Build a registry over `fs`, reloading whatever the root already
    /// holds.
    pub(crate) fn new(
        root: PathBuf,
        fs: Arc<dyn FileSystem>,
        clock: Clock,
    ) -> Result<Self, CacheError> {
        let registry = Self {
            streams: DashMap::new(),
            fs,
            root,
            clock,
        };
        registry.load()?;
        Ok(registry)
    }

    fn path_of(&self, key: &str) -> String {
        self.root.join(key).to_string_lossy().into_owned()
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    /// Access the stream for `name`.
    ///
    /// A hit returns a fresh reader only. A miss creates the stream and its
    /// writer and returns both; losers of a concurrent miss race land on the
    /// hit path and receive only readers.
    pub(crate) fn get(&self, name: &str) -> Result<(Reader, Option<Writer>), CacheError> {
        let key = file_name(name);
        if let Some(stream) = self.streams.get(&key).map(|e| Arc::clone(e.value())) {
            let reader = stream.next_reader()?;
            return Ok((reader, None));
        }

        let path = self.path_of(&key);
        let stream = match self.streams.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let stream = Arc::new(Stream::new(path, Arc::clone(&self.fs)));
                let mut writer = stream.create_writer()?;
                let reader = match stream.next_reader() {
                    Ok(reader) => reader,
                    Err(err) => {
                        // Unwind the half-built entry before reporting.
                        if let Err(close_err) = writer.close() {
                            warn!("get: closing unstarted writer: {}", close_err);
                        }
                        if let Err(remove_err) = stream.remove() {
                            warn!("get: removing unstarted stream: {}", remove_err);
                        }
                        return Err(err);
                    }
                };
                entry.insert(Arc::clone(&stream));
                return Ok((reader, Some(writer)));
            }
        };
        let reader = stream.next_reader()?;
        Ok((reader, None))
    }

    /// Registry lookup only; never touches the filesystem.
    pub(crate) fn exists(&self, name: &str) -> bool {
        self.streams.contains_key(&file_name(name))
    }

    /// Size of the stream on disk.
    pub(crate) fn size(&self, name: &str) -> Result<u64, CacheError> {
        match self.streams.get(&file_name(name)) {
            Some(entry) => entry.value().size(),
            None => Err(CacheError::NotFound),
        }
    }

    /// Detach `name` and tear its stream down, blocking until every live
    /// handle is closed. Unknown keys are a no-op.
    pub(crate) fn remove(&self, name: &str) -> Result<(), CacheError> {
        match self.streams.remove(&file_name(name)) {
            Some((_, stream)) => stream.remove(),
            None => Ok(()),
        }
    }

    /// Drop every entry and the root itself. Callers guarantee no stream is
    /// in use.
    pub(crate) fn clean(&self) -> Result<(), CacheError> {
        self.streams.clear();
        self.fs.purge()?;
        Ok(())
    }

    /// Register historical streams for whatever the root already contains.
    /// The file name is its own key; nothing of the original user key is
    /// recoverable, or needed.
    fn load(&self) -> Result<(), CacheError> {
        let mut entries = Vec::new();
        self.fs.reload(&mut |name| entries.push(name.to_string()))?;

        for name in entries {
            let Some(key) = Path::new(&name)
                .file_name()
                .and_then(|base| base.to_str())
                .map(|base| base.to_ascii_lowercase())
            else {
                warn!("load: skipping undecodable entry {:?}", name);
                continue;
            };

            match self.streams.entry(key) {
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Stream::new(name, Arc::clone(&self.fs))));
                }
                Entry::Occupied(mut entry) => {
                    // Same digest twice (tampering or a crash mid-rename on a
                    // case-insensitive filesystem): keep the newer file.
                    let incumbent = Arc::clone(entry.get());
                    if self.modified(&name) > self.modified(incumbent.name()) {
                        self.discard(incumbent.name());
                        entry.insert(Arc::new(Stream::new(name, Arc::clone(&self.fs))));
                    } else {
                        self.discard(&name);
                    }
                }
            }
        }
        debug!("load: registered {} entries", self.streams.len());
        Ok(())
    }

    fn modified(&self, name: &str) -> Option<SystemTime> {
        match self.fs.access_times(name) {
            Ok((_, write_time)) => Some(write_time),
            Err(err) => {
                warn!("load: access times for {}: {}", name, err);
                None
            }
        }
    }

    fn discard(&self, name: &str) {
        if let Err(err) = self.fs.remove(name) {
            warn!("load: discarding duplicate {}: {}", name, err);
        }
    }

    /// One eviction pass: drop every stream with no live handles whose last
    /// read is older than `expiry`. Filesystem errors are logged and the
    /// pass continues.
    pub(crate) fn reap(&self, expiry: Duration) {
        let now = (self.clock)();
        let Some(cutoff) = now.checked_sub(expiry) else {
            return;
        };

        let mut victims = Vec::new();
        for entry in self.streams.iter() {
            let stream = entry.value();
            if stream.is_open() {
                continue;
            }
            let last_read = match self.fs.access_times(stream.name()) {
                Ok((read_time, _)) => read_time,
                Err(err) => {
                    error!("reap: access times for {}: {}", stream.name(), err);
                    continue;
                }
            };
            if last_read < cutoff {
                victims.push(entry.key().clone());
            }
        }

        for key in victims {
            // Re-check in-use atomically with the detach; a reader may have
            // attached since the scan.
            let Some((_, stream)) = self.streams.remove_if(&key, |_, s| !s.is_open()) else {
                continue;
            };
            debug!("reap: evicting idle stream {}", key);
            if let Err(err) = stream.remove() {
                error!("reap: removing {}: {}", key, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::system_clock;
    use crate::cache::filesystem::MemFs;
    use std::io::{Read as _, Write as _};
    use std::sync::Mutex;
    use std::thread;

    fn mem_registry() -> (Arc<MemFs>, Registry) {
        let fs = Arc::new(MemFs::new());
        let registry = Registry::new(
            PathBuf::from("cache"),
            Arc::clone(&fs) as Arc<dyn FileSystem>,
            system_clock(),
        )
        .unwrap();
        (fs, registry)
    }

    fn manual_clock(start: SystemTime) -> (Arc<Mutex<SystemTime>>, Clock) {
        let now = Arc::new(Mutex::new(start));
        let source = Arc::clone(&now);
        (now, Arc::new(move || *source.lock().unwrap()))
    }

    #[test]
    fn digest_is_fixed_width_lowercase_hex() {
        let digest = file_name("looong");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(digest, file_name("looong"));
        assert_ne!(digest, file_name("other"));
    }

    #[test]
    fn miss_returns_writer_and_hit_does_not() {
        let (_fs, registry) = mem_registry();

        let (reader, writer) = registry.get("key").unwrap();
        let mut writer = writer.expect("first get should win the writer");
        writer.write_all(b"payload").unwrap();
        writer.close().unwrap();
        reader.close().unwrap();

        let (mut reader, writer) = registry.get("key").unwrap();
        assert!(writer.is_none());
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"payload");
    }

    #[test]
    fn concurrent_misses_elect_exactly_one_writer() {
        let (_fs, registry) = mem_registry();
        let registry = Arc::new(registry);

        let mut workers = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            workers.push(thread::spawn(move || {
                let (reader, writer) = registry.get("contended").unwrap();
                let got_writer = writer.is_some();
                if let Some(mut writer) = writer {
                    writer.write_all(b"winner").unwrap();
                    writer.close().unwrap();
                }
                let mut buf = Vec::new();
                let mut reader = reader;
                reader.read_to_end(&mut buf).unwrap();
                assert_eq!(buf, b"winner");
                got_writer
            }));
        }

        let winners = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn size_of_unknown_key_is_not_found() {
        let (_fs, registry) = mem_registry();
        assert!(matches!(registry.size("dankmemes"), Err(CacheError::NotFound)));

        let (reader, writer) = registry.get("dankmemes").unwrap();
        let mut writer = writer.unwrap();
        writer.write_all(b"leroy jenkins").unwrap();
        writer.close().unwrap();
        assert_eq!(registry.size("dankmemes").unwrap(), 13);
        reader.close().unwrap();
    }

    #[test]
    fn remove_on_unknown_key_is_a_noop() {
        let (_fs, registry) = mem_registry();
        registry.remove("never inserted").unwrap();
    }

    #[test]
    fn remove_then_get_starts_a_fresh_stream() {
        let (_fs, registry) = mem_registry();

        let (reader, writer) = registry.get("key").unwrap();
        let mut writer = writer.unwrap();
        writer.write_all(b"old").unwrap();
        writer.close().unwrap();
        reader.close().unwrap();
        registry.remove("key").unwrap();
        assert!(!registry.exists("key"));

        let (reader, writer) = registry.get("key").unwrap();
        assert!(writer.is_some(), "fresh stream after removal gets a writer");
        let mut writer = writer.unwrap();
        writer.write_all(b"new").unwrap();
        writer.close().unwrap();
        let mut buf = Vec::new();
        let mut reader = reader;
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"new");
    }

    #[test]
    fn load_registers_existing_files_as_historical() {
        let fs = Arc::new(MemFs::new());
        let key = file_name("test");
        let path = PathBuf::from("cache").join(&key);
        fs.create(&path.to_string_lossy())
            .unwrap()
            .write_all(b"reloaded")
            .unwrap();

        let registry = Registry::new(
            PathBuf::from("cache"),
            Arc::clone(&fs) as Arc<dyn FileSystem>,
            system_clock(),
        )
        .unwrap();

        assert!(registry.exists("test"));
        let (mut reader, writer) = registry.get("test").unwrap();
        assert!(writer.is_none(), "historical entries never hand out writers");
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"reloaded");
    }

    #[test]
    fn load_keeps_the_newer_of_two_case_folded_duplicates() {
        let (now, clock) = manual_clock(SystemTime::UNIX_EPOCH);
        let fs = Arc::new(MemFs::with_clock(Arc::clone(&clock)));

        let key = file_name("dup");
        let older = PathBuf::from("cache").join(key.to_ascii_uppercase());
        let newer = PathBuf::from("cache").join(&key);
        fs.create(&older.to_string_lossy())
            .unwrap()
            .write_all(b"old")
            .unwrap();
        *now.lock().unwrap() = SystemTime::UNIX_EPOCH + Duration::from_secs(60);
        fs.create(&newer.to_string_lossy())
            .unwrap()
            .write_all(b"new")
            .unwrap();

        let registry = Registry::new(
            PathBuf::from("cache"),
            Arc::clone(&fs) as Arc<dyn FileSystem>,
            clock,
        )
        .unwrap();

        assert!(registry.exists("dup"));
        assert_eq!(registry.len(), 1);
        let (mut reader, _) = registry.get("dup").unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"new");
        // The loser was unlinked.
        assert!(fs.size(&older.to_string_lossy()).is_err() || fs.size(&newer.to_string_lossy()).is_err());
    }

    #[test]
    fn clean_empties_the_registry_and_the_root() {
        let (fs, registry) = mem_registry();
        let (reader, writer) = registry.get("key").unwrap();
        let mut writer = writer.unwrap();
        writer.write_all(b"x").unwrap();
        writer.close().unwrap();
        reader.close().unwrap();

        registry.clean().unwrap();
        assert!(!registry.exists("key"));
        let mut names = Vec::new();
        fs.reload(&mut |name| names.push(name.to_string())).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn reap_evicts_idle_entries_but_never_live_ones() {
        let (now, clock) = manual_clock(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
        let fs = Arc::new(MemFs::with_clock(Arc::clone(&clock)));
        let registry = Registry::new(
            PathBuf::from("cache"),
            Arc::clone(&fs) as Arc<dyn FileSystem>,
            Arc::clone(&clock),
        )
        .unwrap();

        let expiry = Duration::from_secs(1);
        let (mut reader, writer) = registry.get("stream").unwrap();
        let mut writer = writer.unwrap();
        writer.write_all(b"hello").unwrap();
        writer.close().unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");

        registry.reap(expiry);
        assert!(registry.exists("stream"), "fresh entry must survive");

        // Two seconds later the entry is expired but still held open.
        *now.lock().unwrap() += Duration::from_secs(2);
        registry.reap(expiry);
        assert!(registry.exists("stream"), "in-use entry must never be reaped");
        reader.close().unwrap();

        *now.lock().unwrap() += Duration::from_secs(2);
        registry.reap(expiry);
        assert!(!registry.exists("stream"));

        let mut names = Vec::new();
        fs.reload(&mut |name| names.push(name.to_string())).unwrap();
        assert!(names.is_empty(), "reaped file must be unlinked");
    }

    #[test]
    fn reap_with_zero_expiry_spares_in_use_streams() {
        let (now, clock) = manual_clock(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
        let fs = Arc::new(MemFs::with_clock(Arc::clone(&clock)));
        let registry = Registry::new(
            PathBuf::from("cache"),
            Arc::clone(&fs) as Arc<dyn FileSystem>,
            Arc::clone(&clock),
        )
        .unwrap();

        let (reader, writer) = registry.get("stream").unwrap();
        let mut writer = writer.unwrap();
        writer.write_all(b"hello").unwrap();
        writer.close().unwrap();

        *now.lock().unwrap() += Duration::from_secs(3600 * 24 * 365);
        registry.reap(Duration::ZERO);
        assert!(registry.exists("stream"));
        reader.close().unwrap();
    }

    #[test]
    fn remove_while_a_reader_is_parked_releases_it() {
        let (_fs, registry) = mem_registry();
        let registry = Arc::new(registry);

        let (mut reader, writer) = registry.get("s").unwrap();
        let mut writer = writer.unwrap();

        let parked = thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).unwrap()
        });

        thread::sleep(std::time::Duration::from_millis(20));
        let remover = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.remove("s"))
        };

        // The parked reader must come back (end-of-file), not hang.
        assert_eq!(parked.join().unwrap(), 0);
        writer.close().unwrap();
        remover.join().unwrap().unwrap();
        assert!(!registry.exists("s"));
    }
}
