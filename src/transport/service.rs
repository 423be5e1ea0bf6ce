//! # File Service
//!
//! A method dispatcher that serves the data streams of MetaSpace files kept
//! under one root directory, and the client that calls it.
//!
//! ## Methods
//!
//! | Method       | Request                                  | Reply                     |
//! |--------------|------------------------------------------|---------------------------|
//! | `length`     | path                                     | u64 length                |
//! | `read`       | path, u64 offset, u32 len                | u32 n, n bytes            |
//! | `write`      | path, u64 offset, u32 len, len bytes     | u64 new length            |
//! | `set_length` | path, u64 length                         | u64 length                |
//! | `fetch`      | path                                     | u64 size, raw file bytes  |
//! | `store`      | path, u64 size, raw file bytes           | u64 size                  |
//!
//! Paths are modified UTF-8 strings relative to the root. `fetch` and
//! `store` move whole physical files, reserved regions included, with the
//! transport's file transfer; a stored file must carry a valid space header.
//!
//! Calls on the same path are serialized with a per-path lock. Calls on
//! different paths run in parallel on separate workers.

use std::fs::{self, File, OpenOptions};
use std::net::ToSocketAddrs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::client::TransportClient;
use super::pool::MethodHandler;
use super::server::TransportServer;
use crate::config::{MetaSpaceConfig, MAX_SERVICE_READ, MAX_SERVICE_WRITE};
use crate::encoding::{BinaryRead, BinaryWrite};
use crate::storage::MetaSpaceFile;

pub const METHOD_LENGTH: &str = "length";
pub const METHOD_READ: &str = "read";
pub const METHOD_WRITE: &str = "write";
pub const METHOD_SET_LENGTH: &str = "set_length";
pub const METHOD_FETCH: &str = "fetch";
pub const METHOD_STORE: &str = "store";

/// Suffix of files being received by `store`.
const PARTIAL_SUFFIX: &str = ".partial";

pub struct FileService {
    root: PathBuf,
    config: MetaSpaceConfig,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileService {
    /// Serves files under `root`, creating the directory if needed. New
    /// files get the geometry in `config`.
    pub fn new<P: AsRef<Path>>(root: P, config: MetaSpaceConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .wrap_err_with(|| format!("failed to create root '{}'", root.display()))?;
        info!(root = %root.display(), "file service ready");
        Ok(Self {
            root,
            config,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a client path onto the root. Only plain relative components
    /// are accepted.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let mut parts = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    ensure!(
                        !part.to_string_lossy().ends_with(PARTIAL_SUFFIX),
                        "'{}' uses a reserved suffix",
                        name
                    );
                    parts += 1;
                }
                _ => bail!("'{}' is not a plain relative path", name),
            }
        }
        ensure!(parts > 0, "empty path");
        Ok(self.root.join(relative))
    }

    /// Runs `f` holding the lock for `path`. The lock is dropped from the
    /// map once no other call holds or waits for it.
    fn locked<T>(&self, path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = Arc::clone(self.locks.lock().entry(path.to_path_buf()).or_default());
        let result = {
            let _guard = lock.lock();
            f()
        };

        let mut locks = self.locks.lock();
        // Clones are only made under the map lock, so the count cannot grow here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
        result
    }

    #[cfg(test)]
    fn tracked_paths(&self) -> usize {
        self.locks.lock().len()
    }

    fn open_existing(&self, path: &Path) -> Result<MetaSpaceFile> {
        MetaSpaceFile::open(path)
    }

    fn open_for_write(&self, path: &Path) -> Result<MetaSpaceFile> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create '{}'", parent.display()))?;
        }
        MetaSpaceFile::open_or_create(path, self.config)
    }

    fn length(&self, call: &mut TransportServer) -> Result<()> {
        let path = self.resolve(&call.read_utf()?)?;
        let len = self.locked(&path, || {
            let mut data = self.open_existing(&path)?.data()?;
            let len = data.length()?;
            data.close()?;
            Ok(len)
        })?;
        call.write_u64(len)
    }

    fn read(&self, call: &mut TransportServer) -> Result<()> {
        let path = self.resolve(&call.read_utf()?)?;
        let offset = call.read_u64()?;
        let len = call.read_u32()?;
        ensure!(
            len <= MAX_SERVICE_READ,
            "read of {} bytes exceeds limit {}",
            len,
            MAX_SERVICE_READ
        );

        let mut buf = vec![0u8; len as usize];
        let n = self.locked(&path, || {
            let mut data = self.open_existing(&path)?.data()?;
            data.seek(offset)?;
            let n = data.read(&mut buf)?;
            data.close()?;
            Ok(n)
        })?;

        call.write_u32(n as u32)?;
        call.write_all(&buf[..n])
    }

    fn write(&self, call: &mut TransportServer) -> Result<()> {
        let path = self.resolve(&call.read_utf()?)?;
        let offset = call.read_u64()?;
        let len = call.read_u32()?;
        ensure!(
            len <= MAX_SERVICE_WRITE,
            "write of {} bytes exceeds limit {}",
            len,
            MAX_SERVICE_WRITE
        );
        let mut buf = vec![0u8; len as usize];
        call.read_exact(&mut buf)?;

        let new_len = self.locked(&path, || {
            let mut data = self.open_for_write(&path)?.data()?;
            data.seek(offset)?;
            data.write_all(&buf)?;
            let new_len = data.length()?;
            data.close()?;
            Ok(new_len)
        })?;
        call.write_u64(new_len)
    }

    fn set_length(&self, call: &mut TransportServer) -> Result<()> {
        let path = self.resolve(&call.read_utf()?)?;
        let new_len = call.read_u64()?;

        let len = self.locked(&path, || {
            let mut data = self.open_for_write(&path)?.data()?;
            data.set_length(new_len)?;
            let len = data.length()?;
            data.close()?;
            Ok(len)
        })?;
        call.write_u64(len)
    }

    fn fetch(&self, call: &mut TransportServer) -> Result<()> {
        let path = self.resolve(&call.read_utf()?)?;

        self.locked(&path, || {
            let file = self.open_existing(&path)?;
            let size = file.physical_len()?;
            let raw = file.raw_file()?;
            call.write_u64(size)?;
            call.send_file(&raw, 0, size)?;
            debug!(path = %path.display(), size, "sent file");
            Ok(())
        })
    }

    fn store(&self, call: &mut TransportServer) -> Result<()> {
        let path = self.resolve(&call.read_utf()?)?;
        let size = call.read_u64()?;

        self.locked(&path, || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .wrap_err_with(|| format!("failed to create '{}'", parent.display()))?;
            }
            let mut partial = path.clone().into_os_string();
            partial.push(PARTIAL_SUFFIX);
            let partial = PathBuf::from(partial);

            let result = self.receive_into(call, &partial, size);
            if result.is_err() {
                let _ = fs::remove_file(&partial);
                return result;
            }
            fs::rename(&partial, &path)
                .wrap_err_with(|| format!("failed to replace '{}'", path.display()))?;
            debug!(path = %path.display(), size, "stored file");
            Ok(())
        })?;
        call.write_u64(size)
    }

    fn receive_into(&self, call: &mut TransportServer, partial: &Path, size: u64) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(partial)
            .wrap_err_with(|| format!("failed to create '{}'", partial.display()))?;
        call.receive_file(&file, 0, size)?;
        file.sync_all()?;
        drop(file);
        MetaSpaceFile::open(partial).wrap_err("stored file is not a metaspace file")?;
        Ok(())
    }
}

impl MethodHandler for FileService {
    fn handle(&self, method: &str, call: &mut TransportServer) -> Result<()> {
        match method {
            METHOD_LENGTH => self.length(call),
            METHOD_READ => self.read(call),
            METHOD_WRITE => self.write(call),
            METHOD_SET_LENGTH => self.set_length(call),
            METHOD_FETCH => self.fetch(call),
            METHOD_STORE => self.store(call),
            other => bail!("unknown method '{}'", other),
        }
    }
}

/// Client side of [`FileService`]. Each method is one call.
#[derive(Debug)]
pub struct FileStoreClient {
    client: TransportClient,
}

impl FileStoreClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Ok(Self::new(TransportClient::connect(addr)?))
    }

    pub fn new(client: TransportClient) -> Self {
        Self { client }
    }

    pub fn transport(&mut self) -> &mut TransportClient {
        &mut self.client
    }

    pub fn into_inner(self) -> TransportClient {
        self.client
    }

    fn begin(&mut self, method: &str, path: &str) -> Result<()> {
        self.client.start_method(method)?;
        self.client.write_utf(path)
    }

    pub fn length(&mut self, path: &str) -> Result<u64> {
        self.begin(METHOD_LENGTH, path)?;
        let len = self.client.read_u64()?;
        self.client.done_with_method()?;
        Ok(len)
    }

    /// Reads up to `buf.len()` bytes at `offset`. Returns 0 at the end of
    /// the stream.
    pub fn read(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len().min(MAX_SERVICE_READ as usize);
        self.begin(METHOD_READ, path)?;
        self.client.write_u64(offset)?;
        self.client.write_u32(len as u32)?;
        let n = self.client.read_u32()? as usize;
        ensure!(n <= len, "server returned {} bytes for a {} byte read", n, len);
        self.client.read_exact(&mut buf[..n])?;
        self.client.done_with_method()?;
        Ok(n)
    }

    /// Writes `data` at `offset` and returns the new stream length. Data
    /// larger than `MAX_SERVICE_WRITE` is sent as several calls.
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<u64> {
        let mut at = offset;
        let mut rest = data;
        loop {
            let (chunk, tail) = rest.split_at(rest.len().min(MAX_SERVICE_WRITE as usize));
            self.begin(METHOD_WRITE, path)?;
            self.client.write_u64(at)?;
            self.client.write_u32(chunk.len() as u32)?;
            self.client.write_all(chunk)?;
            let new_len = self.client.read_u64()?;
            self.client.done_with_method()?;

            at += chunk.len() as u64;
            rest = tail;
            if rest.is_empty() {
                return Ok(new_len);
            }
        }
    }

    pub fn set_length(&mut self, path: &str, len: u64) -> Result<u64> {
        self.begin(METHOD_SET_LENGTH, path)?;
        self.client.write_u64(len)?;
        let len = self.client.read_u64()?;
        self.client.done_with_method()?;
        Ok(len)
    }

    /// Copies the whole physical file at `path` into `dest`.
    pub fn fetch(&mut self, path: &str, dest: &File) -> Result<u64> {
        self.begin(METHOD_FETCH, path)?;
        let size = self.client.read_u64()?;
        self.client.receive_file(dest, 0, size)?;
        dest.set_len(size)
            .wrap_err("failed to trim fetched file")?;
        self.client.done_with_method()?;
        Ok(size)
    }

    /// Replaces the file at `path` with the physical file `source`.
    pub fn store(&mut self, path: &str, source: &File) -> Result<u64> {
        let size = source
            .metadata()
            .wrap_err("failed to stat source file")?
            .len();
        self.begin(METHOD_STORE, path)?;
        self.client.write_u64(size)?;
        self.client.send_file(source, 0, size)?;
        let stored = self.client.read_u64()?;
        self.client.done_with_method()?;
        Ok(stored)
    }

    pub fn close(self) -> Result<()> {
        self.client.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileService::new(dir.path(), MetaSpaceConfig::compact()).unwrap();

        assert!(service.resolve("a/b.msf").is_ok());
        assert!(service.resolve("../etc/passwd").is_err());
        assert!(service.resolve("/etc/passwd").is_err());
        assert!(service.resolve("a/./b").is_ok());
        assert!(service.resolve("").is_err());
        assert!(service.resolve("x.partial").is_err());
    }

    #[test]
    fn locks_are_dropped_once_released() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileService::new(dir.path(), MetaSpaceConfig::compact()).unwrap();
        let f = service.resolve("f").unwrap();
        let g = service.resolve("g").unwrap();

        service
            .locked(&f, || {
                assert_eq!(service.tracked_paths(), 1);
                service.locked(&g, || {
                    assert_eq!(service.tracked_paths(), 2);
                    Ok(())
                })
            })
            .unwrap();
        assert_eq!(service.tracked_paths(), 0);

        let failed: Result<()> = service.locked(&f, || bail!("missing"));
        assert!(failed.is_err());
        assert_eq!(service.tracked_paths(), 0);
    }

    #[test]
    fn same_path_is_serialized() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let service = FileService::new(dir.path(), MetaSpaceConfig::compact()).unwrap();
        let path = service.resolve("f").unwrap();
        let inside = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        service
                            .locked(&path, || {
                                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                                std::thread::yield_now();
                                inside.fetch_sub(1, Ordering::SeqCst);
                                Ok(())
                            })
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(service.tracked_paths(), 0);
    }
}
