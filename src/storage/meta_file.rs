//! # MetaSpace Files
//!
//! `MetaSpaceFile` ties a physical file to the geometry recorded in its
//! `SpaceHeader` and hands out the two length-tracked streams stored in it:
//!
//! ```text
//! physical file
//! +-----------------+--------------------+-----------------+------
//! | hdr | metadata  |        data        |    metadata     | ...
//! +-----------------+--------------------+-----------------+------
//!   |       |                 |
//!   |       +-- metadata() ---|------------------+  VirtualFile (View::Metadata)
//!   |                         +-- data() --------+  VirtualFile (View::Data)
//!   +-- SpaceHeader, reserved by both views
//! ```
//!
//! Both streams start with their own 8-byte length header, so a freshly
//! created file already reports length 0 for each.
//!
//! Each stream handle gets its own cloned file descriptor. Clones share the
//! OS file cursor, so the two streams of one file must be driven from the
//! same thread or under an external lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use tracing::debug;
use zerocopy::IntoBytes;

use super::header::SpaceHeader;
use super::meta_space::{MetaSpace, View};
use super::virtual_file::VirtualFile;
use crate::config::{MetaSpaceConfig, SPACE_HEADER_SIZE};

#[derive(Debug)]
pub struct MetaSpaceFile {
    file: File,
    path: PathBuf,
    config: MetaSpaceConfig,
}

impl MetaSpaceFile {
    /// Creates a new file. Fails if `path` already exists.
    pub fn create<P: AsRef<Path>>(path: P, config: MetaSpaceConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Validates the geometry before anything touches the disk.
        MetaSpace::with_config(config, SPACE_HEADER_SIZE, View::Metadata)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create '{}'", path.display()))?;

        let header = SpaceHeader::new(config);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(header.as_bytes())
            .wrap_err_with(|| format!("failed to write space header to '{}'", path.display()))?;

        let space_file = Self { file, path, config };
        VirtualFile::create_tracked(space_file.clone_handle()?, space_file.data_space()?)
            .close()
            .wrap_err("failed to initialise data stream")?;
        VirtualFile::create_tracked(space_file.clone_handle()?, space_file.metadata_space()?)
            .close()
            .wrap_err("failed to initialise metadata stream")?;

        debug!(
            path = %space_file.path.display(),
            block_size = config.block_size,
            block_spacing = config.block_spacing,
            "created metaspace file"
        );
        Ok(space_file)
    }

    /// Opens an existing file and validates its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open '{}'", path.display()))?;

        let mut bytes = [0u8; SPACE_HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut bytes)
            .wrap_err_with(|| format!("failed to read space header of '{}'", path.display()))?;
        let config = SpaceHeader::from_bytes(&bytes)
            .wrap_err_with(|| format!("'{}' is not a metaspace file", path.display()))?
            .config();

        Ok(Self { file, path, config })
    }

    /// Opens `path` if it exists, otherwise creates it with `config`.
    pub fn open_or_create<P: AsRef<Path>>(path: P, config: MetaSpaceConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path, config)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> MetaSpaceConfig {
        self.config
    }

    fn clone_handle(&self) -> Result<File> {
        self.file
            .try_clone()
            .wrap_err_with(|| format!("failed to clone handle of '{}'", self.path.display()))
    }

    fn data_space(&self) -> Result<MetaSpace> {
        MetaSpace::with_config(self.config, SPACE_HEADER_SIZE, View::Data)
    }

    fn metadata_space(&self) -> Result<MetaSpace> {
        MetaSpace::with_config(self.config, SPACE_HEADER_SIZE, View::Metadata)
    }

    /// The data stream.
    pub fn data(&self) -> Result<VirtualFile<MetaSpace>> {
        Ok(VirtualFile::open_tracked(self.clone_handle()?, self.data_space()?))
    }

    /// The metadata stream.
    pub fn metadata(&self) -> Result<VirtualFile<MetaSpace>> {
        Ok(VirtualFile::open_tracked(self.clone_handle()?, self.metadata_space()?))
    }

    /// Size of the physical file including reserved regions.
    pub fn physical_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// A read-only handle on the raw physical file, for bulk transfer.
    pub fn raw_file(&self) -> Result<File> {
        self.clone_handle()
    }

    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BinaryRead, BinaryWrite};
    use crate::storage::error::StorageError;
    use tempfile::tempdir;

    #[test]
    fn new_file_has_empty_streams() {
        let dir = tempdir().unwrap();
        let space = MetaSpaceFile::create(dir.path().join("a.msf"), MetaSpaceConfig::compact()).unwrap();

        assert_eq!(space.data().unwrap().length().unwrap(), 0);
        assert_eq!(space.metadata().unwrap().length().unwrap(), 0);
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.msf");
        MetaSpaceFile::create(&path, MetaSpaceConfig::compact()).unwrap();

        assert!(MetaSpaceFile::create(&path, MetaSpaceConfig::compact()).is_err());
    }

    #[test]
    fn streams_do_not_overlap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.msf");
        let space = MetaSpaceFile::create(&path, MetaSpaceConfig::compact()).unwrap();

        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();
        let meta: Vec<u8> = (0..700u32).map(|i| (i * 13) as u8).collect();
        {
            let mut d = space.data().unwrap();
            let mut m = space.metadata().unwrap();
            d.write_all(&data).unwrap();
            m.write_all(&meta).unwrap();
            d.close().unwrap();
            m.close().unwrap();
        }

        let reopened = MetaSpaceFile::open(&path).unwrap();
        assert_eq!(reopened.config(), MetaSpaceConfig::compact());

        let mut d = reopened.data().unwrap();
        let mut back = vec![0u8; data.len()];
        d.read_exact(&mut back).unwrap();
        assert_eq!(back, data);

        let mut m = reopened.metadata().unwrap();
        assert_eq!(m.length().unwrap(), meta.len() as u64);
        let mut back = vec![0u8; meta.len()];
        m.read_exact(&mut back).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn primitives_round_trip_through_metadata_stream() {
        let dir = tempdir().unwrap();
        let space = MetaSpaceFile::create(dir.path().join("a.msf"), MetaSpaceConfig::compact()).unwrap();

        let mut m = space.metadata().unwrap();
        m.write_f64(2.5).unwrap();
        m.write_utf("cadence").unwrap();
        m.seek(0).unwrap();

        assert_eq!(m.read_f64().unwrap(), 2.5);
        assert_eq!(m.read_utf().unwrap(), "cadence");
    }

    #[test]
    fn open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, vec![0x55u8; 256]).unwrap();

        let err = MetaSpaceFile::open(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::BadHeader(_))
        ));
    }
}
