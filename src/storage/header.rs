//! # Space Header
//!
//! Every file created through `MetaSpaceFile` starts with a 64-byte
//! `SpaceHeader` that records the block geometry the file was laid out with.
//! It lives in the first bytes of metadata block 0, which the metadata view
//! reserves via its `header_size`, so neither stream can overwrite it.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Field
//! 0       16    magic "SeriesFS space\0\0"
//! 16      4     version
//! 20      4     flags
//! 24      8     block_size
//! 32      8     block_spacing
//! 40      8     checksum (CRC-64/ECMA-182 over bytes 0..40)
//! 48      16    reserved
//! ```
//!
//! All integers are big-endian.

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result};
use zerocopy::big_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::error::StorageError;
use crate::config::{MetaSpaceConfig, SPACE_HEADER_SIZE};

pub const SPACE_MAGIC: &[u8; 16] = b"SeriesFS space\x00\x00";
pub const SPACE_VERSION: u32 = 1;

const CHECKSUM_OFFSET: usize = 40;
const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SpaceHeader {
    magic: [u8; 16],
    version: U32,
    flags: U32,
    block_size: U64,
    block_spacing: U64,
    checksum: U64,
    reserved: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<SpaceHeader>() == SPACE_HEADER_SIZE as usize);

impl SpaceHeader {
    pub fn new(config: MetaSpaceConfig) -> Self {
        let mut header = Self {
            magic: *SPACE_MAGIC,
            version: U32::new(SPACE_VERSION),
            flags: U32::new(0),
            block_size: U64::new(config.block_size),
            block_spacing: U64::new(config.block_spacing),
            checksum: U64::new(0),
            reserved: [0u8; 16],
        };
        header.update_checksum();
        header
    }

    /// Parses and validates a header. Failures carry
    /// `StorageError::BadHeader`.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let size = SPACE_HEADER_SIZE as usize;
        if bytes.len() < size {
            bail!(StorageError::BadHeader(format!(
                "buffer too small: {} < {}",
                bytes.len(),
                size
            )));
        }

        let header = Self::ref_from_bytes(&bytes[..size])
            .map_err(|e| eyre::eyre!("failed to parse SpaceHeader: {:?}", e))?;

        if &header.magic != SPACE_MAGIC {
            bail!(StorageError::BadHeader("invalid magic bytes".into()));
        }
        if header.version() != SPACE_VERSION {
            bail!(StorageError::BadHeader(format!(
                "unsupported version {} (expected {})",
                header.version(),
                SPACE_VERSION
            )));
        }
        if header.checksum() != header.compute_checksum() {
            bail!(StorageError::BadHeader(format!(
                "checksum mismatch: stored {:#018x}, computed {:#018x}",
                header.checksum(),
                header.compute_checksum()
            )));
        }
        ensure!(
            header.block_size() > SPACE_HEADER_SIZE
                && header.block_spacing() > 0
                && header.block_size().checked_add(header.block_spacing()).is_some(),
            StorageError::BadHeader(format!(
                "invalid geometry: block size {}, spacing {}",
                header.block_size(),
                header.block_spacing()
            ))
        );

        Ok(header)
    }

    pub fn compute_checksum(&self) -> u64 {
        CRC64.checksum(&self.as_bytes()[..CHECKSUM_OFFSET])
    }

    pub fn update_checksum(&mut self) {
        self.checksum = U64::new(self.compute_checksum());
    }

    pub fn config(&self) -> MetaSpaceConfig {
        MetaSpaceConfig {
            block_size: self.block_size(),
            block_spacing: self.block_spacing(),
        }
    }

    crate::zerocopy_accessors! {
        version: u32,
        flags: mut u32,
        block_size: u64,
        block_spacing: u64,
        checksum: u64,
    }
}
