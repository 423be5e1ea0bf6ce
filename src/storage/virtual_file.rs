//! # Virtual File
//!
//! `VirtualFile` is a random access handle that presents a gap-free byte
//! stream over a physical file whose reserved regions are decided by an
//! [`AddressSpace`]. Callers seek, read and write virtual offsets; the handle
//! translates them and splits every transfer into physically contiguous
//! chunks.
//!
//! ## Cursors
//!
//! ```text
//! virtual_addr   raw virtual offset, including the length header
//! physical_addr  translate(virtual_addr), never inside a reserved run
//! run_end        last usable physical address of the current run
//! ```
//!
//! The policy is only consulted when a transfer crosses `run_end` or after a
//! seek, so sequential I/O inside one run costs no arithmetic at all.
//!
//! ## Length Tracking
//!
//! A tracked stream reserves its first 8 virtual bytes for a big-endian u64
//! holding the visible length. The header is invisible to callers: position
//! 0 is the first byte after it, and `length()` never counts it.
//!
//! | State     | Meaning                                              |
//! |-----------|------------------------------------------------------|
//! | `Unknown` | header not read yet, loaded on first use             |
//! | `Loading` | header read in progress, any length access fails     |
//! | `Known`   | value cached, `stored` is what the header holds      |
//!
//! The header is rewritten by `close` (or on drop) only when the cached
//! value differs from the stored one.
//!
//! ## End Of Stream
//!
//! - `read_byte` returns `Ok(None)` at the end
//! - `read` returns `Ok(0)` at the end
//! - `read_exact` and every `BinaryRead` primitive fail with
//!   `StorageError::EndOfStream`
//!
//! A tracked stream ends at its recorded length; an untracked stream ends at
//! the physical end of the file.
//!
//! ## Thread Safety
//!
//! `VirtualFile` is `Send` but every operation takes `&mut self`. Use one
//! handle per thread or wrap it in a lock.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use eyre::{bail, ensure, Result, WrapErr};
use tracing::{debug, warn};

use super::address_space::AddressSpace;
use super::error::StorageError;
use super::meta_space::MetaSpace;
use crate::config::{LENGTH_SIZE, MAX_IO_CHUNK, MAX_LENGTH_EXTENSION};
use crate::encoding::{BinaryRead, BinaryWrite};

const ZERO_FILL_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LengthState {
    Unknown,
    Loading,
    Known { value: u64, stored: Option<u64> },
}

#[derive(Debug)]
pub struct VirtualFile<P: AddressSpace = MetaSpace> {
    file: File,
    space: P,
    virtual_addr: u64,
    physical_addr: u64,
    run_end: u64,
    length: LengthState,
    tracks_length: bool,
}

impl<P: AddressSpace> VirtualFile<P> {
    /// Opens an untracked stream. Position 0 is virtual address 0.
    pub fn open(file: File, space: P) -> Self {
        Self::with_state(file, space, false, LengthState::Unknown)
    }

    /// Opens a tracked stream whose length header already exists. The header
    /// is read on first use.
    pub fn open_tracked(file: File, space: P) -> Self {
        Self::with_state(file, space, true, LengthState::Unknown)
    }

    /// Starts a new tracked stream of length 0. The header is written on
    /// close even if nothing else is.
    pub fn create_tracked(file: File, space: P) -> Self {
        Self::with_state(
            file,
            space,
            true,
            LengthState::Known {
                value: 0,
                stored: None,
            },
        )
    }

    fn with_state(file: File, space: P, tracks_length: bool, length: LengthState) -> Self {
        let mut vf = Self {
            file,
            space,
            virtual_addr: 0,
            physical_addr: 0,
            run_end: 0,
            length,
            tracks_length,
        };
        let start = vf.header_len();
        vf.seek_raw(start);
        vf
    }

    pub fn space(&self) -> &P {
        &self.space
    }

    pub fn tracks_length(&self) -> bool {
        self.tracks_length
    }

    #[inline]
    fn header_len(&self) -> u64 {
        if self.tracks_length {
            LENGTH_SIZE
        } else {
            0
        }
    }

    /// Current position in the visible stream.
    pub fn position(&self) -> u64 {
        self.virtual_addr - self.header_len()
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let raw = pos
            .checked_add(self.header_len())
            .ok_or_else(|| eyre::eyre!("seek position {} overflows the virtual space", pos))?;
        ensure!(
            raw <= self.space.last_virtual_address(),
            "seek position {} is beyond the last virtual address {}",
            pos,
            self.space.last_virtual_address()
        );
        if raw != self.virtual_addr {
            self.seek_raw(raw);
        }
        Ok(())
    }

    fn seek_raw(&mut self, raw: u64) {
        self.virtual_addr = raw;
        self.physical_addr = self.space.translate(raw);
        self.run_end = self.space.next_unused_address(self.physical_addr);
    }

    /// Moves past a reserved run if the physical cursor has left the current
    /// one.
    fn sync_run(&mut self) {
        if self.run_end > self.physical_addr {
            return;
        }
        if self.space.is_used(self.physical_addr) {
            self.physical_addr = self.space.next_unused_address(self.physical_addr);
        }
        self.run_end = self.space.next_unused_address(self.physical_addr);
    }

    /// Positions the file for the next chunk and returns its length.
    fn next_chunk(&mut self, remaining: usize) -> Result<usize> {
        self.sync_run();
        let run = self
            .run_end
            .saturating_sub(self.physical_addr)
            .saturating_add(1);
        let len = run.min(remaining as u64).min(MAX_IO_CHUNK) as usize;

        // The OS cursor may be shared with other handles on the same file.
        self.file
            .seek(SeekFrom::Start(self.physical_addr))
            .wrap_err_with(|| format!("failed to seek to physical offset {}", self.physical_addr))?;
        Ok(len)
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        self.physical_addr = self.physical_addr.saturating_add(n as u64);
        self.virtual_addr = self.virtual_addr.saturating_add(n as u64);
    }

    /// Reads into `buf` until it is full or the physical file ends. Returns
    /// the number of bytes read. Does not consult the tracked length.
    fn read_physical(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let len = self.next_chunk(buf.len() - done)?;
            let n = match self.file.read(&mut buf[done..done + len]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!("failed to read at physical offset {}", self.physical_addr)
                    })
                }
            };
            if n == 0 {
                break;
            }
            self.advance(n);
            done += n;
        }
        Ok(done)
    }

    fn write_physical(&mut self, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let len = self.next_chunk(buf.len() - done)?;
            self.file
                .write_all(&buf[done..done + len])
                .wrap_err_with(|| {
                    format!(
                        "failed to write {} bytes at physical offset {}",
                        len, self.physical_addr
                    )
                })?;
            self.advance(len);
            done += len;
        }
        Ok(())
    }

    fn load_length(&mut self) -> Result<u64> {
        ensure!(self.tracks_length, "length is not tracked by this stream");
        match self.length {
            LengthState::Known { value, .. } => return Ok(value),
            LengthState::Loading => bail!(StorageError::LengthReentry),
            LengthState::Unknown => {}
        }

        self.length = LengthState::Loading;
        let saved = self.virtual_addr;
        self.seek_raw(0);
        let mut header = [0u8; LENGTH_SIZE as usize];
        let read = self.read_physical(&mut header);
        self.seek_raw(saved);

        match read {
            Ok(n) if n == header.len() => {
                let value = u64::from_be_bytes(header);
                debug!(length = value, "loaded virtual length");
                self.length = LengthState::Known {
                    value,
                    stored: Some(value),
                };
                Ok(value)
            }
            Ok(n) => {
                self.length = LengthState::Unknown;
                Err(eyre::eyre!(StorageError::EndOfStream {
                    position: 0,
                    requested: LENGTH_SIZE,
                }))
                .wrap_err(format!("length header truncated after {} bytes", n))
            }
            Err(e) => {
                self.length = LengthState::Unknown;
                Err(e).wrap_err("failed to load length header")
            }
        }
    }

    fn store_length_header(&mut self, value: u64) -> Result<()> {
        let saved = self.virtual_addr;
        self.seek_raw(0);
        let result = self.write_physical(&value.to_be_bytes());
        self.seek_raw(saved);
        result.wrap_err("failed to store length header")
    }

    fn write_back_length(&mut self) -> Result<()> {
        if let LengthState::Known { value, stored } = self.length {
            if self.tracks_length && stored != Some(value) {
                self.store_length_header(value)?;
                self.length = LengthState::Known {
                    value,
                    stored: Some(value),
                };
            }
        }
        Ok(())
    }

    /// Visible length of a tracked stream.
    pub fn length(&mut self) -> Result<u64> {
        self.load_length()
    }

    /// Extends with zeros or truncates the recorded length. The file is never
    /// physically shrunk. Extending leaves the cursor at the new end and may
    /// add at most `MAX_LENGTH_EXTENSION` bytes; truncating only moves a
    /// cursor that would lie past the new end.
    pub fn set_length(&mut self, new_length: u64) -> Result<()> {
        let current = self.load_length()?;
        if new_length > current {
            let extension = new_length - current;
            ensure!(
                extension <= MAX_LENGTH_EXTENSION,
                "extending by {} bytes exceeds the limit of {}",
                extension,
                MAX_LENGTH_EXTENSION
            );
            self.seek(current)?;
            let zeros = vec![0u8; ZERO_FILL_CHUNK.min(extension as usize)];
            let mut remaining = extension;
            while remaining > 0 {
                let n = remaining.min(zeros.len() as u64) as usize;
                self.write_all(&zeros[..n])?;
                remaining -= n as u64;
            }
        } else {
            if let LengthState::Known { stored, .. } = self.length {
                self.length = LengthState::Known {
                    value: new_length,
                    stored,
                };
            }
            if self.position() > new_length {
                self.seek(new_length)?;
            }
        }
        Ok(())
    }

    /// Bytes left before the end of a tracked stream, `None` when untracked.
    fn remaining(&mut self) -> Result<Option<u64>> {
        if !self.tracks_length {
            return Ok(None);
        }
        let length = self.load_length()?;
        Ok(Some(length.saturating_sub(self.position())))
    }

    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.remaining()? == Some(0) {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        match self.read_physical(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Best-effort read. Returns 0 at the end of the stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = match self.remaining()? {
            Some(left) => left.min(buf.len() as u64) as usize,
            None => {
                let last = self.space.last_virtual_address();
                let left = last.saturating_sub(self.virtual_addr);
                left.min(buf.len() as u64) as usize
            }
        };
        if len == 0 {
            return Ok(0);
        }
        self.read_physical(&mut buf[..len])
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let position = self.position();
        let requested = buf.len() as u64;
        if let Some(left) = self.remaining()? {
            if requested > left {
                bail!(StorageError::EndOfStream {
                    position,
                    requested
                });
            }
        }
        let n = self.read_physical(buf)?;
        if n < buf.len() {
            bail!(StorageError::EndOfStream {
                position,
                requested
            });
        }
        Ok(())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let last = self.space.last_virtual_address();
        let end = self.virtual_addr.checked_add(buf.len() as u64 - 1);
        ensure!(
            matches!(end, Some(end) if end <= last),
            "writing {} bytes at position {} passes the last virtual address {}",
            buf.len(),
            self.position(),
            last
        );
        if self.tracks_length {
            self.load_length()?;
        }
        self.write_physical(buf)?;

        let end = self.position();
        if let LengthState::Known { value, stored } = self.length {
            if end > value {
                self.length = LengthState::Known { value: end, stored };
            }
        }
        Ok(())
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_all(&[byte])
    }

    /// Advances the cursor by up to `n` bytes without reading them. A tracked
    /// stream stops at its end. Returns the number of bytes skipped.
    pub fn skip_bytes(&mut self, n: u64) -> Result<u64> {
        let skip = match self.remaining()? {
            Some(left) => left.min(n),
            None => n,
        };
        let target = self.position() + skip;
        self.seek(target)?;
        Ok(skip)
    }

    /// Physical size of the underlying file, reserved regions included.
    pub fn physical_len(&self) -> Result<u64> {
        let meta = self.file.metadata().wrap_err("failed to stat file")?;
        Ok(meta.len())
    }

    /// Writes back a changed length header and flushes the file to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.write_back_length()?;
        self.file.sync_all().wrap_err("failed to sync file")
    }

    /// Writes back a changed length header and releases the handle.
    pub fn close(mut self) -> Result<()> {
        let result = self.write_back_length();
        self.length = LengthState::Unknown;
        result
    }
}

impl<P: AddressSpace> Drop for VirtualFile<P> {
    fn drop(&mut self) {
        if let Err(e) = self.write_back_length() {
            warn!(error = %e, "failed to write back virtual length on drop");
        }
    }
}

impl<P: AddressSpace> BinaryRead for VirtualFile<P> {
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf)
    }
}

impl<P: AddressSpace> BinaryWrite for VirtualFile<P> {
    fn write_fully(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)
    }
}

impl<P: AddressSpace> Read for VirtualFile<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        VirtualFile::read(self, buf).map_err(|e| io::Error::other(format!("{:#}", e)))
    }
}

impl<P: AddressSpace> Write for VirtualFile<P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf)
            .map_err(|e| io::Error::other(format!("{:#}", e)))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
