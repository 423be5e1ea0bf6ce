//! Frame header layout.
//!
//! ```text
//! V1 frame:  [kind u8][len u32 BE][payload ...]
//! V2 frame:  [kind u8][len u32 BE][order i32 BE][payload ...]
//! V2 ack:    [ACK u8][order i32 BE]
//! ```
//!
//! `len` counts payload bytes only. A frame never exceeds the negotiated
//! version's maximum message size.

use eyre::{bail, ensure, Result};

use super::version::ProtocolVersion;
use crate::config::ACK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Data = 0,
    Failure = 1,
    Ack = 2,
    File = 3,
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Data),
            1 => Ok(Self::Failure),
            2 => Ok(Self::Ack),
            3 => Ok(Self::File),
            other => bail!("unknown frame kind {}", other),
        }
    }

    /// Data and file frames carry stream bytes; both are read the same way.
    pub fn is_payload(self) -> bool {
        matches!(self, Self::Data | Self::File)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub len: usize,
    /// Sender's call order, V2 only.
    pub order: Option<i32>,
}

impl FrameHeader {
    /// Writes the header into the first `version.header_size()` bytes of
    /// `out`.
    pub fn encode(&self, version: ProtocolVersion, out: &mut [u8]) -> Result<()> {
        ensure!(
            self.len <= version.max_payload(),
            "frame payload {} exceeds {} maximum {}",
            self.len,
            version,
            version.max_payload()
        );
        ensure!(
            out.len() >= version.header_size(),
            "header buffer too small: {} < {}",
            out.len(),
            version.header_size()
        );

        out[0] = self.kind as u8;
        out[1..5].copy_from_slice(&(self.len as u32).to_be_bytes());
        if version.is_ordered() {
            out[5..9].copy_from_slice(&self.order.unwrap_or(0).to_be_bytes());
        }
        Ok(())
    }

    /// Parses everything after the kind byte.
    pub fn decode(version: ProtocolVersion, kind: FrameKind, rest: &[u8]) -> Result<Self> {
        ensure!(
            rest.len() + 1 >= version.header_size(),
            "truncated {} frame header",
            version
        );

        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        ensure!(
            len <= version.max_payload(),
            "peer sent {} byte payload, {} maximum is {}",
            len,
            version,
            version.max_payload()
        );

        let order = if version.is_ordered() {
            Some(i32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]))
        } else {
            None
        };
        Ok(Self { kind, len, order })
    }
}

pub fn encode_ack(order: i32) -> [u8; ACK_SIZE] {
    let mut out = [0u8; ACK_SIZE];
    out[0] = FrameKind::Ack as u8;
    out[1..].copy_from_slice(&order.to_be_bytes());
    out
}
