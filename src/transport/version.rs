//! Wire protocol versions.
//!
//! | Version | Max message | Header                           | Acks |
//! |---------|-------------|----------------------------------|------|
//! | V1      | 64 KiB      | `[kind][len u32]`                | no   |
//! | V2      | 1 MiB       | `[kind][len u32][call order i32]`| yes  |
//!
//! Both headers start with the same kind byte and length, so the two
//! versions share one decoder. Peers agree on the lower of their versions
//! during the handshake.

use crate::config::{V1_HEADER_SIZE, V1_MAX_MESSAGE_SIZE, V2_HEADER_SIZE, V2_MAX_MESSAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    pub const CURRENT: Self = Self::V2;

    /// Value sent in the handshake.
    pub fn code(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// Largest frame, header included.
    pub fn max_message_size(self) -> usize {
        match self {
            Self::V1 => V1_MAX_MESSAGE_SIZE,
            Self::V2 => V2_MAX_MESSAGE_SIZE,
        }
    }

    pub fn header_size(self) -> usize {
        match self {
            Self::V1 => V1_HEADER_SIZE,
            Self::V2 => V2_HEADER_SIZE,
        }
    }

    pub fn max_payload(self) -> usize {
        self.max_message_size() - self.header_size()
    }

    /// V2 frames carry the call order and are acknowledged one by one.
    pub fn is_ordered(self) -> bool {
        self == Self::V2
    }

    /// Version both peers speak, or `None` when the client's code is not a
    /// version at all. Codes newer than any known version are capped.
    pub fn negotiate(client_code: u32, server_max: Self) -> Option<Self> {
        if client_code == 0 {
            return None;
        }
        let client = Self::from_code(client_code).unwrap_or(Self::CURRENT);
        Some(client.min(server_max))
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => write!(f, "V1"),
            Self::V2 => write!(f, "V2"),
        }
    }
}
