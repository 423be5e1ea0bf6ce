//! # SeriesFS Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_BLOCK_SIZE (4096 bytes)
//!       │
//!       ├─> SPACE_HEADER_SIZE (64 bytes, must be <)
//!       │     The stream header lives inside the first metadata block.
//!       │
//!       └─> DEFAULT_BLOCK_SPACING (1 MiB data run per cycle)
//!             4 KiB of metadata per 1 MiB of data, ~0.4% overhead.
//!
//! LENGTH_SIZE (8 bytes)
//!       │
//!       └─> Virtual length header at virtual offset 0, big-endian u64
//!
//! V1_MAX_MESSAGE_SIZE (64 KiB)          V2_MAX_MESSAGE_SIZE (1 MiB)
//!       │                                     │
//!       └─> V1_HEADER_SIZE (5 bytes)          └─> V2_HEADER_SIZE (9 bytes)
//!             max payload = message - header       max payload = message - header
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `SPACE_HEADER_SIZE < DEFAULT_BLOCK_SIZE` (header fits in block 0)
//! 2. `V1_MAX_MESSAGE_SIZE <= V2_MAX_MESSAGE_SIZE` (receive buffers sized by V2)
//! 3. Both frame sizes fit in an `i32` length field

// ============================================================================
// ADDRESS SPACE GEOMETRY
// These define the physical interleaving of metadata and data
// ============================================================================

/// Size of the metadata block reserved at the start of each cycle.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

/// Length of the data run following each metadata block.
pub const DEFAULT_BLOCK_SPACING: u64 = 1024 * 1024;

/// Size of the `SpaceHeader` stored at physical offset 0.
pub const SPACE_HEADER_SIZE: u64 = 64;

const _: () = assert!(
    SPACE_HEADER_SIZE < DEFAULT_BLOCK_SIZE,
    "SPACE_HEADER_SIZE must fit inside the first metadata block"
);

// ============================================================================
// VIRTUAL FILE
// ============================================================================

/// Bytes at virtual offset 0 holding the stored virtual length.
pub const LENGTH_SIZE: u64 = 8;

/// Largest chunk moved by a single physical read or write.
pub const MAX_IO_CHUNK: u64 = i32::MAX as u64;

/// Largest encoded modified UTF-8 string (u16 length prefix).
pub const MAX_UTF_LENGTH: usize = u16::MAX as usize;

// ============================================================================
// TRANSPORT FRAMING
// Wire sizes for the two protocol versions
// ============================================================================

/// Frame header for V1: kind byte + payload length.
pub const V1_HEADER_SIZE: usize = 5;

/// Frame header for V2: kind byte + payload length + call order.
pub const V2_HEADER_SIZE: usize = 9;

/// Largest V1 frame including header.
pub const V1_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Largest V2 frame including header.
pub const V2_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Size of a V2 acknowledgement: ACK byte + call order.
pub const ACK_SIZE: usize = 5;

/// Size of the client hello: endianness byte + version.
pub const HELLO_SIZE: usize = 5;

/// Call order before the first `start_method`.
pub const METHOD_ORDER_START: i32 = -1;

pub const ADMIT_YES: u8 = 23;
pub const ADMIT_NO: u8 = 42;

pub const BIG_ENDIAN_BYTE: u8 = 0;
pub const LITTLE_ENDIAN_BYTE: u8 = 1;

const _: () = assert!(
    V1_MAX_MESSAGE_SIZE <= V2_MAX_MESSAGE_SIZE,
    "V1 frames must fit in buffers sized for V2"
);

const _: () = assert!(
    V2_MAX_MESSAGE_SIZE <= i32::MAX as usize,
    "frame length must fit the i32 length field"
);

// ============================================================================
// SERVER DEFAULTS
// ============================================================================

/// Default TCP port for `seriesfsd`.
pub const DEFAULT_PORT: u16 = 7420;

/// Worker threads serving accepted connections.
pub const DEFAULT_WORKER_COUNT: usize = 8;

/// Accepted connections allowed to wait for a free worker.
pub const DEFAULT_ACCEPT_QUEUE_DEPTH: usize = 64;

/// Sleep between polls of the non-blocking listener.
pub const ACCEPT_POLL_INTERVAL_MS: u64 = 50;

/// Client connect timeout. Reads and writes themselves never time out.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Largest single `read` a file service client may request.
pub const MAX_SERVICE_READ: u32 = 16 * 1024 * 1024;

/// Largest single `write` payload the file service accepts.
pub const MAX_SERVICE_WRITE: u32 = 16 * 1024 * 1024;

/// Most bytes one `set_length` call may add to a stream.
pub const MAX_LENGTH_EXTENSION: u64 = i32::MAX as u64;
