//! # SeriesFS Configuration Module
//!
//! This module centralizes configuration for SeriesFS. Numeric constants live
//! in [`constants`] next to the compile-time assertions that tie them
//! together. Runtime knobs are small `Copy` structs with a `Default` and a
//! few named presets.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation
//! - [`MetaSpaceConfig`]: Physical block geometry
//! - [`ServerConfig`]: Accept loop and worker pool sizing

pub mod constants;
pub use constants::*;

use std::time::Duration;

use crate::transport::ProtocolVersion;

/// Physical geometry of a MetaSpace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaSpaceConfig {
    /// Metadata bytes reserved at the start of every cycle.
    pub block_size: u64,
    /// Data bytes following each metadata block.
    pub block_spacing: u64,
}

impl Default for MetaSpaceConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_spacing: DEFAULT_BLOCK_SPACING,
        }
    }
}

impl MetaSpaceConfig {
    /// Small cycles, useful for exercising boundaries in tests.
    pub fn compact() -> Self {
        Self {
            block_size: 128,
            block_spacing: 1024,
        }
    }

    pub fn cycle_len(&self) -> u64 {
        self.block_size + self.block_spacing
    }
}

/// Sizing for the transport server.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Number of worker threads; each serves one connection at a time.
    pub workers: usize,
    /// Accepted connections that may wait for a worker.
    pub queue_depth: usize,
    /// Highest protocol version offered during the handshake.
    pub max_version: ProtocolVersion,
    /// Set TCP_NODELAY on accepted sockets.
    pub nodelay: bool,
    /// Sleep between polls of the listener.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            queue_depth: DEFAULT_ACCEPT_QUEUE_DEPTH,
            max_version: ProtocolVersion::CURRENT,
            nodelay: true,
            poll_interval: Duration::from_millis(ACCEPT_POLL_INTERVAL_MS),
        }
    }
}

impl ServerConfig {
    /// A single worker, for tests and tools that serve one peer.
    pub fn single() -> Self {
        Self {
            workers: 1,
            queue_depth: 4,
            ..Self::default()
        }
    }

    pub fn with_max_version(mut self, version: ProtocolVersion) -> Self {
        self.max_version = version;
        self
    }
}
