//! # SeriesFS - Virtual Address-Space Storage and Framed Transport
//!
//! SeriesFS stores large, append-heavy artifacts as two interleaved byte
//! streams inside one physical file, and moves those streams and files
//! between hosts over a small framed TCP protocol.
//!
//! ## Quick Start
//!
//! ```ignore
//! use seriesfs::{MetaSpaceConfig, MetaSpaceFile};
//! use seriesfs::encoding::BinaryWrite;
//!
//! let file = MetaSpaceFile::create("./series.msf", MetaSpaceConfig::default())?;
//! let mut data = file.data()?;
//! data.write_i64(0x12345678)?;
//! data.close()?;
//!
//! let mut meta = file.metadata()?;
//! meta.write_utf("calibrated")?;
//! meta.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   FileService / FileStoreClient         │
//! ├─────────────────────────────────────────┤
//! │   Transport (client, server, pool)      │
//! ├────────────────────┬────────────────────┤
//! │   VirtualFile      │   Channel frames   │
//! ├────────────────────┤                    │
//! │   AddressSpace     │                    │
//! ├────────────────────┴────────────────────┤
//! │   Encoding (big-endian, modified UTF-8) │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Physical Layout
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────┬──────────────────┬───
//! │ meta  B  │ data  S          │ meta  B  │ data  S          │ ...
//! └──────────┴──────────────────┴──────────┴──────────────────┴───
//!   ▲ first H bytes of block 0 hold the space header
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: Address spaces, `VirtualFile`, `MetaSpaceFile`
//! - [`transport`]: Framed protocol, endpoints, worker pool, file service
//! - [`encoding`]: Binary primitives and modified UTF-8
//! - [`config`]: Constants and runtime configuration

#[macro_use]
mod macros;

pub mod config;
pub mod encoding;
pub mod storage;
pub mod transport;

pub use config::{MetaSpaceConfig, ServerConfig};
pub use storage::{AddressSpace, Contiguous, MetaSpace, MetaSpaceFile, StorageError, View, VirtualFile};
pub use transport::{
    FileService, FileStoreClient, ProtocolVersion, RemoteFailure, Server, ServerHandle,
    TransportClient, TransportError, TransportServer,
};
