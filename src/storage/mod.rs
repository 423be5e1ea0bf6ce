//! # Storage Module
//!
//! This module provides the virtual address-space storage engine: a logical,
//! gap-free byte stream interleaved with periodically reserved regions inside
//! a single physical file.
//!
//! ## Architecture Overview
//!
//! ```text
//!            caller offsets (virtual, gap-free)
//!                         │
//!                         ▼
//!   ┌─────────────────────────────────────────┐
//!   │ VirtualFile                             │  cursors, length header,
//!   │   seek / read / write / set_length      │  chunked physical I/O
//!   └────────────────────┬────────────────────┘
//!                        │ translate / is_used / next_unused_address
//!                        ▼
//!   ┌─────────────────────────────────────────┐
//!   │ AddressSpace (MetaSpace, Contiguous)    │  pure, Copy, Send + Sync
//!   └────────────────────┬────────────────────┘
//!                        │ physical offsets
//!                        ▼
//!                   std::fs::File
//! ```
//!
//! ## MetaSpace Geometry
//!
//! The default geometry reserves a 4 KiB metadata block in front of every
//! 1 MiB of data, about 0.4% overhead. Small, frequently rewritten metadata
//! stays physically next to the data it describes without either stream
//! ever overlapping the other.
//!
//! ## Module Organization
//!
//! - `address_space`: The `AddressSpace` trait and the identity policy
//! - `meta_space`: `MetaSpace` with its data and metadata views
//! - `virtual_file`: `VirtualFile`, the random access stream handle
//! - `header`: `SpaceHeader`, the on-disk geometry record
//! - `meta_file`: `MetaSpaceFile`, which pairs a header with both streams
//! - `error`: `StorageError`, the classifiable failures
//!
//! ## Thread Safety
//!
//! Policies are shared freely. `VirtualFile` and `MetaSpaceFile` are `Send`;
//! wrap them in a lock for shared use.

pub mod address_space;
pub mod error;
pub mod header;
pub mod meta_file;
pub mod meta_space;
pub mod virtual_file;

pub use address_space::{AddressSpace, Contiguous};
pub use error::StorageError;
pub use header::SpaceHeader;
pub use meta_file::MetaSpaceFile;
pub use meta_space::{MetaSpace, View};
pub use virtual_file::VirtualFile;
