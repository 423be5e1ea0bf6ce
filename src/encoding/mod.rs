//! # Encoding Module
//!
//! This module provides the byte formats shared by storage and transport:
//!
//! - **Binary primitives**: Big-endian fixed-width values via the
//!   `BinaryRead` / `BinaryWrite` traits
//! - **Modified UTF-8**: Length-prefixed text used for stored strings and
//!   method names

pub mod binary;
pub mod modified_utf8;

pub use binary::{BinaryRead, BinaryWrite};
