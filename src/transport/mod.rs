//! # Transport Module
//!
//! A length-framed duplex protocol over TCP. One connection carries a
//! sequence of method calls; each call is a byte stream in both directions
//! plus, optionally, bulk file transfers and a failure report.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────┬───────────────────────────┐
//! │ FileStoreClient          │ FileService               │  methods
//! ├──────────────────────────┼───────────────────────────┤
//! │ TransportClient          │ TransportServer + Server  │  calls, handshake
//! ├──────────────────────────┴───────────────────────────┤
//! │ Channel                                              │  frames, acks, order
//! ├──────────────────────────────────────────────────────┤
//! │ TcpStream                                            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Call Lifecycle
//!
//! ```text
//! client                                   server
//! ──────                                   ──────
//! start_method("read") ── name, args ──>   next_method() == Some("read")
//! read_*()             <── reply ───────   write_*()
//! done_with_method()                       done_with_method()
//! ```
//!
//! Both sides count calls. Under V2 every frame carries the sender's count,
//! so a peer that runs ahead or falls behind is detected on the next frame
//! instead of silently mixing two calls' bytes. See [`version`] for the
//! differences between V1 and V2.
//!
//! ## Failures
//!
//! Either side may fail a call with `send_failure`. The peer's next read
//! returns `TransportError::ServerSide` (on the client) or
//! `TransportError::ClientSide` (on the server) carrying the sender's
//! [`RemoteFailure`].

mod channel;
pub mod client;
pub mod error;
pub mod frame;
pub mod pool;
pub mod server;
pub mod service;
pub mod version;

pub use client::TransportClient;
pub use error::{RemoteFailure, Side, TransportError};
pub use pool::{MethodHandler, Server, ServerHandle};
pub use server::TransportServer;
pub use service::{FileService, FileStoreClient};
pub use version::ProtocolVersion;
