//! # Transport Client
//!
//! The client drives every call:
//!
//! ```text
//! connect ──> start_method(name) ──> write / read ... ──> done_with_method
//!                 ▲                                              │
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! `start_method` bumps the call order and sends the method name as the
//! first bytes of the call. Reads and writes outside a call fail with
//! `TransportError::NoActiveCall`.
//!
//! ## Handshake
//!
//! ```text
//! client ──> [endianness u8][version u32 BE]
//! server ──> [ADMIT_YES][negotiated version u32 BE]   or   [ADMIT_NO]
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use eyre::{bail, eyre, Result, WrapErr};
use tracing::debug;

use super::channel::Channel;
use super::error::{RemoteFailure, Side, TransportError};
use super::version::ProtocolVersion;
use crate::config::{
    ADMIT_NO, ADMIT_YES, BIG_ENDIAN_BYTE, DEFAULT_CONNECT_TIMEOUT_SECS, HELLO_SIZE,
    LITTLE_ENDIAN_BYTE, METHOD_ORDER_START,
};
use crate::encoding::{modified_utf8, BinaryRead, BinaryWrite};

pub(crate) fn native_endianness() -> u8 {
    if cfg!(target_endian = "big") {
        BIG_ENDIAN_BYTE
    } else {
        LITTLE_ENDIAN_BYTE
    }
}

#[derive(Debug)]
pub struct TransportClient {
    channel: Channel,
    peer: SocketAddr,
    active: bool,
}

impl TransportClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::connect_with(
            addr,
            ProtocolVersion::CURRENT,
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    /// Connects offering `version`. The connection uses the lower of this
    /// and the server's version.
    pub fn connect_with<A: ToSocketAddrs>(
        addr: A,
        version: ProtocolVersion,
        timeout: Duration,
    ) -> Result<Self> {
        let mut last_err = None;
        for candidate in addr.to_socket_addrs().wrap_err("invalid server address")? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => return Self::handshake(stream, candidate, version),
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(e).wrap_err("failed to connect to server"),
            None => bail!("no server addresses resolved"),
        }
    }

    fn handshake(mut stream: TcpStream, peer: SocketAddr, version: ProtocolVersion) -> Result<Self> {
        stream
            .set_nodelay(true)
            .wrap_err("failed to configure TCP_NODELAY")?;

        let mut hello = [0u8; HELLO_SIZE];
        hello[0] = native_endianness();
        hello[1..].copy_from_slice(&version.code().to_be_bytes());
        stream.write_all(&hello).wrap_err("failed to send hello")?;

        let mut admit = [0u8; 1];
        stream
            .read_exact(&mut admit)
            .wrap_err("server closed the connection during handshake")?;
        match admit[0] {
            ADMIT_YES => {}
            ADMIT_NO => bail!(TransportError::Rejected),
            other => bail!(TransportError::Protocol(format!(
                "unexpected admission byte {}",
                other
            ))),
        }

        let mut code = [0u8; 4];
        stream
            .read_exact(&mut code)
            .wrap_err("server closed the connection during handshake")?;
        let code = u32::from_be_bytes(code);
        let negotiated = ProtocolVersion::from_code(code)
            .filter(|v| *v <= version)
            .ok_or_else(|| {
                eyre!(TransportError::Protocol(format!(
                    "server chose unusable version {}",
                    code
                )))
            })?;

        debug!(%peer, version = %negotiated, "connected");
        Ok(Self {
            channel: Channel::new(stream, negotiated, Side::Client, METHOD_ORDER_START),
            peer,
            active: false,
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.channel.version()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.channel.stream().local_addr()?)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begins a new call named `name`. Anything left over from the previous
    /// call is dropped.
    pub fn start_method(&mut self, name: &str) -> Result<()> {
        let encoded = modified_utf8::to_bytes(name)?;
        self.channel.order = self.channel.order.wrapping_add(1);
        self.channel.reset_call_state();
        self.active = true;
        self.channel.write(&encoded)
    }

    /// Flushes the call and marks it complete.
    pub fn done_with_method(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.active = false;
        self.channel.flush()
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.active {
            bail!(TransportError::NoActiveCall);
        }
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_active()?;
        self.channel.read(buf)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_active()?;
        self.channel.read_exact(buf)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_active()?;
        self.channel.write(buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.channel.flush()
    }

    pub fn send_file(&mut self, file: &File, start: u64, count: u64) -> Result<()> {
        self.ensure_active()?;
        self.channel.send_file(file, start, count)
    }

    pub fn receive_file(&mut self, file: &File, start: u64, count: u64) -> Result<()> {
        self.ensure_active()?;
        self.channel.receive_file(file, start, count)
    }

    /// Aborts the call on the server side. The server's next read fails
    /// with `TransportError::ClientSide`.
    pub fn send_failure(&mut self, failure: &RemoteFailure) -> Result<()> {
        self.ensure_active()?;
        self.channel.send_failure(failure)
    }

    pub fn send_error<E: std::error::Error + ?Sized>(&mut self, error: &E) -> Result<()> {
        self.send_failure(&RemoteFailure::from_error(error))
    }

    /// Flushes an active call and closes the socket.
    pub fn close(mut self) -> Result<()> {
        let result = if self.active {
            self.channel.flush()
        } else {
            Ok(())
        };
        self.channel.shutdown();
        result
    }
}

impl BinaryRead for TransportClient {
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf)
    }
}

impl BinaryWrite for TransportClient {
    fn write_fully(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)
    }
}

impl Read for TransportClient {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TransportClient::read(self, buf).map_err(TransportError::into_io)
    }
}

impl Write for TransportClient {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf).map_err(TransportError::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        TransportClient::flush(self).map_err(TransportError::into_io)
    }
}
