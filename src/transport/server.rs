//! Server endpoint of a single connection.
//!
//! The server never starts calls. It waits in [`TransportServer::next_method`]
//! for the name the client sends at the start of a call, serves the call,
//! and advances its call order in [`TransportServer::done_with_method`].
//! Any output written after that point carries the next order, which the
//! client reports as `OutOfSync`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use eyre::{bail, Result, WrapErr};
use tracing::debug;

use super::channel::Channel;
use super::error::{RemoteFailure, Side, TransportError};
use super::version::ProtocolVersion;
use crate::config::{
    ADMIT_NO, ADMIT_YES, BIG_ENDIAN_BYTE, HELLO_SIZE, LITTLE_ENDIAN_BYTE,
};
use crate::encoding::{BinaryRead, BinaryWrite};

#[derive(Debug)]
pub struct TransportServer {
    channel: Channel,
    peer: SocketAddr,
}

impl TransportServer {
    /// Runs the handshake on a freshly accepted connection. The connection
    /// speaks the lower of the client's version and `max_version`.
    pub fn accept(mut stream: TcpStream, max_version: ProtocolVersion) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .wrap_err("failed to read peer address")?;

        let mut hello = [0u8; HELLO_SIZE];
        stream
            .read_exact(&mut hello)
            .wrap_err_with(|| format!("{} closed the connection during handshake", peer))?;

        let endianness = hello[0];
        let code = u32::from_be_bytes([hello[1], hello[2], hello[3], hello[4]]);
        let negotiated = match endianness {
            BIG_ENDIAN_BYTE | LITTLE_ENDIAN_BYTE => ProtocolVersion::negotiate(code, max_version),
            _ => None,
        };

        let Some(version) = negotiated else {
            // Best effort; the peer may already be gone.
            let _ = stream.write_all(&[ADMIT_NO]);
            debug!(%peer, endianness, code, "refused handshake");
            bail!(TransportError::Rejected);
        };

        let mut reply = [0u8; 5];
        reply[0] = ADMIT_YES;
        reply[1..].copy_from_slice(&version.code().to_be_bytes());
        stream
            .write_all(&reply)
            .wrap_err("failed to send handshake reply")?;

        debug!(%peer, client_code = code, version = %version, "accepted connection");
        Ok(Self {
            channel: Channel::new(stream, version, Side::Server, 0),
            peer,
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.channel.version()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Waits for the client to start a call and returns its method name.
    /// `Ok(None)` means the client closed the connection between calls.
    pub fn next_method(&mut self) -> Result<Option<String>> {
        match self.read_utf() {
            Ok(name) => Ok(Some(name)),
            Err(e) if TransportError::is_disconnect(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Flushes the reply, drops unread input and moves on to the next call.
    pub fn done_with_method(&mut self) -> Result<()> {
        let result = self.channel.flush();
        self.channel.order = self.channel.order.wrapping_add(1);
        self.channel.discard_input();
        result
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.channel.read(buf)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.channel.read_exact(buf)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.channel.write(buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.channel.flush()
    }

    pub fn send_file(&mut self, file: &File, start: u64, count: u64) -> Result<()> {
        self.channel.send_file(file, start, count)
    }

    pub fn receive_file(&mut self, file: &File, start: u64, count: u64) -> Result<()> {
        self.channel.receive_file(file, start, count)
    }

    /// Fails the current call on the client. The client's next read fails
    /// with `TransportError::ServerSide`.
    pub fn send_failure(&mut self, failure: &RemoteFailure) -> Result<()> {
        self.channel.send_failure(failure)
    }

    pub fn send_error<E: std::error::Error + ?Sized>(&mut self, error: &E) -> Result<()> {
        self.send_failure(&RemoteFailure::from_error(error))
    }

    pub fn close(self) {
        self.channel.shutdown();
    }
}

impl BinaryRead for TransportServer {
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf)
    }
}

impl BinaryWrite for TransportServer {
    fn write_fully(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)
    }
}

impl Read for TransportServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TransportServer::read(self, buf).map_err(TransportError::into_io)
    }
}

impl Write for TransportServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf).map_err(TransportError::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        TransportServer::flush(self).map_err(TransportError::into_io)
    }
}
