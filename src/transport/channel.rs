//! # Framed Channel
//!
//! `Channel` is the state shared by both endpoints: the socket, the
//! negotiated version, the call order, and one buffer in each direction.
//!
//! ## Send Path
//!
//! ```text
//! write() ──> send_buf [header | payload ...]
//!               │ full, flush(), or any read
//!               ▼
//!            one frame on the socket ──> (V2) wait for ACK
//! ```
//!
//! The header is filled in place when the frame is sent, so header and
//! payload go out in a single write.
//!
//! ## Receive Path
//!
//! `receive_header` loops until it finds a frame for the current call:
//!
//! | Frame                   | Action                                    |
//! |-------------------------|-------------------------------------------|
//! | payload, same order     | returned to the caller                    |
//! | payload, lower order    | stale: drained, acked, logged             |
//! | payload, higher order   | stashed, acked, `OutOfSync`               |
//! | failure, lower order    | dropped                                   |
//! | failure                 | `ServerSide` / `ClientSide` error         |
//! | ack, lower order        | dropped                                   |
//! | ack otherwise           | protocol error                            |
//!
//! A stashed payload is handed out once the local call order catches up
//! with it, so a call the peer started early is not lost.
//!
//! V1 frames carry no order, so every V1 frame belongs to the current call.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;

use eyre::{bail, Result, WrapErr};
use tracing::{debug, warn};

use super::error::{RemoteFailure, Side, TransportError};
use super::frame::{encode_ack, FrameHeader, FrameKind};
use super::version::ProtocolVersion;

#[derive(Debug)]
pub(crate) struct Channel {
    stream: TcpStream,
    version: ProtocolVersion,
    side: Side,
    pub(crate) order: i32,
    send_buf: Vec<u8>,
    recv_buf: Vec<u8>,
    recv_pos: usize,
    stash: Option<(i32, Vec<u8>)>,
}

fn map_read_error(err: io::Error) -> eyre::Report {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => eyre::eyre!(TransportError::Disconnected),
        _ => eyre::Report::new(err),
    }
}

impl Channel {
    pub(crate) fn new(stream: TcpStream, version: ProtocolVersion, side: Side, order: i32) -> Self {
        let mut send_buf = Vec::with_capacity(version.max_message_size());
        send_buf.resize(version.header_size(), 0);
        Self {
            stream,
            version,
            side,
            order,
            send_buf,
            recv_buf: Vec::new(),
            recv_pos: 0,
            stash: None,
        }
    }

    pub(crate) fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    fn pending(&self) -> usize {
        self.send_buf.len() - self.version.header_size()
    }

    pub(crate) fn buffered(&self) -> usize {
        self.recv_buf.len() - self.recv_pos
    }

    /// Forgets unsent payload and unread input of the current call.
    pub(crate) fn reset_call_state(&mut self) {
        self.send_buf.truncate(self.version.header_size());
        self.recv_buf.clear();
        self.recv_pos = 0;
    }

    pub(crate) fn discard_input(&mut self) {
        self.recv_buf.clear();
        self.recv_pos = 0;
    }

    fn read_socket(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream.read_exact(buf).map_err(map_read_error)
    }

    fn write_socket(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf).map_err(map_read_error)
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    pub(crate) fn write(&mut self, mut data: &[u8]) -> Result<()> {
        let max = self.version.max_payload();
        while !data.is_empty() {
            let room = max - self.pending();
            let n = room.min(data.len());
            self.send_buf.extend_from_slice(&data[..n]);
            data = &data[n..];
            if self.pending() == max {
                self.send_frame(FrameKind::Data)?;
            }
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.pending() > 0 {
            self.send_frame(FrameKind::Data)?;
        }
        self.stream.flush().map_err(map_read_error)
    }

    fn send_frame(&mut self, kind: FrameKind) -> Result<()> {
        let header = FrameHeader {
            kind,
            len: self.pending(),
            order: Some(self.order),
        };
        let header_size = self.version.header_size();
        header.encode(self.version, &mut self.send_buf[..header_size])?;

        let frame = std::mem::take(&mut self.send_buf);
        let result = self.write_socket(&frame);
        self.send_buf = frame;
        self.send_buf.truncate(header_size);
        result?;

        if kind.is_payload() {
            self.wait_for_ack()?;
        }
        Ok(())
    }

    /// Sends a failure frame. Buffered output is flushed first and unread
    /// input of the current call is dropped.
    pub(crate) fn send_failure(&mut self, failure: &RemoteFailure) -> Result<()> {
        self.flush()?;
        self.discard_input();

        let payload = failure.encode()?;
        let mut header_buf = vec![0u8; self.version.header_size()];
        FrameHeader {
            kind: FrameKind::Failure,
            len: payload.len(),
            order: Some(self.order),
        }
        .encode(self.version, &mut header_buf)?;

        header_buf.extend_from_slice(&payload);
        self.write_socket(&header_buf)?;
        debug!(side = %self.side, kind = %failure.kind, "sent failure");
        Ok(())
    }

    /// Acknowledges a frame, echoing the order the frame was sent with.
    fn send_ack(&mut self, order: i32) -> Result<()> {
        if self.version.is_ordered() {
            let ack = encode_ack(order);
            self.write_socket(&ack)?;
        }
        Ok(())
    }

    fn wait_for_ack(&mut self) -> Result<()> {
        if !self.version.is_ordered() {
            return Ok(());
        }
        loop {
            let mut kind = [0u8; 1];
            self.read_socket(&mut kind)?;
            match FrameKind::from_byte(kind[0])? {
                FrameKind::Ack => {
                    let mut order = [0u8; 4];
                    self.read_socket(&mut order)?;
                    let remote = i32::from_be_bytes(order);
                    if remote < self.order {
                        debug!(side = %self.side, remote, local = self.order, "dropping old ack");
                        continue;
                    }
                    if remote > self.order {
                        bail!(self.out_of_sync(remote));
                    }
                    return Ok(());
                }
                FrameKind::Failure => {
                    let header = self.read_header_rest(FrameKind::Failure)?;
                    let failure = self.read_failure(header.len)?;
                    if Self::is_stale(header.order, self.order) {
                        continue;
                    }
                    bail!(self.remote_error(failure));
                }
                other => bail!(TransportError::Protocol(format!(
                    "expected ACK but got {:?} frame",
                    other
                ))),
            }
        }
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    fn read_header_rest(&mut self, kind: FrameKind) -> Result<FrameHeader> {
        let mut rest = [0u8; 8];
        let n = self.version.header_size() - 1;
        self.read_socket(&mut rest[..n])?;
        FrameHeader::decode(self.version, kind, &rest[..n])
            .map_err(|e| eyre::eyre!(TransportError::Protocol(format!("{:#}", e))))
    }

    fn read_failure(&mut self, len: usize) -> Result<RemoteFailure> {
        let mut payload = vec![0u8; len];
        self.read_socket(&mut payload)?;
        RemoteFailure::decode(&payload).wrap_err("failed to decode remote failure")
    }

    fn is_stale(order: Option<i32>, local: i32) -> bool {
        matches!(order, Some(remote) if remote < local)
    }

    fn out_of_sync(&self, remote: i32) -> TransportError {
        TransportError::OutOfSync {
            side: self.side,
            local: self.order,
            remote,
        }
    }

    fn remote_error(&self, failure: RemoteFailure) -> TransportError {
        match self.side {
            Side::Client => TransportError::ServerSide(failure),
            Side::Server => TransportError::ClientSide(failure),
        }
    }

    /// Reads frame headers until a payload frame of the current call arrives
    /// and returns its payload length. The payload itself is left on the
    /// socket.
    fn receive_header(&mut self) -> Result<usize> {
        loop {
            let mut kind = [0u8; 1];
            self.read_socket(&mut kind)?;
            let kind = FrameKind::from_byte(kind[0])
                .map_err(|e| eyre::eyre!(TransportError::Protocol(format!("{:#}", e))))?;

            match kind {
                FrameKind::Ack => {
                    let mut order = [0u8; 4];
                    self.read_socket(&mut order)?;
                    let remote = i32::from_be_bytes(order);
                    if remote < self.order {
                        warn!(side = %self.side, remote, local = self.order, "dropping old ack");
                        continue;
                    }
                    bail!(TransportError::Protocol(
                        "expected message but got ack".into()
                    ));
                }
                FrameKind::Failure => {
                    let header = self.read_header_rest(kind)?;
                    let failure = self.read_failure(header.len)?;
                    if Self::is_stale(header.order, self.order) {
                        warn!(side = %self.side, "dropping failure from an earlier call");
                        continue;
                    }
                    bail!(self.remote_error(failure));
                }
                FrameKind::Data | FrameKind::File => {
                    let header = self.read_header_rest(kind)?;
                    match header.order {
                        Some(remote) if remote < self.order => {
                            warn!(
                                side = %self.side,
                                remote,
                                local = self.order,
                                bytes = header.len,
                                "dropping message from an earlier call"
                            );
                            let mut discard = vec![0u8; header.len];
                            self.read_socket(&mut discard)?;
                            self.send_ack(remote)?;
                            continue;
                        }
                        Some(remote) if remote > self.order => {
                            let mut payload = vec![0u8; header.len];
                            self.read_socket(&mut payload)?;
                            self.stash = Some((remote, payload));
                            self.send_ack(remote)?;
                            bail!(self.out_of_sync(remote));
                        }
                        _ => return Ok(header.len),
                    }
                }
            }
        }
    }

    /// Moves a stashed payload into `recv_buf` once it belongs to the
    /// current call.
    fn take_stash(&mut self) -> bool {
        match self.stash.take() {
            Some((order, payload)) if order == self.order => {
                self.recv_buf = payload;
                self.recv_pos = 0;
                true
            }
            Some(stashed) if stashed.0 > self.order => {
                self.stash = Some(stashed);
                false
            }
            _ => false,
        }
    }

    fn receive_frame(&mut self) -> Result<()> {
        if self.take_stash() {
            return Ok(());
        }
        let len = self.receive_header()?;
        self.recv_buf.resize(len, 0);
        self.recv_pos = 0;
        let mut buf = std::mem::take(&mut self.recv_buf);
        let read = self.read_socket(&mut buf);
        self.recv_buf = buf;
        read?;
        self.send_ack(self.order)
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.flush()?;
        while self.buffered() == 0 {
            self.receive_frame()?;
        }
        let n = self.buffered().min(buf.len());
        buf[..n].copy_from_slice(&self.recv_buf[self.recv_pos..self.recv_pos + n]);
        self.recv_pos += n;
        Ok(n)
    }

    pub(crate) fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bulk file transfer
    // ------------------------------------------------------------------

    /// Streams `count` bytes of `file` starting at `start`, one frame per
    /// payload, straight from the file to the socket.
    pub(crate) fn send_file(&mut self, file: &File, start: u64, count: u64) -> Result<()> {
        self.flush()?;
        let mut reader = file;
        reader
            .seek(SeekFrom::Start(start))
            .wrap_err_with(|| format!("failed to seek source file to {}", start))?;

        let max = self.version.max_payload() as u64;
        let header_size = self.version.header_size();
        let mut remaining = count;
        while remaining > 0 {
            let payload = remaining.min(max);
            let mut header = [0u8; 9];
            FrameHeader {
                kind: FrameKind::File,
                len: payload as usize,
                order: Some(self.order),
            }
            .encode(self.version, &mut header)?;
            self.write_socket(&header[..header_size])?;

            let copied = io::copy(&mut reader.take(payload), &mut self.stream)
                .map_err(map_read_error)?;
            if copied != payload {
                bail!(
                    "source file ended after {} of {} bytes",
                    count - remaining + copied,
                    count
                );
            }
            remaining -= payload;
            self.wait_for_ack()?;
        }
        Ok(())
    }

    /// Writes `count` received bytes into `file` starting at `start`.
    /// Already buffered payload is drained first; the rest is copied
    /// straight from the socket.
    pub(crate) fn receive_file(&mut self, file: &File, start: u64, count: u64) -> Result<()> {
        self.flush()?;
        let mut writer = file;
        writer
            .seek(SeekFrom::Start(start))
            .wrap_err_with(|| format!("failed to seek destination file to {}", start))?;

        let mut remaining = count;
        let mut frame_left = 0u64;
        while remaining > 0 {
            if self.buffered() > 0 {
                let n = (self.buffered() as u64).min(remaining) as usize;
                writer
                    .write_all(&self.recv_buf[self.recv_pos..self.recv_pos + n])
                    .wrap_err("failed to write destination file")?;
                self.recv_pos += n;
                remaining -= n as u64;
                continue;
            }

            if frame_left == 0 {
                if self.take_stash() {
                    continue;
                }
                frame_left = self.receive_header()? as u64;
                if frame_left == 0 {
                    self.send_ack(self.order)?;
                    continue;
                }
            }
            let want = remaining.min(frame_left);
            let copied = {
                let mut source = (&self.stream).take(want);
                io::copy(&mut source, &mut writer).map_err(map_read_error)?
            };
            if copied == 0 {
                bail!(TransportError::Disconnected);
            }
            remaining -= copied;
            frame_left -= copied;
            if frame_left == 0 {
                self.send_ack(self.order)?;
            }
        }

        if frame_left > 0 {
            // The caller asked for less than the frame held; keep the rest.
            self.recv_buf.resize(frame_left as usize, 0);
            self.recv_pos = 0;
            let mut buf = std::mem::take(&mut self.recv_buf);
            let read = self.read_socket(&mut buf);
            self.recv_buf = buf;
            read?;
            self.send_ack(self.order)?;
        }
        Ok(())
    }

    pub(crate) fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(std::net::Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!(side = %self.side, error = %e, "socket shutdown failed");
            }
        }
    }
}
