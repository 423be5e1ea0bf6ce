//! Transport failures.
//!
//! Like `StorageError`, these travel inside `eyre::Report`. The `io::Read`
//! and `io::Write` impls of the endpoints wrap them in `io::Error`, and
//! [`TransportError::from_io`] gets them back out.

use std::io;

use eyre::Result;

use crate::config::MAX_UTF_LENGTH;
use crate::encoding::modified_utf8;

/// Which end of a connection detected a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Server => write!(f, "server"),
        }
    }
}

/// A failure raised on one endpoint and shipped to the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    /// Type of the original failure, e.g. `std::io::Error`.
    pub kind: String,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        Self::new(std::any::type_name::<E>(), error.to_string())
    }

    /// Uses the outermost typed error in the chain when one is known. A
    /// failure received from the peer is forwarded unchanged.
    pub fn from_report(report: &eyre::Report) -> Self {
        if let Some(err) = report.downcast_ref::<TransportError>() {
            return match err {
                TransportError::ClientSide(inner) | TransportError::ServerSide(inner) => {
                    inner.clone()
                }
                other => Self::from_error(other),
            };
        }
        if let Some(err) = report.downcast_ref::<crate::storage::StorageError>() {
            return Self::from_error(err);
        }
        if report.downcast_ref::<io::Error>().is_some() {
            return Self::new(std::any::type_name::<io::Error>(), format!("{:#}", report));
        }
        Self::new("eyre::Report", format!("{:#}", report))
    }

    /// Two prefixed modified UTF-8 strings. Messages too long for one string
    /// are cut at a character boundary.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        modified_utf8::encode(truncate_encoded(&self.kind), &mut out)?;
        modified_utf8::encode(truncate_encoded(&self.message), &mut out)?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (kind, used) = modified_utf8::decode_prefixed(bytes)?;
        let (message, _) = modified_utf8::decode_prefixed(&bytes[used..])?;
        Ok(Self { kind, message })
    }
}

fn truncate_encoded(text: &str) -> &str {
    if modified_utf8::encoded_len(text) <= MAX_UTF_LENGTH {
        return text;
    }
    let mut total = 0;
    for (idx, ch) in text.char_indices() {
        let mut units = [0u16; 2];
        let len: usize = ch
            .encode_utf16(&mut units)
            .iter()
            .map(|&u| match u {
                0 => 2,
                0x01..=0x7F => 1,
                0x80..=0x7FF => 2,
                _ => 3,
            })
            .sum();
        if total + len > MAX_UTF_LENGTH {
            return &text[..idx];
        }
        total += len;
    }
    text
}

impl std::fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server sent a failure; seen by the client.
    ServerSide(RemoteFailure),
    /// The client sent a failure; seen by the server.
    ClientSide(RemoteFailure),
    /// A V2 frame or ack arrived for a later call than the local one.
    OutOfSync { side: Side, local: i32, remote: i32 },
    /// A client read or write outside `start_method` / `done_with_method`.
    NoActiveCall,
    /// The server refused the handshake.
    Rejected,
    Protocol(String),
    /// The peer closed the connection.
    Disconnected,
}

impl TransportError {
    /// Recovers the variant carried by an `io::Error` from an endpoint's
    /// `io::Read` or `io::Write` impl.
    pub fn from_io(error: &io::Error) -> Option<&TransportError> {
        error.get_ref()?.downcast_ref::<TransportError>()
    }

    pub fn of(report: &eyre::Report) -> Option<&TransportError> {
        report.downcast_ref::<TransportError>()
    }

    pub fn is_disconnect(report: &eyre::Report) -> bool {
        matches!(Self::of(report), Some(TransportError::Disconnected))
    }

    pub(crate) fn into_io(report: eyre::Report) -> io::Error {
        match report.downcast::<TransportError>() {
            Ok(TransportError::Disconnected) => {
                io::Error::new(io::ErrorKind::UnexpectedEof, TransportError::Disconnected)
            }
            Ok(err) => io::Error::other(err),
            Err(report) => match report.downcast::<io::Error>() {
                Ok(err) => err,
                Err(report) => io::Error::other(format!("{:#}", report)),
            },
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::ServerSide(failure) => write!(f, "server side failure: {}", failure),
            TransportError::ClientSide(failure) => write!(f, "client side failure: {}", failure),
            TransportError::OutOfSync {
                side,
                local,
                remote,
            } => write!(
                f,
                "{} lost synchronization: local call {}, peer call {}",
                side, local, remote
            ),
            TransportError::NoActiveCall => write!(f, "no method call in progress"),
            TransportError::Rejected => write!(f, "server refused the connection"),
            TransportError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            TransportError::Disconnected => write!(f, "remote host has disconnected"),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_encoding_round_trips() {
        let failure = RemoteFailure::new("SpecialFailure", "yea!");
        let decoded = RemoteFailure::decode(&failure.encode().unwrap()).unwrap();

        assert_eq!(decoded, failure);
    }

    #[test]
    fn long_message_is_truncated_to_fit() {
        let failure = RemoteFailure::new("k", "\u{20ac}".repeat(30_000));
        let decoded = RemoteFailure::decode(&failure.encode().unwrap()).unwrap();

        assert_eq!(decoded.message.chars().count(), MAX_UTF_LENGTH / 3);
    }

    #[test]
    fn from_error_uses_type_name() {
        let err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let failure = RemoteFailure::from_error(&err);

        assert!(failure.kind.ends_with("Error"));
        assert_eq!(failure.message, "missing");
    }

    #[test]
    fn io_wrapping_preserves_variant() {
        let io_err = TransportError::into_io(eyre::eyre!(TransportError::NoActiveCall));
        assert_eq!(
            TransportError::from_io(&io_err),
            Some(&TransportError::NoActiveCall)
        );

        let eof = TransportError::into_io(eyre::eyre!(TransportError::Disconnected));
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(
            TransportError::from_io(&eof),
            Some(&TransportError::Disconnected)
        );
    }
}
