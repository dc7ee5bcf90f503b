//! Crate-wide error kinds.
//!
//! Each variant corresponds to one of the abstract error kinds in the design
//! document. Modules re-export the subset relevant to their public API but
//! all errors ultimately resolve to a variant here so callers can match on a
//! single type if they choose to.

use std::net::SocketAddr;
use thiserror::Error;

use crate::multiaddr::Multiaddr;
use crate::PeerId;

/// Aggregate error produced by a failed dial attempt against a single candidate address.
#[derive(Debug, Clone)]
pub struct DialAttemptError {
    pub address: Multiaddr,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("envelope domain mismatch: expected {expected:?}, found in envelope")]
    WrongDomain { expected: String },

    #[error("public/private key does not match the claimed peer id")]
    IdentityMismatch,

    #[error("no mutual protocol could be negotiated")]
    NoMutualProtocol,

    #[error("no mutual security protocol could be negotiated")]
    NoMutualSecurity,

    #[error("no mutual stream muxer could be negotiated")]
    NoMutualMuxer,

    #[error("address unreachable: {0}")]
    Unreachable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("security handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("remote peer id mismatch: expected {expected}, got {actual}")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },

    #[error("resource limit exceeded")]
    ResourceLimitExceeded,

    #[error("resource scope already closed")]
    ScopeClosed,

    #[error("all dial attempts failed")]
    DialFailed { attempts: Vec<DialAttemptError> },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("stream reset")]
    StreamReset,

    #[error("stream closed")]
    StreamClosed,

    #[error("not found")]
    NotFound,

    #[error("blocked by connection gater")]
    Blocked,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub(crate) fn socket_addr_unreachable(addr: SocketAddr) -> Error {
    Error::Unreachable(addr.to_string())
}

pub type Result<T> = std::result::Result<T, Error>;
