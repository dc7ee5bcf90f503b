//! Transport abstraction (§4.7): dial/listen over an opaque byte-stream.

pub mod memory;

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};

use crate::error::Error;
use crate::multiaddr::Multiaddr;
use crate::PeerId;

/// An authenticated-at-the-network-level-but-not-yet-secured byte stream
/// (§4.7). Concrete transports (TCP/UDX/QUIC) provide this; they are
/// consumed boundaries per §6 and not implemented by this crate.
pub trait RawConn: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn local_addr(&self) -> &Multiaddr;
    fn remote_addr(&self) -> &Multiaddr;
}

/// Yields accepted [`RawConn`]s and reports the address actually bound.
#[async_trait]
pub trait Listener: Send {
    type Conn: RawConn;

    async fn accept(&mut self) -> Result<Self::Conn, Error>;
    fn listen_addr(&self) -> &Multiaddr;
}

/// `dial`/`listen` interface over an opaque byte-stream transport (§4.7).
#[async_trait]
pub trait Transport: Send + Sync {
    type Conn: RawConn;
    type Listener: Listener<Conn = Self::Conn>;

    async fn dial(&self, addr: &Multiaddr, peer_id_hint: Option<&PeerId>) -> Result<Self::Conn, Error>;
    async fn listen(&self, addr: &Multiaddr) -> Result<Self::Listener, Error>;

    /// Whether this transport can in principle dial `addr` (protocol stack matches).
    fn can_dial(&self, addr: &Multiaddr) -> bool;

    /// The sequences of protocol codes this transport understands, e.g. `[ip4, tcp]`.
    fn protocols(&self) -> Vec<Vec<u32>>;
}
