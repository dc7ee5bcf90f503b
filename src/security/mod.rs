//! Security upgrader (§4.8): negotiate + execute a handshake that turns a
//! [`RawConn`] into an [`AuthenticatedConn`].
//!
//! Real deployments plug in Noise or TLS 1.3; this crate ships `plaintext/2.0.0`
//! (identity-exchange only, no confidentiality) as the one concrete upgrader,
//! matching how the teacher keeps a trivial security transport around for
//! tests and local development.

mod plaintext;

pub use plaintext::Plaintext;

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};

use crate::error::Error;
use crate::identity::PublicKey;
use crate::multistream;
use crate::transport::RawConn;
use crate::PeerId;

/// A raw connection after a successful security handshake (§4.8). All bytes
/// read/written through `io` from here on are attributed to the confirmed peer.
pub struct AuthenticatedConn<IO> {
    pub io: IO,
    pub remote_peer: PeerId,
    pub remote_public_key: PublicKey,
    pub security_protocol_id: String,
    pub local_addr: crate::multiaddr::Multiaddr,
    pub remote_addr: crate::multiaddr::Multiaddr,
}

/// One concrete security handshake, offered under a single protocol id.
#[async_trait]
pub trait SecurityProtocol: Send + Sync {
    fn protocol_id(&self) -> &str;

    async fn handshake_outbound(
        &self,
        io: Box<dyn RawConnIo>,
        expected_peer: Option<&PeerId>,
        local_identity: &crate::identity::Keypair,
    ) -> Result<AuthenticatedConnBoxed, Error>;

    async fn handshake_inbound(
        &self,
        io: Box<dyn RawConnIo>,
        local_identity: &crate::identity::Keypair,
    ) -> Result<AuthenticatedConnBoxed, Error>;
}

/// Object-safe stand-in for `AsyncRead + AsyncWrite + Unpin + Send` so
/// [`SecurityProtocol`] can be used as a trait object across protocol variants.
pub trait RawConnIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawConnIo for T {}

pub type AuthenticatedConnBoxed = AuthenticatedConn<Box<dyn RawConnIo>>;

/// Negotiates among the configured [`SecurityProtocol`]s via multistream-select,
/// then runs the winning handshake (§4.8, composed further in §4.10).
pub struct SecurityUpgrader {
    protocols: Vec<Box<dyn SecurityProtocol>>,
}

impl SecurityUpgrader {
    pub fn new(protocols: Vec<Box<dyn SecurityProtocol>>) -> Self {
        SecurityUpgrader { protocols }
    }

    pub async fn upgrade_outbound<C: RawConn>(
        &self,
        conn: C,
        expected_peer: Option<&PeerId>,
        local_identity: &crate::identity::Keypair,
    ) -> Result<AuthenticatedConnBoxed, Error> {
        let local_addr = conn.local_addr().clone();
        let remote_addr = conn.remote_addr().clone();
        let candidates: Vec<String> = self.protocols.iter().map(|p| p.protocol_id().to_string()).collect();
        if candidates.is_empty() {
            return Err(Error::NoMutualSecurity);
        }
        let mut boxed: Box<dyn RawConnIo> = Box::new(conn);
        let picked = multistream::negotiate_outbound(&mut boxed, &candidates)
            .await
            .map_err(|_| Error::NoMutualSecurity)?;
        let proto = self
            .protocols
            .iter()
            .find(|p| p.protocol_id() == picked)
            .ok_or(Error::NoMutualSecurity)?;
        let mut authenticated = proto.handshake_outbound(boxed, expected_peer, local_identity).await?;
        authenticated.local_addr = local_addr;
        authenticated.remote_addr = remote_addr;
        if let Some(expected) = expected_peer {
            if &authenticated.remote_peer != expected {
                return Err(Error::PeerIdMismatch {
                    expected: expected.clone(),
                    actual: authenticated.remote_peer,
                });
            }
        }
        Ok(authenticated)
    }

    pub async fn upgrade_inbound<C: RawConn>(
        &self,
        conn: C,
        local_identity: &crate::identity::Keypair,
    ) -> Result<AuthenticatedConnBoxed, Error> {
        let local_addr = conn.local_addr().clone();
        let remote_addr = conn.remote_addr().clone();
        let mut router = multistream::Router::new();
        for p in &self.protocols {
            router.add_handler(p.protocol_id());
        }
        let mut boxed: Box<dyn RawConnIo> = Box::new(conn);
        let picked = multistream::negotiate_inbound(&mut boxed, &router)
            .await
            .map_err(|_| Error::NoMutualSecurity)?;
        let proto = self
            .protocols
            .iter()
            .find(|p| p.protocol_id() == picked)
            .ok_or(Error::NoMutualSecurity)?;
        let mut authenticated = proto.handshake_inbound(boxed, local_identity).await?;
        authenticated.local_addr = local_addr;
        authenticated.remote_addr = remote_addr;
        Ok(authenticated)
    }
}
