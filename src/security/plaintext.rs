//! `plaintext/2.0.0`: identity exchange with no confidentiality (§4.8).
//!
//! Matches the wire shape real libp2p implementations use for their
//! plaintext fallback: each side sends a length-prefixed `{id, pubkey}`
//! record, then the raw connection is handed back unmodified as the
//! "secured" stream.

use async_trait::async_trait;
use futures::{AsyncReadExt, AsyncWriteExt};

use crate::error::Error;
use crate::identity::{Keypair, PublicKey};
use crate::security::{AuthenticatedConnBoxed, RawConnIo, SecurityProtocol};
use crate::PeerId;

pub struct Plaintext;

async fn write_exchange<IO: RawConnIo + ?Sized>(io: &mut IO, id: &PeerId, pk: &PublicKey) -> Result<(), Error> {
    let id_bytes = id.to_bytes();
    let pk_bytes = pk.marshal();
    let mut out = Vec::with_capacity(id_bytes.len() + pk_bytes.len() + 16);
    write_varint(&mut out, id_bytes.len());
    out.extend_from_slice(&id_bytes);
    write_varint(&mut out, pk_bytes.len());
    out.extend_from_slice(&pk_bytes);

    let mut frame = Vec::with_capacity(out.len() + 10);
    write_varint(&mut frame, out.len());
    frame.extend_from_slice(&out);
    io.write_all(&frame).await?;
    io.flush().await?;
    Ok(())
}

async fn read_exchange<IO: RawConnIo + ?Sized>(io: &mut IO) -> Result<(PeerId, PublicKey), Error> {
    let frame_len = read_varint(io).await?;
    let mut frame = vec![0u8; frame_len];
    io.read_exact(&mut frame).await?;
    let mut cursor = &frame[..];

    let id_len = read_varint_from_slice(&mut cursor)?;
    if cursor.len() < id_len {
        return Err(Error::HandshakeFailed("truncated peer id".into()));
    }
    let claimed_id = PeerId::from_bytes(&cursor[..id_len])
        .map_err(|e| Error::HandshakeFailed(format!("bad peer id: {e}")))?;
    cursor = &cursor[id_len..];

    let pk_len = read_varint_from_slice(&mut cursor)?;
    if cursor.len() < pk_len {
        return Err(Error::HandshakeFailed("truncated public key".into()));
    }
    let pk = PublicKey::unmarshal(&cursor[..pk_len])
        .map_err(|e| Error::HandshakeFailed(format!("bad public key: {e}")))?;

    if !claimed_id.matches_public_key(&pk) {
        return Err(Error::HandshakeFailed("claimed peer id does not match public key".into()));
    }
    Ok((claimed_id, pk))
}

fn write_varint(out: &mut Vec<u8>, len: usize) {
    let mut buf = unsigned_varint::encode::usize_buffer();
    let encoded = unsigned_varint::encode::usize(len, &mut buf);
    out.extend_from_slice(encoded);
}

async fn read_varint<IO: RawConnIo + ?Sized>(io: &mut IO) -> Result<usize, Error> {
    let mut byte = [0u8; 1];
    let mut encoded = Vec::with_capacity(10);
    loop {
        io.read_exact(&mut byte).await?;
        encoded.push(byte[0]);
        if byte[0] & 0x80 == 0 {
            break;
        }
        if encoded.len() > 10 {
            return Err(Error::InvalidFormat("varint too long".into()));
        }
    }
    let (len, _) = unsigned_varint::decode::usize(&encoded).map_err(|e| Error::InvalidFormat(e.to_string()))?;
    Ok(len)
}

fn read_varint_from_slice(cursor: &mut &[u8]) -> Result<usize, Error> {
    let (len, rest) = unsigned_varint::decode::usize(cursor).map_err(|e| Error::InvalidFormat(e.to_string()))?;
    *cursor = rest;
    Ok(len)
}

#[async_trait]
impl SecurityProtocol for Plaintext {
    fn protocol_id(&self) -> &str {
        "/plaintext/2.0.0"
    }

    async fn handshake_outbound(
        &self,
        mut io: Box<dyn RawConnIo>,
        expected_peer: Option<&PeerId>,
        local_identity: &Keypair,
    ) -> Result<AuthenticatedConnBoxed, Error> {
        let local_id = PeerId::from_public_key(&local_identity.public());
        write_exchange(&mut *io, &local_id, &local_identity.public()).await?;
        let (remote_id, remote_pk) = read_exchange(&mut *io).await?;
        if let Some(expected) = expected_peer {
            if &remote_id != expected {
                return Err(Error::PeerIdMismatch { expected: expected.clone(), actual: remote_id });
            }
        }
        Ok(crate::security::AuthenticatedConn {
            io,
            remote_peer: remote_id,
            remote_public_key: remote_pk,
            security_protocol_id: self.protocol_id().to_string(),
            local_addr: crate::multiaddr::Multiaddr::empty(),
            remote_addr: crate::multiaddr::Multiaddr::empty(),
        })
    }

    async fn handshake_inbound(
        &self,
        mut io: Box<dyn RawConnIo>,
        local_identity: &Keypair,
    ) -> Result<AuthenticatedConnBoxed, Error> {
        let local_id = PeerId::from_public_key(&local_identity.public());
        // Inbound writes first is immaterial for plaintext (no turn-taking
        // dependency), but matches the outbound side's send-then-receive shape.
        write_exchange(&mut *io, &local_id, &local_identity.public()).await?;
        let (remote_id, remote_pk) = read_exchange(&mut *io).await?;
        Ok(crate::security::AuthenticatedConn {
            io,
            remote_peer: remote_id,
            remote_public_key: remote_pk,
            security_protocol_id: self.protocol_id().to_string(),
            local_addr: crate::multiaddr::Multiaddr::empty(),
            remote_addr: crate::multiaddr::Multiaddr::empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SecurityUpgrader;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::{Listener, Transport};

    #[tokio::test]
    async fn handshake_exchanges_matching_identities() {
        let net = MemoryNetwork::new();
        let addr = crate::multiaddr::Multiaddr::parse("/ip4/127.0.0.1/tcp/9").unwrap();
        let server_transport = net.transport();
        let mut listener = server_transport.listen(&addr).await.unwrap();

        let client_identity = Keypair::generate_ed25519();
        let server_identity = Keypair::generate_ed25519();
        let server_peer_id = PeerId::from_public_key(&server_identity.public());

        let client_transport = net.transport();
        let addr2 = addr.clone();
        let client_upgrader = SecurityUpgrader::new(vec![Box::new(Plaintext)]);
        let client_task = tokio::spawn(async move {
            let conn = client_transport.dial(&addr2, None).await.unwrap();
            client_upgrader
                .upgrade_outbound(conn, Some(&server_peer_id), &client_identity)
                .await
        });

        let server_conn = listener.accept().await.unwrap();
        let server_upgrader = SecurityUpgrader::new(vec![Box::new(Plaintext)]);
        let server_result = server_upgrader.upgrade_inbound(server_conn, &server_identity).await.unwrap();
        let client_result = client_task.await.unwrap().unwrap();

        assert_eq!(client_result.remote_peer, server_result.remote_peer.clone());
        assert_eq!(server_result.security_protocol_id, "/plaintext/2.0.0");
    }

    #[tokio::test]
    async fn peer_id_mismatch_rejected() {
        let net = MemoryNetwork::new();
        let addr = crate::multiaddr::Multiaddr::parse("/ip4/127.0.0.1/tcp/10").unwrap();
        let server_transport = net.transport();
        let mut listener = server_transport.listen(&addr).await.unwrap();

        let client_identity = Keypair::generate_ed25519();
        let server_identity = Keypair::generate_ed25519();
        let wrong_expected = PeerId::from_public_key(&Keypair::generate_ed25519().public());

        let client_transport = net.transport();
        let addr2 = addr.clone();
        let client_upgrader = SecurityUpgrader::new(vec![Box::new(Plaintext)]);
        let client_task = tokio::spawn(async move {
            let conn = client_transport.dial(&addr2, None).await.unwrap();
            client_upgrader
                .upgrade_outbound(conn, Some(&wrong_expected), &client_identity)
                .await
        });

        let server_conn = listener.accept().await.unwrap();
        let server_upgrader = SecurityUpgrader::new(vec![Box::new(Plaintext)]);
        let _ = server_upgrader.upgrade_inbound(server_conn, &server_identity).await;

        assert!(matches!(client_task.await.unwrap(), Err(Error::PeerIdMismatch { .. })));
    }
}
