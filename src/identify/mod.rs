//! Identify protocol core (§4.15 collaborator, wire schema in §6): once a
//! connection is established, each side opens a dedicated stream and the
//! acceptor replies with `{public_key, listen_addrs, protocols,
//! observed_addr, protocol_version, agent_version, signed_peer_record}`.
//!
//! Grounded in the `identify.rs` reference (inbound substream answers
//! immediately with local info, one outbound substream per new connection
//! reads and parses the remote's answer) translated from its protobuf/prost
//! framing to this crate's own varint-tagged field encoding, matching
//! `record::peer_record`'s style.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::Error;
use crate::host::{Host, StreamHandler};
use crate::identity::{Keypair, PublicKey};
use crate::multiaddr::{Multiaddr, Protocol};
use crate::peerstore::TTL_CONNECTED;
use crate::record::PeerRecord;
use crate::swarm::{Stream, SwarmEvent};
use crate::transport::Transport;
use crate::PeerId;

const LOG_TARGET: &str = "junction::identify";
const DEFAULT_PROTOCOL_ID: &str = "/junction/id/1.0.0";
const DEFAULT_PROTOCOL_VERSION: &str = "junction/1.0.0";
const MAX_MESSAGE_LEN: usize = 16 * 1024;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IdentifyConfig {
    pub protocol_id: String,
    pub protocol_version: String,
    pub agent_version: String,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        IdentifyConfig {
            protocol_id: DEFAULT_PROTOCOL_ID.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            agent_version: format!("junction/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// The decoded contents of a peer's identify response (§6).
#[derive(Debug, Clone, Default)]
pub struct IdentifyInfo {
    pub public_key: Option<PublicKey>,
    pub listen_addrs: Vec<Multiaddr>,
    pub protocols: Vec<String>,
    pub observed_addr: Option<Multiaddr>,
    pub protocol_version: Option<String>,
    pub agent_version: Option<String>,
    pub signed_peer_record: Option<Vec<u8>>,
}

impl IdentifyInfo {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(pk) = &self.public_key {
            write_bytes_field(&mut out, 1, &pk.marshal());
        }
        for addr in &self.listen_addrs {
            write_bytes_field(&mut out, 2, &addr.encode());
        }
        for protocol in &self.protocols {
            write_bytes_field(&mut out, 3, protocol.as_bytes());
        }
        if let Some(addr) = &self.observed_addr {
            write_bytes_field(&mut out, 4, &addr.encode());
        }
        if let Some(v) = &self.protocol_version {
            write_bytes_field(&mut out, 5, v.as_bytes());
        }
        if let Some(v) = &self.agent_version {
            write_bytes_field(&mut out, 6, v.as_bytes());
        }
        if let Some(record) = &self.signed_peer_record {
            write_bytes_field(&mut out, 7, record);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut info = IdentifyInfo::default();
        let mut cursor = bytes;
        while !cursor.is_empty() {
            let tag = cursor[0];
            cursor = &cursor[1..];
            let field_no = tag >> 3;
            if tag & 0x7 != 2 {
                return Err(Error::InvalidFormat("unexpected identify wire type".into()));
            }
            let (value, rest) = read_bytes_field(cursor)?;
            cursor = rest;
            match field_no {
                1 => info.public_key = Some(PublicKey::unmarshal(&value)?),
                2 => info.listen_addrs.push(decode_multiaddr(&value)?),
                3 => info.protocols.push(decode_utf8(value)?),
                4 => info.observed_addr = Some(decode_multiaddr(&value)?),
                5 => info.protocol_version = Some(decode_utf8(value)?),
                6 => info.agent_version = Some(decode_utf8(value)?),
                7 => info.signed_peer_record = Some(value),
                _ => {} // forward-compatible: ignore unknown fields
            }
        }
        Ok(info)
    }
}

fn write_bytes_field(out: &mut Vec<u8>, field_no: u8, bytes: &[u8]) {
    out.push((field_no << 3) | 2);
    let mut buf = unsigned_varint::encode::usize_buffer();
    out.extend_from_slice(unsigned_varint::encode::usize(bytes.len(), &mut buf));
    out.extend_from_slice(bytes);
}

fn read_bytes_field(cursor: &[u8]) -> Result<(Vec<u8>, &[u8]), Error> {
    let (len, rest) = unsigned_varint::decode::usize(cursor)
        .map_err(|_| Error::InvalidFormat("bad length varint".into()))?;
    if rest.len() < len {
        return Err(Error::InvalidFormat("truncated identify field".into()));
    }
    Ok((rest[..len].to_vec(), &rest[len..]))
}

fn decode_multiaddr(bytes: &[u8]) -> Result<Multiaddr, Error> {
    Multiaddr::parse(&decode_utf8(bytes.to_vec())?)
}

fn decode_utf8(bytes: Vec<u8>) -> Result<String, Error> {
    String::from_utf8(bytes).map_err(|e| Error::InvalidFormat(e.to_string()))
}

async fn write_message<W: futures::AsyncWrite + Unpin>(io: &mut W, bytes: &[u8]) -> Result<(), Error> {
    let mut len_buf = unsigned_varint::encode::usize_buffer();
    let len_bytes = unsigned_varint::encode::usize(bytes.len(), &mut len_buf);
    io.write_all(len_bytes).await?;
    io.write_all(bytes).await?;
    io.flush().await?;
    Ok(())
}

async fn read_message<R: futures::AsyncRead + Unpin>(io: &mut R) -> Result<Vec<u8>, Error> {
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
    if len > MAX_MESSAGE_LEN {
        return Err(Error::InvalidFormat("identify message too large".into()));
    }
    let mut body = vec![0u8; len];
    io.read_exact(&mut body).await?;
    Ok(body)
}

/// Emitted via the host's [`crate::event_bus::EventBus`] once a peer's
/// identify response has been read and applied to the peerstore.
#[derive(Debug, Clone)]
pub struct Identified {
    pub peer: PeerId,
    pub info: IdentifyInfo,
}

/// Drives identify for one [`Host`]: answers inbound requests with local
/// info and, on every new connection, opens an outbound request of its own.
pub struct IdentifyService<T: Transport> {
    host: Arc<Host<T>>,
    local_key: Arc<Keypair>,
    config: IdentifyConfig,
}

impl<T: Transport + 'static> IdentifyService<T> {
    pub fn new(host: Arc<Host<T>>, local_key: Arc<Keypair>, config: IdentifyConfig) -> Self {
        IdentifyService { host, local_key, config }
    }

    /// Register the inbound handler and start reacting to new connections.
    /// May be called once; the returned background task lives as long as the
    /// host's `Connected` events keep arriving.
    pub fn start(&self) {
        let host = self.host.clone();
        let local_key = self.local_key.clone();
        let config = self.config.clone();
        let handler: StreamHandler = Arc::new(move |stream, peer| {
            let host = host.clone();
            let local_key = local_key.clone();
            let config = config.clone();
            Box::pin(async move {
                respond(stream, peer, &host, &local_key, &config).await;
            }) as BoxFuture<'static, ()>
        });
        self.host.set_stream_handler(&self.config.protocol_id, handler);

        let host = self.host.clone();
        let config = self.config.clone();
        let mut events = self.host.network().subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let SwarmEvent::Connected(peer) = event {
                    let host = host.clone();
                    let config = config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = request(&host, &peer, &config).await {
                            debug!(target: LOG_TARGET, peer = %peer, error = %e, "identify request failed");
                        }
                    });
                }
            }
        });
    }
}

fn local_info<T: Transport>(host: &Host<T>, local_key: &Keypair, config: &IdentifyConfig, observed_addr: Option<Multiaddr>) -> IdentifyInfo {
    let local_peer = host.id().clone();
    let listen_addrs: Vec<Multiaddr> = host
        .addrs()
        .into_iter()
        .map(|addr| if addr.peer_id().is_some() { addr } else { addr.with(Protocol::P2p(local_peer.clone())) })
        .collect();

    let signed_peer_record = PeerRecord::new(local_peer, listen_addrs.clone())
        .seal(local_key.private())
        .map(|envelope| envelope.encode())
        .map_err(|e| warn!(target: LOG_TARGET, error = %e, "failed to seal local peer record"))
        .ok();

    IdentifyInfo {
        public_key: Some(local_key.public()),
        listen_addrs,
        protocols: host.protocols(),
        observed_addr,
        protocol_version: Some(config.protocol_version.clone()),
        agent_version: Some(config.agent_version.clone()),
        signed_peer_record,
    }
}

async fn respond<T: Transport + 'static>(mut stream: Stream, peer: PeerId, host: &Host<T>, local_key: &Keypair, config: &IdentifyConfig) {
    let observed_addr = host.network().connection(&peer).map(|tracked| tracked.conn.remote_addr.without_peer_id());
    let info = local_info(host, local_key, config, observed_addr);
    let encoded = info.encode();
    match tokio::time::timeout(RESPONSE_TIMEOUT, write_message(&mut stream, &encoded)).await {
        Ok(Ok(())) => stream.close().await,
        Ok(Err(e)) => {
            debug!(target: LOG_TARGET, peer = %peer, error = %e, "failed to send identify response");
            stream.reset().await;
        }
        Err(_) => {
            debug!(target: LOG_TARGET, peer = %peer, "timed out sending identify response");
            stream.reset().await;
        }
    }
}

async fn request<T: Transport + 'static>(host: &Arc<Host<T>>, peer: &PeerId, config: &IdentifyConfig) -> Result<(), Error> {
    let mut stream = host.new_stream(peer, &[config.protocol_id.clone()]).await?;
    let body = tokio::time::timeout(RESPONSE_TIMEOUT, read_message(&mut stream))
        .await
        .map_err(|_| Error::Timeout)??;
    stream.close().await;

    let mut info = IdentifyInfo::decode(&body)?;
    info.listen_addrs.retain(|addr| addr_belongs_to(addr, peer));
    if let Some(observed) = &info.observed_addr {
        if !addr_belongs_to(observed, host.id()) && observed.peer_id().is_some() {
            info.observed_addr = None;
        }
    }

    if !info.listen_addrs.is_empty() {
        host.peerstore().add_addrs(peer, &info.listen_addrs, TTL_CONNECTED);
        host.network().discovery().insert(crate::discovery::AddrInfo { peer: peer.clone(), addrs: info.listen_addrs.clone() });
    }
    if let Some(envelope_bytes) = &info.signed_peer_record {
        match host.peerstore().consume_peer_record(peer, envelope_bytes) {
            Ok(true) => {}
            Ok(false) => debug!(target: LOG_TARGET, peer = %peer, "signed peer record seq not newer, ignored"),
            Err(e) => warn!(target: LOG_TARGET, peer = %peer, error = %e, "signed peer record rejected"),
        }
    }
    if !info.protocols.is_empty() {
        host.peerstore().protocols.set(peer, info.protocols.clone());
    }
    if let Some(pk) = &info.public_key {
        if let Err(e) = host.peerstore().keys.add_pub_key(peer, pk.clone()) {
            warn!(target: LOG_TARGET, peer = %peer, error = %e, "identify reported a public key that does not match the peer id");
        }
    }

    host.event_bus().emitter::<Identified>(false).emit(Identified { peer: peer.clone(), info });
    Ok(())
}

/// A listen/observed address is only trusted if it has no peer-id tail or
/// that tail matches the peer claiming it (§9 "Open questions" note on
/// trusting remote-reported addresses is resolved here: discard, don't guess).
fn addr_belongs_to(addr: &Multiaddr, expected: &PeerId) -> bool {
    match addr.peer_id() {
        Some(pid) => pid == expected,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_encoding() {
        let kp = Keypair::generate_ed25519();
        let info = IdentifyInfo {
            public_key: Some(kp.public()),
            listen_addrs: vec![Multiaddr::parse("/ip4/127.0.0.1/tcp/4001").unwrap()],
            protocols: vec!["/junction/id/1.0.0".to_string(), "/echo/1.0.0".to_string()],
            observed_addr: Some(Multiaddr::parse("/ip4/1.2.3.4/tcp/9").unwrap()),
            protocol_version: Some("junction/1.0.0".to_string()),
            agent_version: Some("junction/0.1.0".to_string()),
            signed_peer_record: Some(vec![1, 2, 3]),
        };
        let bytes = info.encode();
        let decoded = IdentifyInfo::decode(&bytes).unwrap();
        assert_eq!(decoded.public_key, info.public_key);
        assert_eq!(decoded.listen_addrs, info.listen_addrs);
        assert_eq!(decoded.protocols, info.protocols);
        assert_eq!(decoded.observed_addr, info.observed_addr);
        assert_eq!(decoded.protocol_version, info.protocol_version);
        assert_eq!(decoded.agent_version, info.agent_version);
        assert_eq!(decoded.signed_peer_record, info.signed_peer_record);
    }

    #[test]
    fn empty_info_round_trips() {
        let info = IdentifyInfo::default();
        let bytes = info.encode();
        assert!(bytes.is_empty());
        let decoded = IdentifyInfo::decode(&bytes).unwrap();
        assert_eq!(decoded.listen_addrs, Vec::<Multiaddr>::new());
    }

    #[test]
    fn addr_ownership_check_accepts_addrs_without_peer_id() {
        let peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        let addr = Multiaddr::parse("/ip4/127.0.0.1/tcp/4001").unwrap();
        assert!(addr_belongs_to(&addr, &peer));
    }

    #[test]
    fn addr_ownership_check_rejects_mismatched_peer_id() {
        let peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        let other = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        let addr = Multiaddr::parse("/ip4/127.0.0.1/tcp/4001").unwrap().with(Protocol::P2p(other));
        assert!(!addr_belongs_to(&addr, &peer));
    }
}
