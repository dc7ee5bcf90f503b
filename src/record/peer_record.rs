//! [`PeerRecord`] (§3, §4.3, §6): a signed advertisement of a peer's listen addresses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Error;
use crate::identity::{PeerId, PrivateKey};
use crate::multiaddr::Multiaddr;
use crate::record::envelope::Envelope;

/// Domain string envelopes carrying a [`PeerRecord`] must be sealed/consumed with (§6).
pub const PEER_RECORD_DOMAIN: &str = "libp2p-peer-record";
/// Payload-type tag for a [`PeerRecord`] (§6): `0x03 0x01`.
pub const PEER_RECORD_PAYLOAD_TYPE: [u8; 2] = [0x03, 0x01];

/// Process-wide monotonic sequence generator (§4.3, §E): wall-clock
/// milliseconds, bumped by at least 1 on a same-millisecond collision so two
/// records minted back-to-back in this process never tie.
static SEQ_FLOOR: AtomicU64 = AtomicU64::new(0);

pub fn next_seq() -> u64 {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    loop {
        let floor = SEQ_FLOOR.load(Ordering::SeqCst);
        let candidate = now_ms.max(floor + 1);
        if SEQ_FLOOR
            .compare_exchange(floor, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate;
        }
    }
}

/// {PeerId, addresses, monotonically increasing seq} (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub seq: u64,
    pub addresses: Vec<Multiaddr>,
}

impl PeerRecord {
    pub fn new(peer_id: PeerId, addresses: Vec<Multiaddr>) -> Self {
        PeerRecord { peer_id, seq: next_seq(), addresses }
    }

    /// Binary schema: `{peer_id: bytes, seq: uint64, addresses: repeated {multiaddr: bytes}}` (§6).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_field(&mut out, 1, &self.peer_id.to_bytes());
        write_varint_field(&mut out, 2, self.seq);
        for addr in &self.addresses {
            let mut inner = Vec::new();
            write_field(&mut inner, 1, &addr.encode());
            write_field(&mut out, 3, &inner);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = bytes;
        let mut peer_id = None;
        let mut seq = None;
        let mut addresses = Vec::new();

        while !cursor.is_empty() {
            let tag = cursor[0];
            cursor = &cursor[1..];
            let field_no = tag >> 3;
            let wire_type = tag & 0x7;
            match (field_no, wire_type) {
                (1, 2) => {
                    let (value, rest) = read_bytes_field(cursor)?;
                    peer_id = Some(PeerId::from_bytes(&value)?);
                    cursor = rest;
                }
                (2, 0) => {
                    let (value, rest) = unsigned_varint::decode::u64(cursor)
                        .map_err(|_| Error::InvalidFormat("bad seq varint".into()))?;
                    seq = Some(value);
                    cursor = rest;
                }
                (3, 2) => {
                    let (value, rest) = read_bytes_field(cursor)?;
                    cursor = rest;
                    // inner {multiaddr: bytes} message
                    if value.is_empty() || value[0] != 0x0a {
                        return Err(Error::InvalidFormat("bad address-info message".into()));
                    }
                    let (addr_bytes, remainder) = read_bytes_field(&value[1..])?;
                    if !remainder.is_empty() {
                        return Err(Error::InvalidFormat("trailing bytes in address-info".into()));
                    }
                    let addr_str = String::from_utf8(addr_bytes)
                        .map_err(|_| Error::InvalidFormat("multiaddr bytes not utf8".into()))?;
                    addresses.push(Multiaddr::parse(&addr_str)?);
                }
                _ => return Err(Error::InvalidFormat("unexpected peer record field".into())),
            }
        }

        Ok(PeerRecord {
            peer_id: peer_id.ok_or_else(|| Error::InvalidFormat("peer record missing peer_id".into()))?,
            seq: seq.ok_or_else(|| Error::InvalidFormat("peer record missing seq".into()))?,
            addresses,
        })
    }

    pub fn seal(&self, private_key: &PrivateKey) -> Result<Envelope, Error> {
        Envelope::seal(
            PEER_RECORD_DOMAIN,
            PEER_RECORD_PAYLOAD_TYPE.to_vec(),
            self.encode(),
            private_key,
        )
    }

    /// Parse and verify a sealed envelope, returning the typed record and signer's key.
    pub fn consume(envelope_bytes: &[u8]) -> Result<(Self, crate::identity::PublicKey), Error> {
        let envelope = Envelope::decode(envelope_bytes)?;
        envelope.verify(PEER_RECORD_DOMAIN)?;
        if envelope.payload_type != PEER_RECORD_PAYLOAD_TYPE {
            return Err(Error::WrongDomain { expected: PEER_RECORD_DOMAIN.to_string() });
        }
        let record = PeerRecord::decode(&envelope.payload)?;
        Ok((record, envelope.public_key))
    }
}

fn write_field(out: &mut Vec<u8>, field_no: u8, bytes: &[u8]) {
    out.push((field_no << 3) | 2);
    let mut buf = unsigned_varint::encode::usize_buffer();
    out.extend_from_slice(unsigned_varint::encode::usize(bytes.len(), &mut buf));
    out.extend_from_slice(bytes);
}

fn write_varint_field(out: &mut Vec<u8>, field_no: u8, value: u64) {
    out.push(field_no << 3); // wire type 0: varint
    let mut buf = unsigned_varint::encode::u64_buffer();
    out.extend_from_slice(unsigned_varint::encode::u64(value, &mut buf));
}

fn read_bytes_field(cursor: &[u8]) -> Result<(Vec<u8>, &[u8]), Error> {
    let (len, rest) = unsigned_varint::decode::usize(cursor)
        .map_err(|_| Error::InvalidFormat("bad length varint".into()))?;
    if rest.len() < len {
        return Err(Error::InvalidFormat("truncated field".into()));
    }
    Ok((rest[..len].to_vec(), &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn peer_and_key() -> (PeerId, PrivateKey) {
        let kp = Keypair::generate_ed25519();
        let (sk, pk) = kp.into_keypair();
        (PeerId::from_public_key(&pk), sk)
    }

    #[test]
    fn encode_decode_round_trip() {
        let (peer, sk) = peer_and_key();
        let record = PeerRecord {
            peer_id: peer,
            seq: 42,
            addresses: vec![Multiaddr::parse("/ip4/1.2.3.4/tcp/4001").unwrap()],
        };
        let envelope = record.seal(&sk).unwrap();
        let bytes = envelope.encode();
        let (decoded, pk) = PeerRecord::consume(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.peer_id.matches_public_key(&pk));
    }

    #[test]
    fn seq_strictly_increasing_within_process() {
        let a = next_seq();
        let b = next_seq();
        assert!(b > a);
    }

    #[test]
    fn wrong_payload_type_rejected() {
        let (_peer, sk) = peer_and_key();
        let env = Envelope::seal(PEER_RECORD_DOMAIN, vec![0xff], b"junk".to_vec(), &sk).unwrap();
        let bytes = env.encode();
        assert!(PeerRecord::consume(&bytes).is_err());
    }
}
