//! CertifiedAddrBook: the highest-seq signed [`PeerRecord`] observed per peer
//! (§3 PeerRecord invariant, Testable Property 4, scenario S4).
//!
//! A PeerRecord declares a peer's complete current address set, so accepting
//! one replaces whatever a lower-seq record for the same peer said, rather
//! than merging with it — unlike [`super::AddrBook`]'s TTL-extending union,
//! which has no seq to arbitrate conflicting entries.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Error;
use crate::multiaddr::Multiaddr;
use crate::record::PeerRecord;
use crate::PeerId;

pub struct CertifiedAddrBook {
    latest: Mutex<HashMap<PeerId, PeerRecord>>,
}

impl Default for CertifiedAddrBook {
    fn default() -> Self {
        Self::new()
    }
}

impl CertifiedAddrBook {
    pub fn new() -> Self {
        CertifiedAddrBook { latest: Mutex::new(HashMap::new()) }
    }

    /// Verify a sealed envelope as a [`PeerRecord`] signed by `expected_peer`
    /// and, if its seq is strictly greater than the highest seen so far for
    /// that peer, replace the stored record with it. Returns `Ok(true)` if
    /// accepted, `Ok(false)` if silently rejected for being at or below the
    /// known seq (§3, Testable Property 4, scenario S4) — accepted in either
    /// arrival order, since a lower-seq record is never merged in at all.
    pub fn consume_record(&self, expected_peer: &PeerId, envelope_bytes: &[u8]) -> Result<bool, Error> {
        let (record, signer) = PeerRecord::consume(envelope_bytes)?;
        if record.peer_id != *expected_peer || !expected_peer.matches_public_key(&signer) {
            return Err(Error::IdentityMismatch);
        }

        let mut latest = self.latest.lock();
        let accepted = !matches!(latest.get(&record.peer_id), Some(current) if record.seq <= current.seq);
        if accepted {
            latest.insert(record.peer_id.clone(), record);
        }
        Ok(accepted)
    }

    /// The certified address set for `peer` from the latest accepted record,
    /// or empty if none has ever been accepted.
    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.latest.lock().get(peer).map(|r| r.addresses.clone()).unwrap_or_default()
    }

    pub fn seq(&self, peer: &PeerId) -> Option<u64> {
        self.latest.lock().get(peer).map(|r| r.seq)
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        self.latest.lock().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Keypair, PrivateKey};

    fn peer_and_key() -> (PeerId, PrivateKey) {
        let kp = Keypair::generate_ed25519();
        let (sk, pk) = kp.into_keypair();
        (PeerId::from_public_key(&pk), sk)
    }

    fn sealed_record(peer: PeerId, sk: &PrivateKey, seq: u64, addr: &str) -> Vec<u8> {
        let record = PeerRecord { peer_id: peer, seq, addresses: vec![Multiaddr::parse(addr).unwrap()] };
        record.seal(sk).unwrap().encode()
    }

    #[test]
    fn higher_seq_wins_regardless_of_arrival_order() {
        let (peer, sk) = peer_and_key();
        let r1 = sealed_record(peer.clone(), &sk, 1000, "/ip4/1.1.1.1/tcp/1");
        let r2 = sealed_record(peer.clone(), &sk, 500, "/ip4/2.2.2.2/tcp/2");
        let r1_addr = Multiaddr::parse("/ip4/1.1.1.1/tcp/1").unwrap();

        let high_then_low = CertifiedAddrBook::new();
        assert!(high_then_low.consume_record(&peer, &r1).unwrap());
        assert!(!high_then_low.consume_record(&peer, &r2).unwrap());
        assert_eq!(high_then_low.addrs(&peer), vec![r1_addr.clone()]);

        let low_then_high = CertifiedAddrBook::new();
        assert!(low_then_high.consume_record(&peer, &r2).unwrap());
        assert!(low_then_high.consume_record(&peer, &r1).unwrap());
        assert_eq!(low_then_high.addrs(&peer), vec![r1_addr]);
    }

    #[test]
    fn equal_seq_rejected() {
        let (peer, sk) = peer_and_key();
        let r1 = sealed_record(peer.clone(), &sk, 1000, "/ip4/1.1.1.1/tcp/1");
        let book = CertifiedAddrBook::new();
        assert!(book.consume_record(&peer, &r1).unwrap());
        assert!(!book.consume_record(&peer, &r1).unwrap());
    }

    #[test]
    fn record_signed_for_a_different_peer_rejected() {
        let (peer, sk) = peer_and_key();
        let (other, _) = peer_and_key();
        let r1 = sealed_record(peer, &sk, 1, "/ip4/1.1.1.1/tcp/1");
        let book = CertifiedAddrBook::new();
        assert!(matches!(book.consume_record(&other, &r1), Err(Error::IdentityMismatch)));
    }
}
