//! AddrBook: per-peer, per-address TTL-indexed address set (§4.4).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::multiaddr::Multiaddr;
use crate::PeerId;

/// Never expires, in practice: 100 years out.
pub const TTL_PERMANENT: Duration = Duration::from_secs(100 * 365 * 24 * 3600);
/// Refreshed on every Swarm connect notification; expired on disconnect + grace.
pub const TTL_CONNECTED: Duration = Duration::from_secs(20 * 60);

struct Entry {
    expiry: Instant,
}

pub struct AddrBook {
    // One mutex per peer would be truer to "mutating operations are
    // serialized per peer" (§4.4), but a single lock over a per-peer map,
    // held only across the map mutation itself, gives the same externally
    // observable serialization with far less bookkeeping.
    inner: Mutex<HashMap<PeerId, HashMap<Multiaddr, Entry>>>,
}

impl Default for AddrBook {
    fn default() -> Self {
        Self::new()
    }
}

impl AddrBook {
    pub fn new() -> Self {
        AddrBook { inner: Mutex::new(HashMap::new()) }
    }

    /// Merge `addrs` into the book for `peer`; each address's expiry becomes
    /// `max(existing expiry, now + ttl)` (§4.4).
    pub fn add_addrs(&self, peer: &PeerId, addrs: &[Multiaddr], ttl: Duration) {
        let now = Instant::now();
        let new_expiry = now.checked_add(ttl).unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600));
        let mut map = self.inner.lock();
        let entry = map.entry(peer.clone()).or_default();
        for addr in addrs {
            let slot = entry.entry(addr.clone()).or_insert(Entry { expiry: new_expiry });
            if new_expiry > slot.expiry {
                slot.expiry = new_expiry;
            }
        }
    }

    /// Non-expired addresses for `peer`. Fails quietly: unknown peers yield an empty vec (§4.4).
    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        let now = Instant::now();
        let map = self.inner.lock();
        map.get(peer)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, e)| e.expiry > now)
                    .map(|(addr, _)| addr.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Refresh the `connected` TTL for all of `peer`'s currently known
    /// addresses (called on every Swarm connect notification, §4.4).
    pub fn refresh_connected(&self, peer: &PeerId) {
        let now = Instant::now();
        let new_expiry = now + TTL_CONNECTED;
        let mut map = self.inner.lock();
        if let Some(entries) = map.get_mut(peer) {
            for e in entries.values_mut() {
                if e.expiry < new_expiry {
                    e.expiry = new_expiry;
                }
            }
        }
    }

    /// Background sweeper step: remove all expired (peer, addr) pairs.
    /// Intended to be called periodically from a `tokio::task`.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut map = self.inner.lock();
        map.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|_, e| e.expiry > now);
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    pub fn clear_peer(&self, peer: &PeerId) {
        self.inner.lock().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn peer() -> PeerId {
        PeerId::from_public_key(&Keypair::generate_ed25519().public())
    }

    #[test]
    fn add_and_read_back() {
        let book = AddrBook::new();
        let p = peer();
        let a = Multiaddr::parse("/ip4/1.2.3.4/tcp/1").unwrap();
        book.add_addrs(&p, &[a.clone()], Duration::from_secs(60));
        assert_eq!(book.addrs(&p), vec![a]);
    }

    #[test]
    fn unknown_peer_returns_empty() {
        let book = AddrBook::new();
        assert!(book.addrs(&peer()).is_empty());
    }

    #[test]
    fn expiry_extends_but_never_shortens() {
        let book = AddrBook::new();
        let p = peer();
        let a = Multiaddr::parse("/ip4/1.2.3.4/tcp/1").unwrap();
        book.add_addrs(&p, &[a.clone()], Duration::from_secs(5));
        book.add_addrs(&p, &[a.clone()], Duration::from_secs(1));
        // still present: the longer TTL from the first call should win
        assert_eq!(book.addrs(&p), vec![a]);
    }

    #[test]
    fn sweep_removes_expired() {
        let book = AddrBook::new();
        let p = peer();
        let a = Multiaddr::parse("/ip4/1.2.3.4/tcp/1").unwrap();
        book.add_addrs(&p, &[a], Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        let removed = book.sweep_expired();
        assert_eq!(removed, 1);
        assert!(book.addrs(&p).is_empty());
    }
}
