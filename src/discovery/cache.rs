//! LRU discovery cache (SPEC_FULL §B): last `AddrInfo` seen per peer from any
//! discovery source (mDNS, identify's observed/listen addrs).

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::multiaddr::Multiaddr;
use crate::PeerId;

pub const DEFAULT_CAPACITY: usize = 1024;

/// A peer id plus a set of multiaddresses it was last seen advertising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub peer: PeerId,
    pub addrs: Vec<Multiaddr>,
}

struct Inner {
    map: HashMap<PeerId, AddrInfo>,
    order: VecDeque<PeerId>,
}

/// Fixed-capacity LRU keyed by PeerId; inserting an already-present peer
/// refreshes both its value and its recency.
pub struct DiscoveryCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl DiscoveryCache {
    pub fn new(capacity: usize) -> Self {
        DiscoveryCache { capacity, inner: Mutex::new(Inner { map: HashMap::new(), order: VecDeque::new() }) }
    }

    pub fn insert(&self, info: AddrInfo) {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&info.peer) {
            inner.order.retain(|p| p != &info.peer);
        }
        inner.order.push_back(info.peer.clone());
        inner.map.insert(info.peer.clone(), info);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            }
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<AddrInfo> {
        self.inner.lock().map.get(peer).cloned()
    }

    /// Convenience accessor feeding the swarm's dial candidate collection
    /// (§4.13 step 3).
    pub fn addrs_for(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.get(peer).map(|info| info.addrs).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn peer() -> PeerId {
        PeerId::from_public_key(&Keypair::generate_ed25519().public())
    }

    fn info(peer: PeerId, addr: &str) -> AddrInfo {
        AddrInfo { peer, addrs: vec![Multiaddr::parse(addr).unwrap()] }
    }

    #[test]
    fn insert_and_get() {
        let cache = DiscoveryCache::new(2);
        let p = peer();
        cache.insert(info(p.clone(), "/ip4/1.2.3.4/tcp/1"));
        assert_eq!(cache.addrs_for(&p).len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = DiscoveryCache::new(2);
        let a = peer();
        let b = peer();
        let c = peer();
        cache.insert(info(a.clone(), "/ip4/1.2.3.4/tcp/1"));
        cache.insert(info(b.clone(), "/ip4/1.2.3.5/tcp/1"));
        cache.insert(info(c.clone(), "/ip4/1.2.3.6/tcp/1"));
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn reinserting_refreshes_recency() {
        let cache = DiscoveryCache::new(2);
        let a = peer();
        let b = peer();
        cache.insert(info(a.clone(), "/ip4/1.2.3.4/tcp/1"));
        cache.insert(info(b.clone(), "/ip4/1.2.3.5/tcp/1"));
        cache.insert(info(a.clone(), "/ip4/1.2.3.4/tcp/2")); // touch a
        let c = peer();
        cache.insert(info(c.clone(), "/ip4/1.2.3.6/tcp/1")); // evicts b, not a
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&a).is_some());
    }
}
