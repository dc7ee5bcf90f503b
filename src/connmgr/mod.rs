//! Connection manager & gater (§4.12): per-peer connection accounting,
//! blocking rules, and eviction.

mod gater;
mod tags;

pub use gater::{ConnGater, ConnId};
pub use tags::{BumpFn, DecayFn, DecayResult, TagRegistry};

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::PeerId;

const LOG_TARGET: &str = "junction::connmgr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectedness {
    NotConnected,
    Connected,
    CanConnect,
    CannotConnect,
}

/// Configurable caps enforced jointly by the manager and the gater (§4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnManagerConfig {
    pub max_conns_total: usize,
    pub max_conns_per_peer: usize,
    pub max_connections_inbound_per_ip: usize,
}

impl Default for ConnManagerConfig {
    fn default() -> Self {
        ConnManagerConfig { max_conns_total: 512, max_conns_per_peer: 8, max_connections_inbound_per_ip: 8 }
    }
}

#[derive(Default)]
struct PeerState {
    conn_count: usize,
    connectedness: Connectedness,
}

impl Default for Connectedness {
    fn default() -> Self {
        Connectedness::NotConnected
    }
}

/// Per-peer connection accounting plus decaying tags (§4.12).
pub struct ConnectionManager {
    config: ConnManagerConfig,
    peers: Mutex<HashMap<PeerId, PeerState>>,
    inbound_per_ip: Mutex<HashMap<IpAddr, usize>>,
    total_conns: Mutex<usize>,
    pub tags: Arc<TagRegistry>,
}

impl ConnectionManager {
    pub fn new(config: ConnManagerConfig) -> Self {
        ConnectionManager {
            config,
            peers: Mutex::new(HashMap::new()),
            inbound_per_ip: Mutex::new(HashMap::new()),
            total_conns: Mutex::new(0),
            tags: Arc::new(TagRegistry::new()),
        }
    }

    pub fn connectedness(&self, peer: &PeerId) -> Connectedness {
        self.peers.lock().get(peer).map(|s| s.connectedness).unwrap_or(Connectedness::NotConnected)
    }

    /// Would accepting one more connection for `peer` (optionally from
    /// `remote_ip` if inbound) stay within the configured caps?
    pub fn can_accept(&self, peer: &PeerId, remote_ip: Option<IpAddr>) -> bool {
        if *self.total_conns.lock() >= self.config.max_conns_total {
            return false;
        }
        let per_peer = self.peers.lock().get(peer).map(|s| s.conn_count).unwrap_or(0);
        if per_peer >= self.config.max_conns_per_peer {
            return false;
        }
        if let Some(ip) = remote_ip {
            let per_ip = self.inbound_per_ip.lock().get(&ip).copied().unwrap_or(0);
            if per_ip >= self.config.max_connections_inbound_per_ip {
                return false;
            }
        }
        true
    }

    pub fn note_connected(&self, peer: &PeerId, remote_ip: Option<IpAddr>) {
        let mut peers = self.peers.lock();
        let state = peers.entry(peer.clone()).or_default();
        state.conn_count += 1;
        state.connectedness = Connectedness::Connected;
        *self.total_conns.lock() += 1;
        if let Some(ip) = remote_ip {
            *self.inbound_per_ip.lock().entry(ip).or_insert(0) += 1;
        }
    }

    pub fn note_disconnected(&self, peer: &PeerId, remote_ip: Option<IpAddr>) {
        let mut peers = self.peers.lock();
        if let Some(state) = peers.get_mut(peer) {
            state.conn_count = state.conn_count.saturating_sub(1);
            if state.conn_count == 0 {
                state.connectedness = Connectedness::NotConnected;
            }
        }
        let mut total = self.total_conns.lock();
        *total = total.saturating_sub(1);
        if let Some(ip) = remote_ip {
            if let Some(count) = self.inbound_per_ip.lock().get_mut(&ip) {
                *count = count.saturating_sub(1);
            }
        }
        if self.peers.lock().get(peer).map(|s| s.conn_count) == Some(0) {
            self.tags.remove_peer(peer);
        }
    }

    pub fn register_decaying_tag(
        &self,
        name: &str,
        interval: Duration,
        decay: DecayFn,
        bump: BumpFn,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        self.tags.register_decaying_tag(name, interval, decay, bump, cancel)
    }

    /// Evict connected peers with the lowest total tag score until at most
    /// `target` remain connected (SPEC_FULL §B). Returns the evicted peers;
    /// the caller (swarm) is responsible for actually closing connections.
    pub fn trim(&self, target: usize) -> Vec<PeerId> {
        let connected: Vec<PeerId> = {
            let peers = self.peers.lock();
            peers
                .iter()
                .filter(|(_, s)| s.connectedness == Connectedness::Connected)
                .map(|(p, _)| p.clone())
                .collect()
        };
        if connected.len() <= target {
            return Vec::new();
        }
        let mut scored: Vec<(PeerId, i64)> =
            connected.into_iter().map(|p| (self.tags.total_score(&p), p)).map(|(s, p)| (p, s)).collect();
        scored.sort_by_key(|(_, score)| *score);
        let evict_count = scored.len() - target;
        scored.into_iter().take(evict_count).map(|(p, _)| p).collect()
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
    fn caps_enforced() {
        let mgr = ConnectionManager::new(ConnManagerConfig { max_conns_per_peer: 1, ..Default::default() });
        let p = peer();
        assert!(mgr.can_accept(&p, None));
        mgr.note_connected(&p, None);
        assert!(!mgr.can_accept(&p, None));
    }

    #[test]
    fn connectedness_tracks_refcount() {
        let mgr = ConnectionManager::new(ConnManagerConfig::default());
        let p = peer();
        assert_eq!(mgr.connectedness(&p), Connectedness::NotConnected);
        mgr.note_connected(&p, None);
        assert_eq!(mgr.connectedness(&p), Connectedness::Connected);
        mgr.note_disconnected(&p, None);
        assert_eq!(mgr.connectedness(&p), Connectedness::NotConnected);
    }

    #[test]
    fn trim_evicts_lowest_scored_first() {
        let mgr = ConnectionManager::new(ConnManagerConfig::default());
        let decay: DecayFn = Arc::new(|v| DecayResult { value: v, remove: false });
        let bump: BumpFn = Arc::new(|v, d| v + d);
        mgr.register_decaying_tag("useful", Duration::from_secs(3600), decay, bump, CancellationToken::new()).unwrap();

        let low = peer();
        let high = peer();
        mgr.note_connected(&low, None);
        mgr.note_connected(&high, None);
        mgr.tags.bump(&low, "useful", 1);
        mgr.tags.bump(&high, "useful", 100);

        let evicted = mgr.trim(1);
        assert_eq!(evicted, vec![low]);
    }
}
