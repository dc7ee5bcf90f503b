//! Peerstore (§4.4): the per-peer directory of addresses, keys, protocols and metrics.

mod addr_book;
mod certified;
mod key_book;
mod metrics;
mod proto_book;

pub use addr_book::{AddrBook, TTL_CONNECTED, TTL_PERMANENT};
pub use certified::CertifiedAddrBook;
pub use key_book::KeyBook;
pub use metrics::Metrics;
pub use proto_book::ProtoBook;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::multiaddr::Multiaddr;
use crate::PeerId;

const LOG_TARGET: &str = "junction::peerstore";

/// The combined per-peer directory: AddrBook + CertifiedAddrBook + KeyBook +
/// ProtoBook + Metrics (§3).
#[derive(Clone)]
pub struct Peerstore {
    pub addrs: Arc<AddrBook>,
    pub certified: Arc<CertifiedAddrBook>,
    pub keys: Arc<KeyBook>,
    pub protocols: Arc<ProtoBook>,
    pub metrics: Arc<Metrics>,
}

impl Default for Peerstore {
    fn default() -> Self {
        Self::new()
    }
}

impl Peerstore {
    pub fn new() -> Self {
        Peerstore {
            addrs: Arc::new(AddrBook::new()),
            certified: Arc::new(CertifiedAddrBook::new()),
            keys: Arc::new(KeyBook::new()),
            protocols: Arc::new(ProtoBook::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn add_addrs(&self, peer: &PeerId, addrs: &[Multiaddr], ttl: Duration) {
        self.addrs.add_addrs(peer, addrs, ttl);
    }

    /// Verify and, seq permitting, accept a signed [`crate::record::PeerRecord`]
    /// envelope for `peer` (§3, Testable Property 4, scenario S4).
    pub fn consume_peer_record(&self, peer: &PeerId, envelope_bytes: &[u8]) -> Result<bool, crate::error::Error> {
        self.certified.consume_record(peer, envelope_bytes)
    }

    /// Uncertified addresses plus whatever the peer's latest accepted
    /// PeerRecord declared, deduplicated.
    pub fn peer_addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        let mut addrs = self.addrs.addrs(peer);
        for addr in self.certified.addrs(peer) {
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        addrs
    }

    /// A peer is entirely forgotten across all five books.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.addrs.clear_peer(peer);
        self.certified.remove_peer(peer);
        self.keys.remove_peer(peer);
        self.metrics.remove_peer(peer);
    }

    /// Spawn the background AddrBook eviction sweeper as a cancellable task (§4.4, §9).
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) {
        let addrs = self.addrs.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = addrs.sweep_expired();
                        if removed > 0 {
                            debug!(target: LOG_TARGET, removed, "swept expired addresses");
                        }
                    }
                }
            }
        });
    }
}
