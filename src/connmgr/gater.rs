//! Connection gater (§4.12): four synchronous veto points called at each
//! connection-lifecycle step.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ip_network::IpNetwork;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::multiaddr::Multiaddr;
use crate::PeerId;

const LOG_TARGET: &str = "junction::connmgr::gater";

/// Opaque per-connection identifier allocated by the swarm on accept/dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

impl ConnId {
    pub fn next() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
struct Blocklists {
    peers: HashSet<PeerId>,
    addrs: HashSet<Multiaddr>,
    subnets: Vec<IpNetwork>,
    conns: HashSet<ConnId>,
}

/// Policy object vetoing connection lifecycle transitions (§4.12).
pub struct ConnGater {
    blocklists: Mutex<Blocklists>,
    idle_timeout: Option<Duration>,
    last_activity: Mutex<std::collections::HashMap<ConnId, Instant>>,
}

impl Default for ConnGater {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ConnGater {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        ConnGater {
            blocklists: Mutex::new(Blocklists::default()),
            idle_timeout,
            last_activity: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn block_peer(&self, peer: PeerId) {
        self.blocklists.lock().peers.insert(peer);
    }

    pub fn unblock_peer(&self, peer: &PeerId) {
        self.blocklists.lock().peers.remove(peer);
    }

    pub fn block_addr(&self, addr: Multiaddr) {
        self.blocklists.lock().addrs.insert(addr);
    }

    pub fn block_subnet(&self, subnet: IpNetwork) {
        self.blocklists.lock().subnets.push(subnet);
    }

    pub fn block_conn(&self, conn: ConnId) {
        self.blocklists.lock().conns.insert(conn);
    }

    /// Veto point 1: before dialing a peer at all.
    pub fn allow_dial_peer(&self, peer: &PeerId) -> bool {
        !self.blocklists.lock().peers.contains(peer)
    }

    /// Veto point 2: before dialing a specific candidate address.
    pub fn allow_dial_addr(&self, addr: &Multiaddr) -> bool {
        let blocklists = self.blocklists.lock();
        if blocklists.addrs.contains(addr) {
            return false;
        }
        !address_in_any_subnet(addr, &blocklists.subnets)
    }

    /// Veto point 3: right after accepting a raw inbound connection, before
    /// the security/muxer upgrade runs.
    pub fn allow_accept(&self, remote_addr: &Multiaddr, conn: ConnId) -> bool {
        let blocklists = self.blocklists.lock();
        if blocklists.conns.contains(&conn) {
            return false;
        }
        if blocklists.addrs.contains(remote_addr) {
            return false;
        }
        !address_in_any_subnet(remote_addr, &blocklists.subnets)
    }

    /// Veto point 4: after the upgrade completes and the remote PeerId is known.
    pub fn allow_upgraded(&self, peer: &PeerId, conn: ConnId) -> bool {
        let blocklists = self.blocklists.lock();
        !blocklists.peers.contains(peer) && !blocklists.conns.contains(&conn)
    }

    /// Record activity on a connection so the idle sweeper doesn't evict it.
    pub fn note_activity(&self, conn: ConnId) {
        if self.idle_timeout.is_some() {
            self.last_activity.lock().insert(conn, Instant::now());
        }
    }

    pub fn forget_conn(&self, conn: ConnId) {
        self.last_activity.lock().remove(&conn);
    }

    /// Spawn the idle-timeout sweeper (SPEC_FULL §A background-task
    /// convention); a no-op task if no idle timeout is configured.
    pub fn spawn_idle_sweeper(self: std::sync::Arc<Self>, sweep_interval: Duration, cancel: CancellationToken) {
        let Some(idle_timeout) = self.idle_timeout else { return };
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let expired: Vec<ConnId> = self
                            .last_activity
                            .lock()
                            .iter()
                            .filter(|(_, last)| now.duration_since(**last) > idle_timeout)
                            .map(|(id, _)| *id)
                            .collect();
                        for conn in expired {
                            info!(target: LOG_TARGET, conn_id = conn.0, "idle timeout, auto-blocking connection");
                            self.block_conn(conn);
                            self.last_activity.lock().remove(&conn);
                        }
                    }
                }
            }
        });
    }
}

fn address_in_any_subnet(addr: &Multiaddr, subnets: &[IpNetwork]) -> bool {
    let ip: Option<IpAddr> = addr.iter().find_map(|p| match p {
        crate::multiaddr::Protocol::Ip4(v4) => Some(IpAddr::V4(*v4)),
        crate::multiaddr::Protocol::Ip6(v6) => Some(IpAddr::V6(*v6)),
        _ => None,
    });
    match ip {
        Some(ip) => subnets.iter().any(|net| net.contains(ip)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    #[test]
    fn blocked_peer_vetoes_dial() {
        let gater = ConnGater::new(None);
        let peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        assert!(gater.allow_dial_peer(&peer));
        gater.block_peer(peer.clone());
        assert!(!gater.allow_dial_peer(&peer));
    }

    #[test]
    fn subnet_block_vetoes_matching_address() {
        let gater = ConnGater::new(None);
        let subnet: IpNetwork = "10.0.0.0/8".parse().unwrap();
        gater.block_subnet(subnet);
        let addr = Multiaddr::parse("/ip4/10.1.2.3/tcp/1").unwrap();
        assert!(!gater.allow_dial_addr(&addr));
        let other = Multiaddr::parse("/ip4/192.168.1.1/tcp/1").unwrap();
        assert!(gater.allow_dial_addr(&other));
    }

    #[test]
    fn blocked_conn_vetoes_accept_and_upgraded() {
        let gater = ConnGater::new(None);
        let conn = ConnId::next();
        let addr = Multiaddr::parse("/ip4/1.2.3.4/tcp/1").unwrap();
        gater.block_conn(conn);
        assert!(!gater.allow_accept(&addr, conn));
        let peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        assert!(!gater.allow_upgraded(&peer, conn));
    }
}
