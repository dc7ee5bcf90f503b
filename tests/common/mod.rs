//! Shared fixture for black-box tests against the full `Host`/`Swarm` stack,
//! wired the same way `upgrade::tests::outbound_upgrade_rejects_mismatched_peer`
//! wires a bare `Upgrader`: in-memory transport, plaintext security, unbounded
//! resources.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use junction::connmgr::{ConnGater, ConnManagerConfig, ConnectionManager};
use junction::discovery::DiscoveryCache;
use junction::event_bus::EventBus;
use junction::host::Host;
use junction::identity::Keypair;
use junction::multiaddr::Multiaddr;
use junction::peerstore::Peerstore;
use junction::reachability::CapabilityDetector;
use junction::resource::{Limits, ResourceTree};
use junction::security::{Plaintext, SecurityUpgrader};
use junction::swarm::{Swarm, SwarmConfig};
use junction::transport::memory::{MemoryNetwork, MemoryTransport};
use junction::transport::{Listener, Transport};
use junction::PeerId;

static NEXT_PORT: AtomicU16 = AtomicU16::new(20000);

pub fn next_addr() -> Multiaddr {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    Multiaddr::parse(&format!("/ip4/127.0.0.1/tcp/{port}")).unwrap()
}

/// A host listening on one freshly allocated in-memory address, already
/// `start`ed. `addr` is the bare address `listen` registered; `MemoryNetwork`
/// matches dial targets against it exactly, so no `/p2p` tail is appended.
pub struct TestHost {
    pub host: Arc<Host<MemoryTransport>>,
    pub addr: Multiaddr,
}

pub async fn spawn_host(net: &MemoryNetwork) -> TestHost {
    let identity = Keypair::generate_ed25519();
    let peer_id = PeerId::from_public_key(&identity.public());

    let transport = net.transport();
    let bind_addr = next_addr();
    let listener = transport.listen(&bind_addr).await.unwrap();

    let resources = Arc::new(ResourceTree::new(Limits::unbounded()));
    let events = EventBus::new();
    let security = Arc::new(SecurityUpgrader::new(vec![Box::new(Plaintext)]));
    let upgrader = Arc::new(junction::upgrade::Upgrader::new(security, resources.clone(), events.clone()));
    let conn_mgr = Arc::new(ConnectionManager::new(ConnManagerConfig::default()));
    let gater = Arc::new(ConnGater::new(None));
    let capability = Arc::new(CapabilityDetector::new(Duration::from_secs(3600)));
    let peerstore = Arc::new(Peerstore::new());
    let discovery = Arc::new(DiscoveryCache::new(junction::discovery::DEFAULT_CAPACITY));

    let swarm = Arc::new(Swarm::new(
        Arc::new(transport),
        peer_id.clone(),
        Arc::new(identity),
        peerstore,
        discovery,
        resources,
        upgrader,
        conn_mgr,
        gater,
        capability,
        events,
        SwarmConfig::default(),
    ));
    let host = Arc::new(Host::new(swarm));
    host.start(listener);

    // `MemoryTransport` treats a multiaddr as an opaque registry key (no
    // protocol-stack parsing), so the dialable address must match exactly
    // what `listen` registered, with no `/p2p` tail appended.
    TestHost { host, addr: bind_addr }
}
