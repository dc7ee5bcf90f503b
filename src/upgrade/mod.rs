//! Upgrade pipeline (§4.10): composes transport → security → muxer.

use std::sync::Arc;
use std::time::Instant;

use crate::error::Error;
use crate::event_bus::EventBus;
use crate::multiaddr::Multiaddr;
use crate::muxer::MuxedConn;
use crate::resource::{ConnectionScope, Limits, ResourceTree};
use crate::security::SecurityUpgrader;
use crate::transport::RawConn;
use crate::PeerId;

/// Inbound or outbound, per §3 Connection attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Emitted exactly once per peer on first successful upgrade (§4.10).
#[derive(Debug, Clone)]
pub struct ConnectednessChanged {
    pub peer: PeerId,
}

/// Emitted when the last connection to a peer ends (§4.10).
#[derive(Debug, Clone)]
pub struct Disconnected {
    pub peer: PeerId,
}

/// An upgraded, authenticated, multiplexed session (§3 Connection entity).
pub struct Connection {
    pub direction: Direction,
    pub local_addr: Multiaddr,
    pub remote_addr: Multiaddr,
    pub remote_peer: PeerId,
    pub security_protocol_id: String,
    pub muxer: MuxedConn,
    pub opened_at: Instant,
    pub limited: bool,
    pub scope: ConnectionScope,
}

/// Composes a [`SecurityUpgrader`] and a muxer constructor into the two
/// directions described in §4.10, reserving resources before the handshake
/// and releasing them on any failure.
pub struct Upgrader {
    security: Arc<SecurityUpgrader>,
    resources: Arc<ResourceTree>,
    events: EventBus,
}

impl Upgrader {
    pub fn new(security: Arc<SecurityUpgrader>, resources: Arc<ResourceTree>, events: EventBus) -> Self {
        Upgrader { security, resources, events }
    }

    pub async fn upgrade_outbound<C: RawConn>(
        &self,
        raw: C,
        peer_id: &PeerId,
        local_identity: &crate::identity::Keypair,
        is_first_connection_to_peer: impl FnOnce() -> bool,
    ) -> Result<Connection, Error> {
        let conn_scope = self.resources.new_connection_scope(Some(peer_id), Limits::unbounded());
        if let Err(e) = self.reserve_conn_slot(&conn_scope, false) {
            self.resources.done(conn_scope.id);
            return Err(e);
        }

        let authenticated = match self.security.upgrade_outbound(raw, Some(peer_id), local_identity).await {
            Ok(a) => a,
            Err(e) => {
                self.release_conn_slot(&conn_scope, false);
                self.resources.done(conn_scope.id);
                return Err(e);
            }
        };

        let muxer = MuxedConn::new(authenticated.io, false);
        let conn = Connection {
            direction: Direction::Outbound,
            local_addr: authenticated.local_addr,
            remote_addr: authenticated.remote_addr,
            remote_peer: authenticated.remote_peer,
            security_protocol_id: authenticated.security_protocol_id,
            muxer,
            opened_at: now_unused_instant(),
            limited: false,
            scope: conn_scope,
        };

        if is_first_connection_to_peer() {
            self.events.emitter::<ConnectednessChanged>(false).emit(ConnectednessChanged { peer: peer_id.clone() });
        }
        Ok(conn)
    }

    pub async fn upgrade_inbound<C: RawConn>(
        &self,
        raw: C,
        local_identity: &crate::identity::Keypair,
        is_first_connection_to_peer: impl FnOnce(&PeerId) -> bool,
    ) -> Result<Connection, Error> {
        let conn_scope = self.resources.new_connection_scope(None, Limits::unbounded());
        if let Err(e) = self.resources.add_conn(conn_scope.id, true, true) {
            self.resources.done(conn_scope.id);
            return Err(e);
        }

        let authenticated = match self.security.upgrade_inbound(raw, local_identity).await {
            Ok(a) => a,
            Err(e) => {
                self.resources.remove_conn(conn_scope.id, true, true);
                self.resources.done(conn_scope.id);
                return Err(e);
            }
        };

        let muxer = MuxedConn::new(authenticated.io, true);
        let conn = Connection {
            direction: Direction::Inbound,
            local_addr: authenticated.local_addr,
            remote_addr: authenticated.remote_addr,
            remote_peer: authenticated.remote_peer,
            security_protocol_id: authenticated.security_protocol_id,
            muxer,
            opened_at: now_unused_instant(),
            limited: false,
            scope: conn_scope,
        };

        if is_first_connection_to_peer(&conn.remote_peer) {
            self.events
                .emitter::<ConnectednessChanged>(false)
                .emit(ConnectednessChanged { peer: conn.remote_peer.clone() });
        }
        Ok(conn)
    }

    /// Fired by the swarm when the last connection to a peer ends (§4.10).
    pub fn emit_disconnected(&self, peer: &PeerId) {
        self.events.emitter::<Disconnected>(false).emit(Disconnected { peer: peer.clone() });
    }

    /// A connection scope is counted against both `transient` (its DAG
    /// parent) and the peer scope, once known (§4.6); reservation rolls back
    /// on either leg failing.
    fn reserve_conn_slot(&self, conn_scope: &ConnectionScope, inbound: bool) -> Result<(), Error> {
        self.resources.add_conn(conn_scope.id, inbound, true)?;
        if let Some(peer_scope) = conn_scope.peer_scope {
            if let Err(e) = self.resources.add_conn(peer_scope, inbound, false) {
                self.resources.remove_conn(conn_scope.id, inbound, true);
                return Err(e);
            }
        }
        Ok(())
    }

    fn release_conn_slot(&self, conn_scope: &ConnectionScope, inbound: bool) {
        self.resources.remove_conn(conn_scope.id, inbound, true);
        if let Some(peer_scope) = conn_scope.peer_scope {
            self.resources.remove_conn(peer_scope, inbound, false);
        }
    }
}

/// `Instant::now()` is deliberately routed through one spot so callers in
/// tests can see where connection timestamps originate.
fn now_unused_instant() -> Instant {
    Instant::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::security::Plaintext;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::{Listener, Transport};

    #[tokio::test]
    async fn outbound_upgrade_rejects_mismatched_peer() {
        let net = MemoryNetwork::new();
        let addr = crate::multiaddr::Multiaddr::parse("/ip4/127.0.0.1/tcp/30").unwrap();
        let server_transport = net.transport();
        let mut listener = server_transport.listen(&addr).await.unwrap();

        let server_identity = Keypair::generate_ed25519();
        let client_identity = Keypair::generate_ed25519();
        let wrong_peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());

        let resources = Arc::new(ResourceTree::new(Limits::unbounded()));
        let events = EventBus::new();
        let security = Arc::new(SecurityUpgrader::new(vec![Box::new(Plaintext)]));
        let upgrader = Upgrader::new(security, resources.clone(), events);

        let client_transport = net.transport();
        let addr2 = addr.clone();
        let client_task = tokio::spawn(async move {
            let raw = client_transport.dial(&addr2, None).await.unwrap();
            upgrader.upgrade_outbound(raw, &wrong_peer, &client_identity, || true).await
        });

        let server_raw = listener.accept().await.unwrap();
        let server_security = Arc::new(SecurityUpgrader::new(vec![Box::new(Plaintext)]));
        let _ = server_security.upgrade_inbound(server_raw, &server_identity).await;

        let result = client_task.await.unwrap();
        assert!(matches!(result, Err(Error::PeerIdMismatch { .. })));
        // Resource reservation must be rolled back on handshake failure.
        assert_eq!(resources.stat(resources.transient()).outbound_conns, 0);
    }
}
