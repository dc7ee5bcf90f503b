//! NAT behavior tracker (§4.15): a STUN client pool that periodically
//! classifies the local NAT's mapping and filtering behavior (RFC 4787 /
//! RFC 5780 terminology, RFC 3489 §9.3 CHANGE-REQUEST discovery procedure)
//! and turns the result into a [`NatType`] plus [`TraversalStrategy`].
//!
//! Grounded in [`crate::reachability::CapabilityDetector`]'s cached-probe
//! shape (a background re-probe on a TTL/interval, `RwLock`-cached last
//! result) and in [`crate::peerstore::Peerstore::spawn_sweeper`]'s
//! cancellable interval-task pattern.

mod stun;

pub use stun::{StunError, StunServer};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event_bus::EventBus;

const LOG_TARGET: &str = "junction::nat";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NatConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub bind_addr: std::net::SocketAddr,
}

impl Default for NatConfig {
    fn default() -> Self {
        NatConfig {
            probe_interval: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(3),
            bind_addr: std::net::SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

/// How the NAT assigns external mappings for a given internal socket (§4.15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatMapping {
    EndpointIndependent,
    AddressDependent,
    AddressAndPortDependent,
    Unknown,
}

/// Which inbound packets the NAT admits back through an existing mapping (§4.15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatFiltering {
    EndpointIndependent,
    AddressDependent,
    AddressAndPortDependent,
    Unknown,
}

/// The classic four NAT archetypes plus the two states this tracker can
/// also observe directly: a server that never answers, and "haven't probed
/// yet" (§4.15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    FullCone,
    RestrictedCone,
    PortRestricted,
    Symmetric,
    Blocked,
    Unknown,
}

/// What this NAT type implies is worth trying for inbound connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalStrategy {
    /// No NAT or a fully cone one: direct dial-back is viable.
    Direct,
    /// Restricted/port-restricted cone: classic simultaneous-open hole punching works.
    HolePunch,
    /// Symmetric: per-destination mapping defeats hole punching; relay instead.
    Relay,
    /// STUN got no response at all: assume no usable path without a relay.
    Unreachable,
    Unknown,
}

impl NatType {
    pub fn from_behavior(mapping: NatMapping, filtering: NatFiltering) -> Self {
        match (mapping, filtering) {
            (NatMapping::Unknown, _) | (_, NatFiltering::Unknown) => NatType::Unknown,
            (NatMapping::AddressDependent, _) | (NatMapping::AddressAndPortDependent, _) => NatType::Symmetric,
            (NatMapping::EndpointIndependent, NatFiltering::EndpointIndependent) => NatType::FullCone,
            (NatMapping::EndpointIndependent, NatFiltering::AddressDependent) => NatType::RestrictedCone,
            (NatMapping::EndpointIndependent, NatFiltering::AddressAndPortDependent) => NatType::PortRestricted,
        }
    }

    pub fn traversal_strategy(&self) -> TraversalStrategy {
        match self {
            NatType::FullCone => TraversalStrategy::Direct,
            NatType::RestrictedCone | NatType::PortRestricted => TraversalStrategy::HolePunch,
            NatType::Symmetric => TraversalStrategy::Relay,
            NatType::Blocked => TraversalStrategy::Unreachable,
            NatType::Unknown => TraversalStrategy::Unknown,
        }
    }
}

/// Emitted (stateful) whenever a probe round changes the classified NAT
/// type from what was last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatDeviceTypeChanged {
    pub nat_type: NatType,
    pub mapping: NatMapping,
    pub filtering: NatFiltering,
    pub strategy: TraversalStrategy,
}

type NatCallback = Arc<dyn Fn(NatDeviceTypeChanged) + Send + Sync>;

/// Periodically probes a pool of STUN servers and classifies this host's
/// NAT behavior (§4.15).
pub struct NatTracker {
    servers: parking_lot::Mutex<Vec<StunServer>>,
    config: NatConfig,
    events: EventBus,
    last: RwLock<Option<NatDeviceTypeChanged>>,
    callbacks: parking_lot::Mutex<Vec<NatCallback>>,
}

impl NatTracker {
    pub fn new(servers: Vec<std::net::SocketAddr>, config: NatConfig, events: EventBus) -> Self {
        NatTracker {
            servers: parking_lot::Mutex::new(servers.into_iter().map(StunServer::new).collect()),
            config,
            events,
            last: RwLock::new(None),
            callbacks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Option<NatDeviceTypeChanged> {
        *self.last.read()
    }

    /// Invoked on every classification change, in addition to the event bus
    /// emission (§4.15: "invokes registered callbacks on change").
    pub fn on_change(&self, callback: impl Fn(NatDeviceTypeChanged) + Send + Sync + 'static) {
        self.callbacks.lock().push(Arc::new(callback));
    }

    /// Spawn the periodic probe loop; cancellable like the peerstore sweeper (§9).
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.probe_once().await,
                }
            }
        });
    }

    /// Run one classification round against the healthiest two servers in
    /// the pool, updating health scores as probes succeed or fail.
    pub async fn probe_once(&self) {
        let (primary, secondary) = {
            let mut servers = self.servers.lock();
            servers.sort_by(|a, b| b.score().cmp(&a.score()));
            match (servers.first().cloned(), servers.get(1).cloned()) {
                (Some(p), Some(s)) => (p, s),
                _ => {
                    debug!(target: LOG_TARGET, "nat probe skipped, fewer than two configured stun servers");
                    return;
                }
            }
        };

        let mapping = self.classify_mapping(&primary, &secondary).await;
        let filtering = self.classify_filtering(&primary).await;
        let nat_type = NatType::from_behavior(mapping, filtering);
        let changed = NatDeviceTypeChanged { nat_type, mapping, filtering, strategy: nat_type.traversal_strategy() };

        let previous = *self.last.read();
        if previous.map(|p| p.nat_type) == Some(nat_type) {
            return;
        }
        info!(target: LOG_TARGET, ?nat_type, ?mapping, ?filtering, "nat device type changed");
        *self.last.write() = Some(changed);
        self.events.emitter::<NatDeviceTypeChanged>(true).emit(changed);
        for callback in self.callbacks.lock().iter() {
            callback(changed);
        }
    }

    async fn classify_mapping(&self, a: &StunServer, b: &StunServer) -> NatMapping {
        let ra = self.bind_and_probe(a, false, false).await;
        let rb = self.bind_and_probe(b, false, false).await;
        match (ra, rb) {
            (Ok(ma), Ok(mb)) => {
                a.record_success();
                b.record_success();
                if ma.port() == mb.port() {
                    NatMapping::EndpointIndependent
                } else if a.addr().port() == b.addr().port() {
                    NatMapping::AddressDependent
                } else {
                    NatMapping::AddressAndPortDependent
                }
            }
            (Err(_), _) => {
                a.record_failure();
                NatMapping::Unknown
            }
            (_, Err(_)) => {
                b.record_failure();
                NatMapping::Unknown
            }
        }
    }

    /// RFC 3489 §9.3 tests II/III: ask the server to reply from a changed
    /// IP/port (`CHANGE-REQUEST`) and see which variant still reaches us.
    async fn classify_filtering(&self, server: &StunServer) -> NatFiltering {
        if self.bind_and_probe(server, true, true).await.is_ok() {
            server.record_success();
            return NatFiltering::EndpointIndependent;
        }
        if self.bind_and_probe(server, false, true).await.is_ok() {
            server.record_success();
            return NatFiltering::AddressDependent;
        }
        match self.bind_and_probe(server, false, false).await {
            Ok(_) => {
                server.record_success();
                NatFiltering::AddressAndPortDependent
            }
            Err(_) => {
                server.record_failure();
                NatFiltering::Unknown
            }
        }
    }

    async fn bind_and_probe(
        &self,
        server: &StunServer,
        change_ip: bool,
        change_port: bool,
    ) -> Result<std::net::SocketAddr, StunError> {
        server.probe(self.config.bind_addr, self.config.probe_timeout, change_ip, change_port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cone_from_endpoint_independent_behavior() {
        let nat = NatType::from_behavior(NatMapping::EndpointIndependent, NatFiltering::EndpointIndependent);
        assert_eq!(nat, NatType::FullCone);
        assert_eq!(nat.traversal_strategy(), TraversalStrategy::Direct);
    }

    #[test]
    fn symmetric_mapping_always_wins_over_filtering() {
        let nat = NatType::from_behavior(NatMapping::AddressAndPortDependent, NatFiltering::EndpointIndependent);
        assert_eq!(nat, NatType::Symmetric);
        assert_eq!(nat.traversal_strategy(), TraversalStrategy::Relay);
    }

    #[test]
    fn restricted_cone_needs_hole_punching() {
        let nat = NatType::from_behavior(NatMapping::EndpointIndependent, NatFiltering::AddressDependent);
        assert_eq!(nat, NatType::RestrictedCone);
        assert_eq!(nat.traversal_strategy(), TraversalStrategy::HolePunch);
    }

    #[test]
    fn unknown_mapping_yields_unknown_type() {
        let nat = NatType::from_behavior(NatMapping::Unknown, NatFiltering::EndpointIndependent);
        assert_eq!(nat, NatType::Unknown);
    }
}
