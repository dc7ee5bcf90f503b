//! OutboundCapability detection (§4.14, §3): cached egress family support.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

const LOG_TARGET: &str = "junction::reachability";

/// Locally detected outbound address-family support (§3).
#[derive(Debug, Clone, Copy)]
pub struct OutboundCapability {
    pub has_ipv4: bool,
    pub has_ipv6: bool,
    pub detected_at: Instant,
}

/// Probes the local network stack for IPv4/IPv6 egress by attempting to
/// `connect` a UDP socket to a well-known public address (no packets need to
/// actually be sent for `connect()` on UDP to reveal whether the OS has a
/// route, which is all this needs).
pub struct CapabilityDetector {
    ttl: Duration,
    cached: RwLock<Option<OutboundCapability>>,
}

impl CapabilityDetector {
    pub fn new(ttl: Duration) -> Self {
        CapabilityDetector { ttl, cached: RwLock::new(None) }
    }

    /// Returns the cached capability, re-probing if it is missing or older
    /// than `ttl` (§4.14).
    pub fn detect(&self) -> OutboundCapability {
        if let Some(cap) = *self.cached.read() {
            if cap.detected_at.elapsed() < self.ttl {
                return cap;
            }
        }
        let cap = probe();
        debug!(target: LOG_TARGET, has_ipv4 = cap.has_ipv4, has_ipv6 = cap.has_ipv6, "outbound capability probed");
        *self.cached.write() = Some(cap);
        cap
    }

    /// Force a re-probe on interface-change notification (§4.14).
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }
}

fn probe() -> OutboundCapability {
    let has_ipv4 = probe_family(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
    let has_ipv6 = probe_family(IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)));
    OutboundCapability { has_ipv4, has_ipv6, detected_at: Instant::now() }
}

fn probe_family(target: IpAddr) -> bool {
    let bind_addr = match target {
        IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        IpAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = match std::net::UdpSocket::bind(bind_addr) {
        Ok(s) => s,
        Err(_) => return false,
    };
    socket.connect(SocketAddr::new(target, 53)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_caches_within_ttl() {
        let detector = CapabilityDetector::new(Duration::from_secs(3600));
        let first = detector.detect();
        let second = detector.detect();
        assert_eq!(first.detected_at, second.detected_at);
    }

    #[test]
    fn invalidate_forces_reprobe() {
        let detector = CapabilityDetector::new(Duration::from_secs(3600));
        let first = detector.detect();
        detector.invalidate();
        let second = detector.detect();
        assert!(second.detected_at >= first.detected_at);
    }
}
