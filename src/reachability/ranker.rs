//! Priority ranking of candidate addresses for dialing (§4.14).

use std::net::Ipv6Addr;
use std::time::Duration;

use crate::multiaddr::{Multiaddr, Protocol};
use crate::reachability::OutboundCapability;

/// Default timeout for a direct (non-relayed) dial attempt.
pub const DEFAULT_DIRECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout for a dial attempt through a relay.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrClass {
    Ipv6Public,
    Ipv6Private,
    Ipv4Public,
    Ipv4Private,
    RelaySpecific,
    RelayGeneric,
}

/// An address together with its assigned priority (lower dials first) and
/// the timeout that should be applied to a dial attempt against it.
#[derive(Debug, Clone)]
pub struct ScoredAddr {
    pub addr: Multiaddr,
    pub priority: u32,
    pub timeout: Duration,
}

fn classify(addr: &Multiaddr) -> AddrClass {
    if addr.is_circuit_relay() {
        // A relay address carries dialable components before `/p2p-circuit`
        // when a specific relay node is already known; an address that is
        // nothing but the circuit marker (plus perhaps a trailing target
        // peer) means any relay will do.
        let has_relay_addr = addr.iter().take_while(|p| !matches!(p, Protocol::P2pCircuit)).count() > 0;
        return if has_relay_addr { AddrClass::RelaySpecific } else { AddrClass::RelayGeneric };
    }
    if let Some(v6) = addr.iter().find_map(|p| match p {
        Protocol::Ip6(v6) => Some(*v6),
        _ => None,
    }) {
        return if is_ipv6_public(&v6) { AddrClass::Ipv6Public } else { AddrClass::Ipv6Private };
    }
    if let Some(Protocol::Ip4(v4)) = addr.iter().find(|p| matches!(p, Protocol::Ip4(_))) {
        return if v4.is_private() || v4.is_loopback() || v4.is_link_local() {
            AddrClass::Ipv4Private
        } else {
            AddrClass::Ipv4Public
        };
    }
    AddrClass::Ipv4Private
}

fn is_ipv6_public(v6: &Ipv6Addr) -> bool {
    if v6.is_loopback() {
        return false;
    }
    let segments = v6.segments();
    // fc00::/7 unique local
    if (segments[0] & 0xfe00) == 0xfc00 {
        return false;
    }
    true
}

fn priority_table(capability: OutboundCapability) -> fn(AddrClass) -> Option<u32> {
    match (capability.has_ipv4, capability.has_ipv6) {
        (true, true) => |class| {
            Some(match class {
                AddrClass::Ipv6Public => 1,
                AddrClass::Ipv4Public => 2,
                AddrClass::Ipv4Private => 3,
                AddrClass::RelaySpecific => 10,
                AddrClass::RelayGeneric => 20,
                AddrClass::Ipv6Private => return None,
            })
        },
        (true, false) => |class| {
            Some(match class {
                AddrClass::Ipv4Public => 1,
                AddrClass::Ipv4Private => 5,
                AddrClass::RelaySpecific => 10,
                AddrClass::RelayGeneric => 20,
                AddrClass::Ipv6Public | AddrClass::Ipv6Private => return None,
            })
        },
        (false, true) => |class| {
            Some(match class {
                AddrClass::Ipv6Public => 1,
                AddrClass::RelaySpecific => 10,
                AddrClass::RelayGeneric => 20,
                AddrClass::Ipv4Public | AddrClass::Ipv4Private | AddrClass::Ipv6Private => return None,
            })
        },
        (false, false) => |class| {
            Some(match class {
                AddrClass::RelaySpecific => 1,
                AddrClass::RelayGeneric => 5,
                _ => return None,
            })
        },
    }
}

/// Scores and orders `addrs` by the priority table matching `capability`
/// (§4.14). Addresses whose class has no entry for the current capability
/// profile (e.g. an IPv6 address when outbound IPv6 is unavailable) are
/// dropped; callers are expected to have already run [`super::filter_addrs`]
/// so this should rarely trigger. Ties preserve input order (stable sort).
pub fn rank_addrs(addrs: &[Multiaddr], capability: OutboundCapability) -> Vec<ScoredAddr> {
    let table = priority_table(capability);
    let mut scored: Vec<ScoredAddr> = addrs
        .iter()
        .filter_map(|addr| {
            let class = classify(addr);
            let priority = table(class)?;
            let timeout = match class {
                AddrClass::RelaySpecific | AddrClass::RelayGeneric => DEFAULT_RELAY_TIMEOUT,
                _ => DEFAULT_DIRECT_TIMEOUT,
            };
            Some(ScoredAddr { addr: addr.clone(), priority, timeout })
        })
        .collect();
    scored.sort_by_key(|s| s.priority);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn cap(v4: bool, v6: bool) -> OutboundCapability {
        OutboundCapability { has_ipv4: v4, has_ipv6: v6, detected_at: Instant::now() }
    }

    #[test]
    fn dual_stack_prefers_ipv6_public_over_ipv4() {
        let v4 = Multiaddr::parse("/ip4/1.2.3.4/tcp/1").unwrap();
        let v6 = Multiaddr::parse("/ip6/2001:db8::1/tcp/1").unwrap();
        let ranked = rank_addrs(&[v4.clone(), v6.clone()], cap(true, true));
        assert_eq!(ranked[0].addr, v6);
        assert_eq!(ranked[1].addr, v4);
    }

    #[test]
    fn relay_generic_ranked_behind_specific() {
        let specific = Multiaddr::parse("/ip4/1.2.3.4/tcp/1/p2p-circuit").unwrap();
        let generic = Multiaddr::parse("/p2p-circuit").unwrap();
        let ranked = rank_addrs(&[generic.clone(), specific.clone()], cap(true, true));
        assert_eq!(ranked[0].addr, specific);
        assert_eq!(ranked[1].addr, generic);
    }

    #[test]
    fn relay_gets_longer_timeout_than_direct() {
        let direct = Multiaddr::parse("/ip4/1.2.3.4/tcp/1").unwrap();
        let relay = Multiaddr::parse("/ip4/1.2.3.4/tcp/1/p2p-circuit").unwrap();
        let ranked = rank_addrs(&[direct, relay], cap(true, true));
        let direct_entry = ranked.iter().find(|s| !s.addr.is_circuit_relay()).unwrap();
        let relay_entry = ranked.iter().find(|s| s.addr.is_circuit_relay()).unwrap();
        assert_eq!(direct_entry.timeout, DEFAULT_DIRECT_TIMEOUT);
        assert_eq!(relay_entry.timeout, DEFAULT_RELAY_TIMEOUT);
    }
}
