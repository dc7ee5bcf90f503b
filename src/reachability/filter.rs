//! Address filter and IPv6 deduplication (§4.14).

use std::net::Ipv6Addr;

use crate::multiaddr::{Multiaddr, Protocol};
use crate::reachability::OutboundCapability;

fn ipv6_of(addr: &Multiaddr) -> Option<Ipv6Addr> {
    addr.iter().find_map(|p| match p {
        Protocol::Ip6(v6) => Some(*v6),
        _ => None,
    })
}

fn is_ipv6_link_local(v6: &Ipv6Addr) -> bool {
    // fe80::/10
    let segments = v6.segments();
    (segments[0] & 0xffc0) == 0xfe80
}

/// Drops link-local IPv6 unconditionally, and families the local host cannot
/// egress on, except `/p2p-circuit` addresses which are always kept (§4.14).
pub fn filter_addrs(addrs: &[Multiaddr], capability: OutboundCapability) -> Vec<Multiaddr> {
    addrs
        .iter()
        .filter(|addr| {
            if addr.is_circuit_relay() {
                return true;
            }
            if let Some(v6) = ipv6_of(addr) {
                if is_ipv6_link_local(&v6) {
                    return false;
                }
                if !capability.has_ipv6 {
                    return false;
                }
                return true;
            }
            let is_ipv4 = addr.value_for_protocol("ip4").is_some();
            if is_ipv4 && !capability.has_ipv4 {
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// Keeps only the first-ordered address per distinct IPv6 /64 prefix;
/// non-IPv6 addresses pass through untouched (§4.14).
pub fn dedup_ipv6(addrs: &[Multiaddr]) -> Vec<Multiaddr> {
    let mut seen_prefixes = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(addrs.len());
    for addr in addrs {
        match ipv6_of(addr) {
            Some(v6) => {
                let segments = v6.segments();
                let prefix = (segments[0], segments[1], segments[2], segments[3]);
                if seen_prefixes.insert(prefix) {
                    out.push(addr.clone());
                }
            }
            None => out.push(addr.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn cap(v4: bool, v6: bool) -> OutboundCapability {
        OutboundCapability { has_ipv4: v4, has_ipv6: v6, detected_at: Instant::now() }
    }

    #[test]
    fn link_local_ipv6_always_dropped() {
        let addr = Multiaddr::parse("/ip6/fe80::1/tcp/1").unwrap();
        let out = filter_addrs(&[addr], cap(true, true));
        assert!(out.is_empty());
    }

    #[test]
    fn ipv6_dropped_without_capability_unless_relay() {
        let v6 = Multiaddr::parse("/ip6/2001:db8::1/tcp/1").unwrap();
        let relay = Multiaddr::parse("/ip6/2001:db8::2/tcp/1/p2p-circuit").unwrap();
        let out = filter_addrs(&[v6, relay.clone()], cap(true, false));
        assert_eq!(out, vec![relay]);
    }

    #[test]
    fn dedup_keeps_first_per_64_prefix() {
        let a = Multiaddr::parse("/ip6/2001:db8::1/tcp/1").unwrap();
        let b = Multiaddr::parse("/ip6/2001:db8::2/tcp/2").unwrap();
        let out = dedup_ipv6(&[a.clone(), b]);
        assert_eq!(out, vec![a]);
    }
}
