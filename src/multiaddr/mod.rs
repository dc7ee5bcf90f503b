//! Multiaddress codec (§4.1).
//!
//! A [`Multiaddr`] is an ordered, self-describing sequence of protocol
//! components (`/ip4/1.2.3.4/udp/4001/...`). This module owns parsing,
//! encoding, and the invariants in Testable Property 2: `parse(encode(x)) ==
//! x` and `encode(parse(s))` canonicalizes `s` idempotently.

mod protocol;

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

pub use protocol::Protocol;

use crate::error::Error;

/// An ordered sequence of [`Protocol`] components.
///
/// Components are stored inline for the common case (few components) via
/// `SmallVec`, matching the teacher's own `SmallVec<[Multiaddr; 8]>` use for
/// listened addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Multiaddr {
    components: SmallVec<[Protocol; 6]>,
}

impl Multiaddr {
    pub fn empty() -> Self {
        Multiaddr { components: SmallVec::new() }
    }

    pub fn push(&mut self, p: Protocol) {
        self.components.push(p);
    }

    pub fn with(mut self, p: Protocol) -> Self {
        self.push(p);
        self
    }

    /// Concatenate two addresses, e.g. a relay address with a relayed target.
    pub fn concat(&self, other: &Multiaddr) -> Multiaddr {
        let mut out = self.clone();
        out.components.extend(other.components.iter().cloned());
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Protocol> {
        self.components.iter()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// First value matching a protocol by name, e.g. `value_for_protocol("tcp")`.
    pub fn value_for_protocol(&self, name: &str) -> Option<&Protocol> {
        self.components.iter().find(|p| p.name() == name)
    }

    /// The terminal `/p2p/<peer-id>` component, if present. Invariant (§3): at
    /// most one may exist; we only ever look at the last component since a
    /// well-formed address places it at the end.
    pub fn peer_id(&self) -> Option<&crate::PeerId> {
        match self.components.last() {
            Some(Protocol::P2p(id)) => Some(id),
            _ => None,
        }
    }

    pub fn is_circuit_relay(&self) -> bool {
        self.components.iter().any(|p| matches!(p, Protocol::P2pCircuit))
    }

    /// Strip a trailing `/p2p/<id>` component, returning the address without it.
    pub fn without_peer_id(&self) -> Multiaddr {
        let mut out = self.clone();
        if matches!(out.components.last(), Some(Protocol::P2p(_))) {
            out.components.pop();
        }
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        s.parse()
    }
}

impl FromStr for Multiaddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        // Canonicalization: drop a trailing slash, strip IPv6 zone identifiers
        // (the `%eth0` suffix some OSes report on link-local addresses), and
        // require the string otherwise to start with `/`.
        let s = s.strip_suffix('/').unwrap_or(s);
        if s.is_empty() {
            return Ok(Multiaddr::empty());
        }
        if !s.starts_with('/') {
            return Err(Error::InvalidFormat("multiaddr must start with /".into()));
        }

        let mut parts = s[1..].split('/').peekable();
        let mut components = SmallVec::new();

        while let Some(name) = parts.next() {
            if name.is_empty() {
                return Err(Error::InvalidFormat("empty protocol component".into()));
            }
            let takes_value = matches!(
                name,
                "ip4" | "ip6" | "tcp" | "udp" | "dns" | "dns4" | "dns6" | "p2p" | "unix" | "sni"
            );
            let value = if takes_value {
                let raw = parts
                    .next()
                    .ok_or_else(|| Error::InvalidFormat(format!("{name} requires a value")))?;
                Some(strip_zone_id(raw))
            } else {
                None
            };
            components.push(Protocol::parse(name, value.as_deref())?);
        }

        Ok(Multiaddr { components })
    }
}

/// Strip an IPv6 zone identifier (`fe80::1%eth0` -> `fe80::1`), per §4.1.
fn strip_zone_id(raw: &str) -> String {
    match raw.find('%') {
        Some(idx) => raw[..idx].to_string(),
        None => raw.to_string(),
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

impl From<std::net::SocketAddr> for Multiaddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        let mut m = Multiaddr::empty();
        match addr.ip() {
            std::net::IpAddr::V4(v4) => m.push(Protocol::Ip4(v4)),
            std::net::IpAddr::V6(v6) => m.push(Protocol::Ip6(v6)),
        }
        m.push(Protocol::Tcp(addr.port()));
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_basic() {
        let s = "/ip4/127.0.0.1/tcp/4001";
        let a = Multiaddr::parse(s).unwrap();
        assert_eq!(a.to_string(), s);
    }

    #[test]
    fn round_trip_with_peer_id() {
        let (_sk, pk) = crate::identity::Keypair::generate_ed25519().into_keypair();
        let peer = crate::PeerId::from_public_key(&pk);
        let s = format!("/ip4/1.2.3.4/udp/4001/quic-v1/p2p/{peer}");
        let a = Multiaddr::parse(&s).unwrap();
        assert_eq!(a.to_string(), s);
        assert_eq!(a.peer_id(), Some(&peer));
    }

    #[test]
    fn trailing_slash_canonicalizes() {
        let a = Multiaddr::parse("/ip4/1.2.3.4/tcp/1/").unwrap();
        assert_eq!(a.to_string(), "/ip4/1.2.3.4/tcp/1");
    }

    #[test]
    fn zone_id_stripped() {
        let a = Multiaddr::parse("/ip6/fe80::1%eth0/tcp/1").unwrap();
        assert_eq!(a.to_string(), "/ip6/fe80::1/tcp/1");
    }

    #[test]
    fn unknown_protocol_rejected() {
        assert!(Multiaddr::parse("/bogus/1").is_err());
    }

    #[test]
    fn value_for_protocol() {
        let a = Multiaddr::parse("/ip4/1.2.3.4/tcp/30333").unwrap();
        assert_eq!(a.value_for_protocol("tcp"), Some(&Protocol::Tcp(30333)));
        assert_eq!(a.value_for_protocol("udp"), None);
    }

    #[test]
    fn concat_relay() {
        let relay = Multiaddr::parse("/ip4/1.2.3.4/tcp/1/p2p-circuit").unwrap();
        let target = Multiaddr::parse("/p2p/12D3KooWAJjbRkp8FPF5MKgMU53aN5dMubQcjbSd5kEqgwCbP1Mx").unwrap();
        let full = relay.concat(&target);
        assert!(full.is_circuit_relay());
    }

    use proptest::prelude::*;

    proptest::proptest! {
        #[test]
        fn prop_round_trip(ip in "([0-9]{1,3}\\.){3}[0-9]{1,3}", port in 0u16..=65535) {
            let s = format!("/ip4/{ip}/tcp/{port}");
            if let Ok(addr) = Multiaddr::parse(&s) {
                let encoded = addr.to_string();
                let reparsed = Multiaddr::parse(&encoded).unwrap();
                prop_assert_eq!(addr, reparsed);
            }
        }
    }
}
