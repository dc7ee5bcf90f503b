//! Reachability & dialing helpers (§4.14): outbound capability detection,
//! address filter, IPv6 dedup, priority ranker, and the happy-eyeballs dialer.

mod capability;
mod dialer;
mod filter;
mod ranker;

pub use capability::{CapabilityDetector, OutboundCapability};
pub use dialer::{happy_eyeballs_dial, DialAttempt};
pub use filter::{dedup_ipv6, filter_addrs};
pub use ranker::{rank_addrs, ScoredAddr};
