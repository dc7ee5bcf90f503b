//! Backoff & discovery cache (§2 leaf component, SPEC_FULL §B): retry policy
//! and peer caching feeding the swarm's dial candidate collection.

mod backoff;
mod cache;

pub use backoff::BackoffTracker;
pub use cache::{AddrInfo, DiscoveryCache, DEFAULT_CAPACITY};
