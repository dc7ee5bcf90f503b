//! Transport-agnostic peer networking core: multiaddress codec, identity,
//! signed peer records, peerstore, event bus, resource accounting,
//! transport/security/muxer abstractions, protocol negotiation, connection
//! management, the swarm, and the host façade, plus identify, reachability,
//! NAT behavior tracking, mDNS discovery and a backoff/discovery cache.
//!
//! Concrete transports, security protocols and muxers (TCP, QUIC, Noise,
//! TLS, Yamux...) are consumed boundaries: this crate defines the traits
//! they implement and an in-memory stand-in of each (under `transport`) used
//! by its own tests, but ships none of the real wire implementations.

pub mod connmgr;
pub mod discovery;
pub mod error;
pub mod event_bus;
pub mod host;
pub mod identify;
pub mod identity;
pub mod mdns;
pub mod multiaddr;
pub mod multistream;
pub mod muxer;
pub mod nat;
pub mod peerstore;
pub mod reachability;
pub mod record;
pub mod resource;
pub mod security;
pub mod swarm;
pub mod transport;
pub mod upgrade;

pub use error::{Error, Result};
pub use identity::PeerId;
