//! Peer identity & keys (§4.2): keypairs, marshaling, and PeerId derivation.

pub mod keypair;
pub mod peer_id;

pub use keypair::{KeyType, Keypair, PrivateKey, PublicKey};
pub use peer_id::PeerId;
