//! Signed envelopes & peer records (§4.3).

pub mod envelope;
pub mod peer_record;

pub use envelope::Envelope;
pub use peer_record::{PeerRecord, PEER_RECORD_DOMAIN, PEER_RECORD_PAYLOAD_TYPE};
