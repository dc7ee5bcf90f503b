//! [`PeerId`] derivation from a public key (§4.2).

use std::fmt;
use std::str::FromStr;

use multihash::Multihash;
use sha2::Digest;

use crate::error::Error;
use crate::identity::keypair::{PrivateKey, PublicKey};

/// Identity multihash code (0x00) vs sha2-256 (0x12), matching existing libp2p practice.
const MULTIHASH_IDENTITY: u64 = 0x00;
const MULTIHASH_SHA256: u64 = 0x12;
/// Keys whose marshaled bytes are this size or smaller are embedded directly
/// (identity hash) rather than hashed, per §4.2.
const MAX_INLINE_KEY_LEN: usize = 42;
const MULTIHASH_MAX_DIGEST: usize = 64;

/// Canonical identifier derived from a public key (§3).
///
/// Two `PeerId`s are equal iff their byte forms are equal; the byte form is a
/// multihash of the key's canonical marshal bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    multihash: Multihash<MULTIHASH_MAX_DIGEST>,
}

impl PeerId {
    pub fn from_public_key(pk: &PublicKey) -> Self {
        let bytes = pk.marshal();
        let multihash = if bytes.len() <= MAX_INLINE_KEY_LEN {
            Multihash::wrap(MULTIHASH_IDENTITY, &bytes).expect("identity digest fits")
        } else {
            let digest = sha2::Sha256::digest(&bytes);
            Multihash::wrap(MULTIHASH_SHA256, &digest).expect("sha256 digest fits")
        };
        PeerId { multihash }
    }

    pub fn matches_public_key(&self, pk: &PublicKey) -> bool {
        *self == PeerId::from_public_key(pk)
    }

    pub fn matches_private_key(&self, sk: &PrivateKey) -> bool {
        self.matches_public_key(&sk.public())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.multihash.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let multihash = Multihash::from_bytes(bytes).map_err(|e| Error::InvalidFormat(e.to_string()))?;
        Ok(PeerId { multihash })
    }

    /// Lazily recover the public key when the identity hash inlined it (§4.4 KeyBook note).
    pub fn extract_inlined_public_key(&self) -> Option<PublicKey> {
        if self.multihash.code() != MULTIHASH_IDENTITY {
            return None;
        }
        PublicKey::unmarshal(self.multihash.digest()).ok()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.to_bytes()).into_string())
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| Error::InvalidFormat(e.to_string()))?;
        PeerId::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::keypair::Keypair;

    #[test]
    fn ed25519_peer_id_matches_key() {
        let kp = Keypair::generate_ed25519();
        let pk = kp.public();
        let id = PeerId::from_public_key(&pk);
        assert!(id.matches_public_key(&pk));
    }

    #[test]
    fn string_round_trip() {
        let kp = Keypair::generate_ed25519();
        let id = PeerId::from_public_key(&kp.public());
        let s = id.to_string();
        let id2: PeerId = s.parse().unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn small_key_uses_identity_hash_and_is_recoverable() {
        let kp = Keypair::generate_ed25519();
        let pk = kp.public();
        let id = PeerId::from_public_key(&pk);
        assert_eq!(id.extract_inlined_public_key(), Some(pk));
    }

    #[test]
    fn different_keys_yield_different_ids() {
        let a = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        let b = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        assert_ne!(a, b);
    }
}
