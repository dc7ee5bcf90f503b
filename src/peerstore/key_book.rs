//! KeyBook: per-peer public/private key storage with identity checks (§4.4).

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Error;
use crate::identity::{PrivateKey, PublicKey};
use crate::PeerId;

#[derive(Default)]
struct Keys {
    public: Option<PublicKey>,
    private: Option<PrivateKey>,
}

pub struct KeyBook {
    inner: Mutex<HashMap<PeerId, Keys>>,
}

impl Default for KeyBook {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBook {
    pub fn new() -> Self {
        KeyBook { inner: Mutex::new(HashMap::new()) }
    }

    pub fn add_pub_key(&self, peer: &PeerId, pk: PublicKey) -> Result<(), Error> {
        if !peer.matches_public_key(&pk) {
            return Err(Error::IdentityMismatch);
        }
        let mut map = self.inner.lock();
        map.entry(peer.clone()).or_default().public = Some(pk);
        Ok(())
    }

    pub fn add_priv_key(&self, peer: &PeerId, sk: PrivateKey) -> Result<(), Error> {
        if !peer.matches_private_key(&sk) {
            return Err(Error::IdentityMismatch);
        }
        let mut map = self.inner.lock();
        map.entry(peer.clone()).or_default().private = Some(sk);
        Ok(())
    }

    /// Returns the stored public key, lazily extracting it from the PeerId's
    /// inlined identity-hash bytes if none was explicitly stored (§4.4).
    pub fn pub_key(&self, peer: &PeerId) -> Option<PublicKey> {
        {
            let map = self.inner.lock();
            if let Some(keys) = map.get(peer) {
                if let Some(pk) = &keys.public {
                    return Some(pk.clone());
                }
            }
        }
        peer.extract_inlined_public_key()
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        self.inner.lock().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    #[test]
    fn mismatched_key_rejected() {
        let book = KeyBook::new();
        let peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        let wrong_pk = Keypair::generate_ed25519().public();
        assert!(matches!(book.add_pub_key(&peer, wrong_pk), Err(Error::IdentityMismatch)));
    }

    #[test]
    fn matching_key_accepted_and_read_back() {
        let book = KeyBook::new();
        let kp = Keypair::generate_ed25519();
        let pk = kp.public();
        let peer = PeerId::from_public_key(&pk);
        book.add_pub_key(&peer, pk.clone()).unwrap();
        assert_eq!(book.pub_key(&peer), Some(pk));
    }

    #[test]
    fn lazily_extracts_inlined_key() {
        let book = KeyBook::new();
        let kp = Keypair::generate_ed25519();
        let pk = kp.public();
        let peer = PeerId::from_public_key(&pk);
        // Never explicitly stored, but Ed25519 keys are small enough to inline.
        assert_eq!(book.pub_key(&peer), Some(pk));
    }
}
