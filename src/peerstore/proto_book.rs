//! ProtoBook: per-peer set of supported protocol ids (§4.4).

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::PeerId;

pub struct ProtoBook {
    inner: Mutex<HashMap<PeerId, HashSet<String>>>,
}

impl Default for ProtoBook {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtoBook {
    pub fn new() -> Self {
        ProtoBook { inner: Mutex::new(HashMap::new()) }
    }

    pub fn set(&self, peer: &PeerId, protocols: impl IntoIterator<Item = String>) {
        let mut map = self.inner.lock();
        map.insert(peer.clone(), protocols.into_iter().collect());
    }

    pub fn add(&self, peer: &PeerId, protocol: impl Into<String>) {
        let mut map = self.inner.lock();
        map.entry(peer.clone()).or_default().insert(protocol.into());
    }

    pub fn remove(&self, peer: &PeerId, protocol: &str) {
        let mut map = self.inner.lock();
        if let Some(set) = map.get_mut(peer) {
            set.remove(protocol);
        }
    }

    pub fn protocols(&self, peer: &PeerId) -> HashSet<String> {
        self.inner.lock().get(peer).cloned().unwrap_or_default()
    }

    /// Subset of `candidates` that `peer` is known to support.
    pub fn supports_protocols(&self, peer: &PeerId, candidates: &[String]) -> Vec<String> {
        let map = self.inner.lock();
        let Some(set) = map.get(peer) else { return Vec::new() };
        candidates.iter().filter(|c| set.contains(*c)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn peer() -> PeerId {
        PeerId::from_public_key(&Keypair::generate_ed25519().public())
    }

    #[test]
    fn add_and_query() {
        let book = ProtoBook::new();
        let p = peer();
        book.add(&p, "/echo/1.0.0");
        assert!(book.protocols(&p).contains("/echo/1.0.0"));
    }

    #[test]
    fn supports_subset() {
        let book = ProtoBook::new();
        let p = peer();
        book.set(&p, ["/a/1.0.0".to_string(), "/b/1.0.0".to_string()]);
        let subset = book.supports_protocols(&p, &["/a/1.0.0".to_string(), "/c/1.0.0".to_string()]);
        assert_eq!(subset, vec!["/a/1.0.0".to_string()]);
    }
}
