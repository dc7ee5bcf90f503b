//! Decaying connection tags (§4.12, SPEC_FULL §B): integer per-peer scores
//! that decay on a timer and are bumped by caller-supplied logic, used to
//! rank peers for eviction when trimming.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::PeerId;

const LOG_TARGET: &str = "junction::connmgr";

/// Result of a decay step: the new value, and whether the tag entry should be
/// dropped entirely (e.g. once it has decayed to zero).
pub struct DecayResult {
    pub value: i64,
    pub remove: bool,
}

pub type DecayFn = Arc<dyn Fn(i64) -> DecayResult + Send + Sync>;
pub type BumpFn = Arc<dyn Fn(i64, i64) -> i64 + Send + Sync>;

struct TagSpec {
    decay: DecayFn,
    bump: BumpFn,
}

/// Registry of named decaying tags plus the live (peer, tag) → score table.
pub struct TagRegistry {
    specs: Mutex<HashMap<String, TagSpec>>,
    scores: Mutex<HashMap<(PeerId, String), i64>>,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TagRegistry {
    pub fn new() -> Self {
        TagRegistry { specs: Mutex::new(HashMap::new()), scores: Mutex::new(HashMap::new()) }
    }

    /// Register a tag's decay/bump behavior and spawn its background decay
    /// loop. Fails if `name` is already registered (§4.12).
    pub fn register_decaying_tag(
        self: &Arc<Self>,
        name: &str,
        interval: Duration,
        decay: DecayFn,
        bump: BumpFn,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        {
            let mut specs = self.specs.lock();
            if specs.contains_key(name) {
                return Err(Error::InvalidFormat(format!("tag {name} already registered")));
            }
            specs.insert(name.to_string(), TagSpec { decay, bump });
        }

        let registry = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => registry.decay_tick(&name),
                }
            }
        });
        Ok(())
    }

    fn decay_tick(&self, name: &str) {
        let decay = {
            let specs = self.specs.lock();
            match specs.get(name) {
                Some(spec) => spec.decay.clone(),
                None => return,
            }
        };
        let mut scores = self.scores.lock();
        let mut to_remove = Vec::new();
        for (key, value) in scores.iter_mut() {
            if key.1 != name {
                continue;
            }
            let result = decay(*value);
            *value = result.value;
            if result.remove {
                to_remove.push(key.clone());
            }
        }
        for key in to_remove {
            scores.remove(&key);
        }
        debug!(target: LOG_TARGET, tag = name, "decay tick applied");
    }

    pub fn bump(&self, peer: &PeerId, tag: &str, delta: i64) {
        let bump_fn = {
            let specs = self.specs.lock();
            match specs.get(tag) {
                Some(spec) => spec.bump.clone(),
                None => return,
            }
        };
        let mut scores = self.scores.lock();
        let entry = scores.entry((peer.clone(), tag.to_string())).or_insert(0);
        *entry = bump_fn(*entry, delta);
    }

    pub fn score(&self, peer: &PeerId, tag: &str) -> i64 {
        self.scores.lock().get(&(peer.clone(), tag.to_string())).copied().unwrap_or(0)
    }

    /// Sum of all of a peer's tag scores, used to rank eviction candidates.
    pub fn total_score(&self, peer: &PeerId) -> i64 {
        self.scores.lock().iter().filter(|(k, _)| &k.0 == peer).map(|(_, v)| *v).sum()
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        self.scores.lock().retain(|k, _| &k.0 != peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    #[tokio::test]
    async fn registering_same_tag_twice_fails() {
        let registry = Arc::new(TagRegistry::new());
        let decay: DecayFn = Arc::new(|v| DecayResult { value: v, remove: false });
        let bump: BumpFn = Arc::new(|v, d| v + d);
        registry
            .register_decaying_tag("useful", Duration::from_secs(60), decay.clone(), bump.clone(), CancellationToken::new())
            .unwrap();
        let err = registry.register_decaying_tag("useful", Duration::from_secs(60), decay, bump, CancellationToken::new());
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn bump_and_score() {
        let registry = Arc::new(TagRegistry::new());
        let decay: DecayFn = Arc::new(|v| DecayResult { value: v, remove: false });
        let bump: BumpFn = Arc::new(|v, d| v + d);
        registry
            .register_decaying_tag("useful", Duration::from_secs(3600), decay, bump, CancellationToken::new())
            .unwrap();
        let peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        registry.bump(&peer, "useful", 10);
        registry.bump(&peer, "useful", 5);
        assert_eq!(registry.score(&peer, "useful"), 15);
        assert_eq!(registry.total_score(&peer), 15);
    }
}
