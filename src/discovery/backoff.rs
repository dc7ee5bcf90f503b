//! Per-peer exponential backoff with full jitter (SPEC_FULL §B).

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::PeerId;

const BASE: Duration = Duration::from_secs(1);
const FACTOR: u32 = 2;
const CAP: Duration = Duration::from_secs(300);

/// Tracks retry attempt counts per peer and hands back a jittered delay
/// before the next discovery/dial retry for that peer.
pub struct BackoffTracker {
    attempts: Mutex<HashMap<PeerId, u32>>,
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffTracker {
    pub fn new() -> Self {
        BackoffTracker { attempts: Mutex::new(HashMap::new()) }
    }

    /// Returns the delay to wait before retrying `peer`, bumping its attempt
    /// counter. Base 1s, factor 2, capped at 5 minutes, full jitter.
    pub fn next_delay(&self, peer: &PeerId) -> Duration {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(peer.clone()).or_insert(0);
        let delay = delay_for_attempt(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Clears the attempt counter after a successful connection/discovery.
    pub fn reset(&self, peer: &PeerId) {
        self.attempts.lock().remove(peer);
    }
}

fn delay_for_attempt(attempt: u32) -> Duration {
    let unjittered_ms = BASE.as_millis() as u64 * (FACTOR as u64).saturating_pow(attempt);
    let capped_ms = unjittered_ms.min(CAP.as_millis() as u64);
    let jittered_ms = if capped_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=capped_ms) };
    Duration::from_millis(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn peer() -> PeerId {
        PeerId::from_public_key(&Keypair::generate_ed25519().public())
    }

    #[test]
    fn delay_never_exceeds_cap() {
        for attempt in 0..20 {
            assert!(delay_for_attempt(attempt) <= CAP);
        }
    }

    #[test]
    fn reset_clears_attempt_count() {
        let tracker = BackoffTracker::new();
        let p = peer();
        tracker.next_delay(&p);
        tracker.next_delay(&p);
        assert!(tracker.attempts.lock().get(&p).copied().unwrap_or(0) >= 2);
        tracker.reset(&p);
        assert!(tracker.attempts.lock().get(&p).is_none());
    }
}
