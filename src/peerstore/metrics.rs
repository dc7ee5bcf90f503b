//! Per-peer latency metrics as an EWMA (§4.4), smoothing factor α = 0.1.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::PeerId;

const ALPHA: f64 = 0.1;

pub struct Metrics {
    latency_ms: Mutex<HashMap<PeerId, f64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Metrics { latency_ms: Mutex::new(HashMap::new()) }
    }

    pub fn record_latency(&self, peer: &PeerId, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        let mut map = self.latency_ms.lock();
        map.entry(peer.clone())
            .and_modify(|ewma| *ewma = ALPHA * sample_ms + (1.0 - ALPHA) * *ewma)
            .or_insert(sample_ms);
    }

    pub fn latency_ewma(&self, peer: &PeerId) -> Option<Duration> {
        self.latency_ms.lock().get(peer).map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        self.latency_ms.lock().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    #[test]
    fn ewma_converges_toward_samples() {
        let metrics = Metrics::new();
        let peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());
        metrics.record_latency(&peer, Duration::from_millis(100));
        for _ in 0..50 {
            metrics.record_latency(&peer, Duration::from_millis(50));
        }
        let ewma = metrics.latency_ewma(&peer).unwrap();
        assert!((ewma.as_millis() as i64 - 50).abs() < 5);
    }
}
