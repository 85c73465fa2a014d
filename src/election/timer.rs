use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Generates a random latency jitter within the configured range
pub fn random_jitter(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(min_ms..=max_ms);
    Duration::from_millis(jitter_ms)
}

/// Remembers when this node broadcast ELECTION so the loop can tell when
/// higher ranks have stayed silent for too long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElectionTimer {
    sent_at: Option<Instant>,
}

impl ElectionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, now: Instant) {
        self.sent_at = Some(now);
    }

    pub fn disarm(&mut self) {
        self.sent_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sent_at.is_some()
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    /// True iff armed, strictly more than `threshold` has passed since
    /// arming, and no leader is known yet.
    pub fn expired(&self, threshold: Duration, now: Instant, leader_known: bool) -> bool {
        match self.sent_at {
            Some(sent_at) if !leader_known => now.saturating_duration_since(sent_at) > threshold,
            _ => false,
        }
    }

    /// Earliest instant at which `expired` can turn true.
    pub fn deadline(&self, threshold: Duration) -> Option<Instant> {
        // +1ms because expiry is strictly greater than the threshold
        self.sent_at
            .map(|sent_at| sent_at + threshold + Duration::from_millis(1))
    }
}
