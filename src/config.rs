use std::time::Duration;

use crate::election::Rank;
use crate::error::{ElectionError, Result};

/// Timing knobs for a single node's election loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    /// How long a node waits for an ALIVE from a higher rank before it
    /// presumes every higher rank crashed and self-elects.
    pub election_timeout_ms: u64,
    /// Lower bound of the per-iteration latency jitter.
    pub jitter_min_ms: u64,
    /// Upper bound of the per-iteration latency jitter (inclusive).
    pub jitter_max_ms: u64,
    /// Delay applied before every outbound delivery. Zero disables it.
    pub send_latency_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: 2000,
            jitter_min_ms: 0,
            jitter_max_ms: 10,
            send_latency_ms: 0,
        }
    }
}

impl ElectionConfig {
    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }

    pub fn send_latency(&self) -> Option<Duration> {
        (self.send_latency_ms > 0).then(|| Duration::from_millis(self.send_latency_ms))
    }

    pub fn with_election_timeout_ms(mut self, ms: u64) -> Self {
        self.election_timeout_ms = ms;
        self
    }

    pub fn with_jitter_ms(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.jitter_min_ms = min_ms;
        self.jitter_max_ms = max_ms;
        self
    }

    pub fn with_send_latency_ms(mut self, ms: u64) -> Self {
        self.send_latency_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_ms == 0 {
            return Err(ElectionError::InvalidConfig(
                "election timeout must be greater than zero".to_string(),
            ));
        }
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(ElectionError::InvalidConfig(format!(
                "jitter bounds out of order: min {}ms > max {}ms",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }
        Ok(())
    }
}

/// Shape of a simulated cluster: how many nodes, which of them get the
/// initial WAKEUP, and which never process their mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub size: usize,
    pub wakeup: Vec<Rank>,
    /// Registered but unresponsive ranks. Messages sent to them are accepted
    /// and never answered.
    pub silent: Vec<Rank>,
    pub election: ElectionConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            size: 3,
            wakeup: vec![1],
            silent: Vec::new(),
            election: ElectionConfig::default(),
        }
    }
}

impl ClusterConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn with_wakeup(mut self, ranks: Vec<Rank>) -> Self {
        self.wakeup = ranks;
        self
    }

    pub fn with_silent(mut self, ranks: Vec<Rank>) -> Self {
        self.silent = ranks;
        self
    }

    pub fn with_election(mut self, election: ElectionConfig) -> Self {
        self.election = election;
        self
    }

    pub fn is_silent(&self, rank: Rank) -> bool {
        self.silent.contains(&rank)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(ElectionError::EmptyCluster);
        }
        self.election.validate()?;

        let max = self.size as Rank;
        for &rank in self.wakeup.iter().chain(self.silent.iter()) {
            if rank == 0 || rank > max {
                return Err(ElectionError::InvalidConfig(format!(
                    "rank {} outside of 1..={}",
                    rank, max
                )));
            }
        }
        Ok(())
    }
}
