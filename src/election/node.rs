use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::cluster::Registry;
use crate::config::ElectionConfig;
use crate::election::mailbox::Mailbox;
use crate::election::message::{Envelope, Message};
use crate::election::state::{
    Disposition, ElectionCore, ElectionState, IgnoreReason, Outbound, Resolution,
};
use crate::election::timer::random_jitter;
use crate::election::Rank;

/// Snapshot of a node published after every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub rank: Rank,
    pub state: ElectionState,
    pub leader: Option<Rank>,
    pub running: bool,
}

/// Per-tag message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageCounts {
    pub wakeup: u64,
    pub election: u64,
    pub alive: u64,
    pub victory: u64,
}

impl MessageCounts {
    pub fn record(&mut self, message: Message) {
        match message {
            Message::Wakeup => self.wakeup += 1,
            Message::Election => self.election += 1,
            Message::Alive => self.alive += 1,
            Message::Victory => self.victory += 1,
        }
    }

    pub fn get(&self, message: Message) -> u64 {
        match message {
            Message::Wakeup => self.wakeup,
            Message::Election => self.election,
            Message::Alive => self.alive,
            Message::Victory => self.victory,
        }
    }

    pub fn total(&self) -> u64 {
        self.wakeup + self.election + self.alive + self.victory
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub received: MessageCounts,
    pub sent: MessageCounts,
    /// Messages dequeued but without effect
    pub ignored: u64,
    /// Sends that found the target's mailbox closed
    pub dropped: u64,
}

/// Final outcome of a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub rank: Rank,
    pub state: ElectionState,
    pub leader: Option<Rank>,
    pub resolution: Option<Resolution>,
    pub silent: bool,
    pub stats: NodeStats,
}

impl NodeReport {
    /// Report for a registered node that never processed its mailbox.
    pub fn silent(rank: Rank) -> Self {
        Self {
            rank,
            state: ElectionState::Idle,
            leader: None,
            resolution: None,
            silent: true,
            stats: NodeStats::default(),
        }
    }
}

/// A Bully participant.
///
/// The node owns its mailbox receiver and its state machine. Peers reach it
/// only through the registry's mailbox senders, so the processing loop is
/// the single writer of everything here.
pub struct Node {
    core: ElectionCore,
    mailbox: Mailbox,
    registry: Arc<Registry>,
    config: ElectionConfig,
    status_tx: watch::Sender<NodeStatus>,
    stats: NodeStats,
}

impl Node {
    pub fn new(
        rank: Rank,
        registry: Arc<Registry>,
        mailbox: Mailbox,
        config: ElectionConfig,
    ) -> (Self, watch::Receiver<NodeStatus>) {
        let core = ElectionCore::new(rank, registry.clone(), config.election_timeout());
        let (status_tx, status_rx) = watch::channel(Self::snapshot(&core));

        let node = Self {
            core,
            mailbox,
            registry,
            config,
            status_tx,
            stats: NodeStats::default(),
        };

        (node, status_rx)
    }

    pub fn rank(&self) -> Rank {
        self.core.rank()
    }

    pub fn status(&self) -> NodeStatus {
        Self::snapshot(&self.core)
    }

    fn snapshot(core: &ElectionCore) -> NodeStatus {
        NodeStatus {
            rank: core.rank(),
            state: core.state(),
            leader: core.leader(),
            running: core.is_running(),
        }
    }

    /// Run the node until it knows its leader.
    ///
    /// Each iteration sleeps a random jitter, then waits for either the next
    /// mailbox entry or the election deadline, whichever comes first. At most
    /// one entry is processed per iteration, followed by the timeout check.
    pub async fn run(mut self) -> NodeReport {
        let rank = self.rank();
        tracing::debug!(rank, "Node loop started");

        while self.core.is_running() {
            let jitter = random_jitter(self.config.jitter_min_ms, self.config.jitter_max_ms);
            tracing::trace!(rank, jitter_ms = jitter.as_millis() as u64, "Sleeping");
            tokio::time::sleep(jitter).await;

            let deadline = self.core.timeout_deadline();
            let next = tokio::select! {
                envelope = self.mailbox.recv() => match envelope {
                    Some(envelope) => Some(envelope),
                    None => {
                        tracing::warn!(rank, "Mailbox closed, stopping node");
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => None,
            };

            if let Some(envelope) = next {
                self.process(envelope).await;
            }

            let before = self.core.state();
            let tick = self.core.check_timeout(Instant::now());
            self.apply(before, tick).await;
        }

        // Anything still queued or sent from now on is stale
        self.mailbox.close();
        while let Some(envelope) = self.mailbox.dequeue() {
            self.stats.received.record(envelope.message);
            self.ignore(envelope, IgnoreReason::Decided);
        }

        self.report()
    }

    async fn process(&mut self, envelope: Envelope) {
        let rank = self.rank();
        self.stats.received.record(envelope.message);
        tracing::debug!(
            rank,
            from = envelope.from,
            message = %envelope.message,
            "Received message"
        );

        let before = self.core.state();
        match self.core.handle(envelope, Instant::now()) {
            Disposition::Ignored(reason) => self.ignore(envelope, reason),
            applied => self.apply(before, applied).await,
        }
    }

    fn ignore(&mut self, envelope: Envelope, reason: IgnoreReason) {
        self.stats.ignored += 1;
        tracing::debug!(
            rank = self.rank(),
            from = envelope.from,
            message = %envelope.message,
            %reason,
            "Ignoring message"
        );
    }

    /// Log the transition out of `before`, perform the sends, then settle a
    /// decided node into Terminated.
    async fn apply(&mut self, before: ElectionState, disposition: Disposition) {
        let after = self.core.state();
        if before != after {
            self.log_transition(after);
            self.publish();
        }

        if let Disposition::Applied(outbound) = disposition {
            self.deliver(outbound).await;
        }

        if matches!(
            self.core.state(),
            ElectionState::Leader { .. } | ElectionState::Follower { .. }
        ) {
            self.core.terminate();
            tracing::debug!(rank = self.rank(), leader = ?self.core.leader(), "Node terminated");
            self.publish();
        }
    }

    async fn deliver(&mut self, outbound: Vec<Outbound>) {
        let rank = self.rank();
        for Outbound { to, message } in outbound {
            if let Some(latency) = self.config.send_latency() {
                tokio::time::sleep(latency).await;
            }

            match self.registry.deliver(rank, to, message) {
                Ok(()) => {
                    self.stats.sent.record(message);
                    tracing::debug!(rank, to, message = %message, "Sent message");
                }
                Err(e) => {
                    self.stats.dropped += 1;
                    tracing::debug!(rank, to, message = %message, error = %e, "Send dropped");
                }
            }
        }
    }

    fn log_transition(&self, after: ElectionState) {
        let rank = self.rank();
        match after {
            ElectionState::ElectionInProgress => {
                let higher: Vec<Rank> = self.registry.higher_than(rank).map(|p| p.rank()).collect();
                tracing::info!(rank, ?higher, "Starting election");
            }
            ElectionState::Leader {
                resolution: Resolution::TimedOut,
            } => {
                tracing::info!(
                    rank,
                    timeout_ms = self.config.election_timeout_ms,
                    "No higher rank answered in time, self-electing"
                );
            }
            ElectionState::Leader { resolution } => {
                tracing::info!(rank, %resolution, "Became leader, broadcasting VICTORY");
            }
            ElectionState::Follower { leader } => {
                tracing::info!(rank, leader, "Adopted leader");
            }
            ElectionState::Idle | ElectionState::Terminated { .. } => {}
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    fn report(&self) -> NodeReport {
        let resolution = match self.core.state() {
            ElectionState::Terminated { resolution, .. } => Some(resolution),
            _ => None,
        };
        NodeReport {
            rank: self.rank(),
            state: self.core.state(),
            leader: self.core.leader(),
            resolution,
            silent: false,
            stats: self.stats,
        }
    }
}
