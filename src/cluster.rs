//! Registry of peers and the simulation driver.
//!
//! The [`Registry`] is an arena of peer handles ordered by ascending rank.
//! Nodes refer to each other only by rank and reach a peer through the
//! registry, so no node owns another.
//!
//! The [`Cluster`] wires a registry to one [`Node`] task per rank, injects the
//! initial stimulus and collects the per-node outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ClusterConfig;
use crate::election::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::election::node::{Node, NodeReport, NodeStatus};
use crate::election::{Message, Rank};
use crate::error::{ElectionError, Result};

/// Handle through which any node reaches a peer's mailbox.
#[derive(Debug, Clone)]
pub struct Peer {
    rank: Rank,
    mailbox: MailboxSender,
}

impl Peer {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Deliver `message` from `from` into this peer's mailbox.
    pub fn receive(&self, from: Rank, message: Message) -> Result<()> {
        self.mailbox.receive(from, message)
    }
}

/// Immutable, rank-ordered view of every node in the simulation.
#[derive(Debug)]
pub struct Registry {
    peers: Vec<Peer>,
}

impl Registry {
    /// Register ranks `1..=size` and create their mailboxes.
    ///
    /// Returns the shared registry and the receiving half of every mailbox,
    /// in rank order.
    pub fn build(size: usize) -> Result<(Arc<Self>, Vec<Mailbox>)> {
        if size == 0 {
            return Err(ElectionError::EmptyCluster);
        }

        let (peers, mailboxes): (Vec<_>, Vec<_>) = (1..=size as Rank)
            .map(|rank| {
                let (tx, rx) = mailbox(rank);
                (Peer { rank, mailbox: tx }, rx)
            })
            .unzip();

        Ok((Arc::new(Self { peers }), mailboxes))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ranks(&self) -> impl Iterator<Item = Rank> + '_ {
        self.peers.iter().map(|p| p.rank)
    }

    pub fn get(&self, rank: Rank) -> Option<&Peer> {
        // Ranks are dense and 1-based
        let index = usize::try_from(rank).ok()?.checked_sub(1)?;
        self.peers.get(index)
    }

    pub fn highest_rank(&self) -> Rank {
        self.peers.last().map(|p| p.rank).unwrap_or(0)
    }

    pub fn is_highest(&self, rank: Rank) -> bool {
        rank == self.highest_rank()
    }

    /// Peers that outrank `rank`, ascending.
    pub fn higher_than(&self, rank: Rank) -> impl Iterator<Item = &Peer> + '_ {
        self.peers.iter().filter(move |p| p.rank > rank)
    }

    /// Every peer except `rank`, ascending.
    pub fn others(&self, rank: Rank) -> impl Iterator<Item = &Peer> + '_ {
        self.peers.iter().filter(move |p| p.rank != rank)
    }

    /// Hand `message` from `from` to the mailbox of `to`.
    pub fn deliver(&self, from: Rank, to: Rank, message: Message) -> Result<()> {
        self.get(to)
            .ok_or(ElectionError::UnknownPeer(to))?
            .receive(from, message)
    }
}

/// Outcome of a whole simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub nodes: Vec<NodeReport>,
    /// The leader every responsive node agrees on, if they all agree.
    pub leader: Option<Rank>,
}

impl ClusterReport {
    fn new(nodes: Vec<NodeReport>) -> Self {
        let mut leaders = nodes.iter().filter(|n| !n.silent).map(|n| n.leader);
        let leader = leaders
            .next()
            .flatten()
            .filter(|&l| leaders.all(|other| other == Some(l)));
        Self { nodes, leader }
    }

    pub fn node(&self, rank: Rank) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.rank == rank)
    }

    /// Ranks that resolved their election through the self-election path.
    pub fn self_elected(&self) -> Vec<Rank> {
        self.nodes
            .iter()
            .filter(|n| n.resolution.is_some_and(|r| r.is_self_elected()))
            .map(|n| n.rank)
            .collect()
    }
}

struct NodeHandle {
    status: watch::Receiver<NodeStatus>,
    task: Option<JoinHandle<NodeReport>>,
}

/// A running simulation: one task per responsive node.
pub struct Cluster {
    config: ClusterConfig,
    registry: Arc<Registry>,
    nodes: BTreeMap<Rank, NodeHandle>,
    // Kept open so sends to silent ranks succeed and are never answered
    silent: BTreeMap<Rank, Mailbox>,
}

impl Cluster {
    /// Build the registry, spawn every responsive node and inject the
    /// configured WAKEUPs. Must be called from within a tokio runtime.
    pub fn start(config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        let (registry, mailboxes) = Registry::build(config.size)?;

        let mut nodes = BTreeMap::new();
        let mut silent = BTreeMap::new();
        for mailbox in mailboxes {
            let rank = mailbox.owner();
            if config.is_silent(rank) {
                tracing::info!(rank, "Node registered as silent");
                silent.insert(rank, mailbox);
                continue;
            }

            let (node, status) =
                Node::new(rank, registry.clone(), mailbox, config.election.clone());
            let task = tokio::spawn(node.run());
            nodes.insert(
                rank,
                NodeHandle {
                    status,
                    task: Some(task),
                },
            );
        }

        tracing::info!(
            size = config.size,
            silent = config.silent.len(),
            timeout_ms = config.election.election_timeout_ms,
            "Cluster started"
        );

        let cluster = Self {
            config,
            registry,
            nodes,
            silent,
        };
        for &rank in &cluster.config.wakeup {
            cluster.wakeup(rank)?;
        }
        Ok(cluster)
    }

    /// Start a cluster, wait for it to converge, and collect the report.
    pub async fn run(config: ClusterConfig, deadline: Duration) -> Result<ClusterReport> {
        let mut cluster = Self::start(config)?;
        cluster.wait_for_convergence(deadline).await?;
        cluster.join().await
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Send the node a WAKEUP, addressed from itself.
    pub fn wakeup(&self, rank: Rank) -> Result<()> {
        tracing::info!(rank, "Waking up node");
        self.registry.deliver(rank, rank, Message::Wakeup)
    }

    /// Deliver an arbitrary message as if `from` had sent it.
    pub fn inject(&self, from: Rank, to: Rank, message: Message) -> Result<()> {
        self.registry.deliver(from, to, message)
    }

    /// Latest published status of a responsive node.
    pub fn status(&self, rank: Rank) -> Option<NodeStatus> {
        self.nodes.get(&rank).map(|h| *h.status.borrow())
    }

    pub fn leader_of(&self, rank: Rank) -> Option<Rank> {
        self.status(rank).and_then(|s| s.leader)
    }

    /// Responsive nodes that have not terminated yet.
    pub fn running(&self) -> Vec<Rank> {
        self.nodes
            .iter()
            .filter(|(_, h)| h.status.borrow().running)
            .map(|(&rank, _)| rank)
            .collect()
    }

    /// Wait until every responsive node has terminated.
    pub async fn wait_for_convergence(&mut self, deadline: Duration) -> Result<()> {
        let waiting = async {
            for (&rank, handle) in self.nodes.iter_mut() {
                handle
                    .status
                    .wait_for(|s| !s.running)
                    .await
                    .map_err(|_| {
                        ElectionError::NodeTask(format!("node {} stopped without a leader", rank))
                    })?;
            }
            Ok(())
        };

        let outcome = tokio::time::timeout(deadline, waiting).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                let pending = self.running();
                tracing::warn!(?pending, "Election did not converge before the deadline");
                Err(ElectionError::ConvergenceTimeout { pending })
            }
        }
    }

    /// Collect every node's final report. Only returns once all responsive
    /// nodes have terminated; call [`Cluster::wait_for_convergence`] first.
    pub async fn join(mut self) -> Result<ClusterReport> {
        let mut reports = Vec::with_capacity(self.registry.len());

        for (&rank, handle) in self.nodes.iter_mut() {
            let Some(task) = handle.task.take() else {
                continue;
            };
            let report = task
                .await
                .map_err(|e| ElectionError::NodeTask(format!("node {}: {}", rank, e)))?;
            reports.push(report);
        }
        reports.extend(self.silent.keys().map(|&rank| NodeReport::silent(rank)));
        reports.sort_by_key(|r| r.rank);

        let report = ClusterReport::new(reports);
        tracing::info!(leader = ?report.leader, "Simulation finished");
        Ok(report)
    }

    /// Stop every node task immediately.
    pub fn abort(&self) {
        for handle in self.nodes.values() {
            if let Some(task) = &handle.task {
                task.abort();
            }
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.abort();
    }
}
