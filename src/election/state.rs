use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::cluster::Registry;
use crate::election::message::{Envelope, Message};
use crate::election::timer::ElectionTimer;
use crate::election::Rank;

/// How a node came to know its leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Self-elected because no registered peer outranks it
    HighestRank,
    /// Self-elected because no higher rank answered ELECTION in time
    TimedOut,
    /// Adopted the sender of a VICTORY
    Victory,
}

impl Resolution {
    pub fn is_self_elected(&self) -> bool {
        !matches!(self, Resolution::Victory)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::HighestRank => write!(f, "highest-rank"),
            Resolution::TimedOut => write!(f, "timed-out"),
            Resolution::Victory => write!(f, "victory"),
        }
    }
}

/// Election state of a single node.
///
/// `Leader` and `Follower` are held only while the VICTORY broadcast (or
/// the adoption of one) is being carried out; [`ElectionCore::terminate`]
/// then moves the node to `Terminated`, after which nothing changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ElectionState {
    Idle,
    ElectionInProgress,
    Leader { resolution: Resolution },
    Follower { leader: Rank },
    Terminated { leader: Rank, resolution: Resolution },
}

impl ElectionState {
    pub fn is_running(&self) -> bool {
        !matches!(self, ElectionState::Terminated { .. })
    }

    pub fn has_started(&self) -> bool {
        !matches!(self, ElectionState::Idle)
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Idle => write!(f, "idle"),
            ElectionState::ElectionInProgress => write!(f, "election-in-progress"),
            ElectionState::Leader { .. } => write!(f, "leader"),
            ElectionState::Follower { .. } => write!(f, "follower"),
            ElectionState::Terminated { .. } => write!(f, "terminated"),
        }
    }
}

/// A send the node loop must perform on behalf of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbound {
    pub to: Rank,
    pub message: Message,
}

/// Why a message or tick had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// A leader is already known; the decision is final
    Decided,
    /// ALIVE arrived after this node already resolved its election
    LateAlive,
    /// ALIVE from an equal or lower rank never affects the timer
    AliveFromLowerRank,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::Decided => write!(f, "leader already decided"),
            IgnoreReason::LateAlive => write!(f, "alive after resolution"),
            IgnoreReason::AliveFromLowerRank => write!(f, "alive from lower rank"),
        }
    }
}

/// Result of feeding one input into the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Applied(Vec<Outbound>),
    Ignored(IgnoreReason),
}

impl Disposition {
    fn none() -> Self {
        Disposition::Applied(Vec::new())
    }
}

/// The Bully state machine of a single node, free of any I/O.
///
/// Every input is a mailbox entry or a timeout tick; every output is a list
/// of sends for the caller to perform. The node loop is the only caller, so
/// no locking is needed here.
#[derive(Debug)]
pub struct ElectionCore {
    rank: Rank,
    registry: Arc<Registry>,
    state: ElectionState,
    timer: ElectionTimer,
    timeout: Duration,
}

impl ElectionCore {
    pub fn new(rank: Rank, registry: Arc<Registry>, timeout: Duration) -> Self {
        Self {
            rank,
            registry,
            state: ElectionState::Idle,
            timer: ElectionTimer::new(),
            timeout,
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn timer(&self) -> &ElectionTimer {
        &self.timer
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn leader(&self) -> Option<Rank> {
        match self.state {
            ElectionState::Idle | ElectionState::ElectionInProgress => None,
            ElectionState::Leader { .. } => Some(self.rank),
            ElectionState::Follower { leader } | ElectionState::Terminated { leader, .. } => {
                Some(leader)
            }
        }
    }

    /// Instant at which the timeout check will fire, if the timer is armed.
    pub fn timeout_deadline(&self) -> Option<Instant> {
        if self.leader().is_some() {
            return None;
        }
        self.timer.deadline(self.timeout)
    }

    /// Process one mailbox entry.
    pub fn handle(&mut self, envelope: Envelope, now: Instant) -> Disposition {
        let Envelope { from, message } = envelope;

        if self.leader().is_some() {
            return match message {
                Message::Alive => Disposition::Ignored(IgnoreReason::LateAlive),
                _ => Disposition::Ignored(IgnoreReason::Decided),
            };
        }

        match message {
            Message::Wakeup => self.start(now),
            Message::Election => {
                let mut out = match self.start(now) {
                    Disposition::Applied(out) => out,
                    Disposition::Ignored(_) => Vec::new(),
                };
                // A node that self-elected while starting is done and stays quiet
                if self.leader().is_none() && from != self.rank {
                    out.push(Outbound {
                        to: from,
                        message: Message::Alive,
                    });
                }
                Disposition::Applied(out)
            }
            Message::Alive => {
                if from > self.rank {
                    self.timer.disarm();
                    Disposition::none()
                } else {
                    Disposition::Ignored(IgnoreReason::AliveFromLowerRank)
                }
            }
            Message::Victory => {
                self.timer.disarm();
                self.state = ElectionState::Follower { leader: from };
                Disposition::none()
            }
        }
    }

    /// Timeout check, evaluated once per loop iteration.
    pub fn check_timeout(&mut self, now: Instant) -> Disposition {
        let leader_known = self.leader().is_some();
        if !self.timer.expired(self.timeout, now, leader_known) {
            return Disposition::none();
        }
        self.timer.disarm();
        self.self_elect(Resolution::TimedOut)
    }

    /// Leave Leader/Follower for Terminated once the node loop has carried
    /// out the decision. No-op in every other state.
    pub fn terminate(&mut self) {
        self.state = match self.state {
            ElectionState::Leader { resolution } => ElectionState::Terminated {
                leader: self.rank,
                resolution,
            },
            ElectionState::Follower { leader } => ElectionState::Terminated {
                leader,
                resolution: Resolution::Victory,
            },
            other => other,
        };
    }

    /// Idle -> ElectionInProgress, then trigger the election. Already started
    /// nodes are left untouched.
    fn start(&mut self, now: Instant) -> Disposition {
        if self.state.has_started() {
            return Disposition::none();
        }
        self.state = ElectionState::ElectionInProgress;
        self.trigger_election(now)
    }

    fn trigger_election(&mut self, now: Instant) -> Disposition {
        if self.registry.is_highest(self.rank) {
            return self.self_elect(Resolution::HighestRank);
        }

        let out = self
            .registry
            .higher_than(self.rank)
            .map(|peer| Outbound {
                to: peer.rank(),
                message: Message::Election,
            })
            .collect();
        self.timer.arm(now);
        Disposition::Applied(out)
    }

    fn self_elect(&mut self, resolution: Resolution) -> Disposition {
        self.state = ElectionState::Leader { resolution };
        let out = self
            .registry
            .others(self.rank)
            .map(|peer| Outbound {
                to: peer.rank(),
                message: Message::Victory,
            })
            .collect();
        Disposition::Applied(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn core(rank: Rank, size: usize) -> ElectionCore {
        let (registry, _mailboxes) = Registry::build(size).unwrap();
        ElectionCore::new(rank, registry, TIMEOUT)
    }

    fn env(from: Rank, message: Message) -> Envelope {
        Envelope::new(from, message)
    }

    fn sends(to: &[Rank], message: Message) -> Vec<Outbound> {
        to.iter().map(|&to| Outbound { to, message }).collect()
    }

    #[test]
    fn test_new_core_is_idle() {
        let core = core(1, 3);
        assert_eq!(core.state(), ElectionState::Idle);
        assert!(core.is_running());
        assert!(core.leader().is_none());
        assert!(!core.timer().is_armed());
    }

    #[test]
    fn test_wakeup_sends_election_to_higher_ranks() {
        let mut core = core(2, 5);
        let now = Instant::now();

        let d = core.handle(env(2, Message::Wakeup), now);
        assert_eq!(d, Disposition::Applied(sends(&[3, 4, 5], Message::Election)));
        assert_eq!(core.state(), ElectionState::ElectionInProgress);
        assert_eq!(core.timer().sent_at(), Some(now));
    }

    #[test]
    fn test_second_wakeup_does_not_retrigger() {
        let mut core = core(1, 3);
        let now = Instant::now();
        core.handle(env(1, Message::Wakeup), now);

        let later = now + Duration::from_millis(10);
        let d = core.handle(env(1, Message::Wakeup), later);
        assert_eq!(d, Disposition::Applied(vec![]));
        assert_eq!(core.timer().sent_at(), Some(now));
    }

    #[test]
    fn test_highest_rank_self_elects_on_wakeup() {
        let mut core = core(3, 3);
        let d = core.handle(env(3, Message::Wakeup), Instant::now());

        assert_eq!(d, Disposition::Applied(sends(&[1, 2], Message::Victory)));
        assert_eq!(
            core.state(),
            ElectionState::Leader {
                resolution: Resolution::HighestRank
            }
        );
        assert_eq!(core.leader(), Some(3));
        assert!(!core.timer().is_armed());
    }

    #[test]
    fn test_election_from_lower_rank_starts_and_replies_alive() {
        let mut core = core(2, 3);
        let d = core.handle(env(1, Message::Election), Instant::now());

        let mut expected = sends(&[3], Message::Election);
        expected.push(Outbound {
            to: 1,
            message: Message::Alive,
        });
        assert_eq!(d, Disposition::Applied(expected));
        assert_eq!(core.state(), ElectionState::ElectionInProgress);
    }

    #[test]
    fn test_election_while_in_progress_only_replies_alive() {
        let mut core = core(2, 3);
        let now = Instant::now();
        core.handle(env(2, Message::Wakeup), now);

        let d = core.handle(env(1, Message::Election), now);
        assert_eq!(d, Disposition::Applied(sends(&[1], Message::Alive)));
    }

    #[test]
    fn test_highest_rank_does_not_reply_alive_after_self_electing() {
        let mut core = core(3, 3);
        let d = core.handle(env(1, Message::Election), Instant::now());

        assert_eq!(d, Disposition::Applied(sends(&[1, 2], Message::Victory)));
        assert_eq!(core.leader(), Some(3));
    }

    #[test]
    fn test_alive_from_higher_rank_disarms_timer() {
        let mut core = core(1, 3);
        let now = Instant::now();
        core.handle(env(1, Message::Wakeup), now);
        assert!(core.timer().is_armed());

        let d = core.handle(env(3, Message::Alive), now);
        assert_eq!(d, Disposition::Applied(vec![]));
        assert!(core.timer().sent_at().is_none());
        assert_eq!(core.state(), ElectionState::ElectionInProgress);
    }

    #[test]
    fn test_alive_from_lower_or_equal_rank_is_ignored() {
        let mut core = core(2, 3);
        let now = Instant::now();
        core.handle(env(2, Message::Wakeup), now);

        for from in [1, 2] {
            let d = core.handle(env(from, Message::Alive), now);
            assert_eq!(d, Disposition::Ignored(IgnoreReason::AliveFromLowerRank));
            assert_eq!(core.timer().sent_at(), Some(now));
        }
    }

    #[test]
    fn test_victory_overrides_election_in_progress() {
        let mut core = core(1, 3);
        let now = Instant::now();
        core.handle(env(1, Message::Wakeup), now);

        let d = core.handle(env(3, Message::Victory), now);
        assert_eq!(d, Disposition::Applied(vec![]));
        assert_eq!(core.state(), ElectionState::Follower { leader: 3 });
        assert_eq!(core.leader(), Some(3));
        assert!(!core.timer().is_armed());
    }

    #[test]
    fn test_victory_while_idle_adopts_leader() {
        let mut core = core(1, 5);
        core.handle(env(5, Message::Victory), Instant::now());
        core.terminate();

        assert_eq!(
            core.state(),
            ElectionState::Terminated {
                leader: 5,
                resolution: Resolution::Victory
            }
        );
        assert!(!core.is_running());
    }

    #[test]
    fn test_decided_node_ignores_everything() {
        let mut core = core(1, 3);
        let now = Instant::now();
        core.handle(env(3, Message::Victory), now);
        core.terminate();
        let before = core.state();

        assert_eq!(
            core.handle(env(2, Message::Victory), now),
            Disposition::Ignored(IgnoreReason::Decided)
        );
        assert_eq!(
            core.handle(env(2, Message::Election), now),
            Disposition::Ignored(IgnoreReason::Decided)
        );
        assert_eq!(
            core.handle(env(1, Message::Wakeup), now),
            Disposition::Ignored(IgnoreReason::Decided)
        );
        assert_eq!(
            core.handle(env(3, Message::Alive), now),
            Disposition::Ignored(IgnoreReason::LateAlive)
        );
        assert_eq!(core.state(), before);
        assert_eq!(core.leader(), Some(3));
        assert!(!core.is_running());
    }

    #[test]
    fn test_timeout_self_elects() {
        let mut core = core(2, 3);
        let now = Instant::now();
        core.handle(env(2, Message::Wakeup), now);

        let d = core.check_timeout(now + TIMEOUT);
        assert_eq!(d, Disposition::Applied(vec![]));
        assert_eq!(core.state(), ElectionState::ElectionInProgress);

        let d = core.check_timeout(now + TIMEOUT + Duration::from_millis(1));
        assert_eq!(d, Disposition::Applied(sends(&[1, 3], Message::Victory)));
        assert_eq!(
            core.state(),
            ElectionState::Leader {
                resolution: Resolution::TimedOut
            }
        );

        core.terminate();
        assert_eq!(
            core.state(),
            ElectionState::Terminated {
                leader: 2,
                resolution: Resolution::TimedOut
            }
        );
    }

    #[test]
    fn test_timeout_does_not_fire_after_alive() {
        let mut core = core(1, 3);
        let now = Instant::now();
        core.handle(env(1, Message::Wakeup), now);
        core.handle(env(2, Message::Alive), now);

        let d = core.check_timeout(now + Duration::from_secs(60));
        assert_eq!(d, Disposition::Applied(vec![]));
        assert_eq!(core.state(), ElectionState::ElectionInProgress);
        assert!(core.timeout_deadline().is_none());
    }

    #[test]
    fn test_late_alive_after_timeout_is_ignored() {
        let mut core = core(1, 3);
        let now = Instant::now();
        core.handle(env(1, Message::Wakeup), now);
        core.check_timeout(now + Duration::from_secs(1));
        core.terminate();

        let d = core.handle(env(3, Message::Alive), now + Duration::from_secs(2));
        assert_eq!(d, Disposition::Ignored(IgnoreReason::LateAlive));
        assert_eq!(core.leader(), Some(1));
    }

    #[test]
    fn test_single_node_cluster_self_elects() {
        let mut core = core(1, 1);
        let d = core.handle(env(1, Message::Wakeup), Instant::now());
        assert_eq!(d, Disposition::Applied(vec![]));
        assert_eq!(core.leader(), Some(1));
    }

    #[test]
    fn test_terminate_is_noop_before_decision() {
        let mut core = core(1, 3);
        core.terminate();
        assert_eq!(core.state(), ElectionState::Idle);

        core.handle(env(1, Message::Wakeup), Instant::now());
        core.terminate();
        assert_eq!(core.state(), ElectionState::ElectionInProgress);
    }

    /// Every (state, message) pair leaves the node in an allowed successor.
    #[test]
    fn test_transition_table() {
        let now = Instant::now();
        let setup = |core: &mut ElectionCore, name: &str| match name {
            "in_progress" => {
                core.handle(env(2, Message::Wakeup), now);
            }
            "follower" => {
                core.handle(env(4, Message::Victory), now);
            }
            "terminated" => {
                core.handle(env(4, Message::Victory), now);
                core.terminate();
            }
            _ => {}
        };

        for name in ["idle", "in_progress", "follower", "terminated"] {
            for message in Message::ALL {
                for from in 1..=4 {
                    let mut core = core(2, 4);
                    setup(&mut core, name);
                    let before = core.state();
                    core.handle(env(from, message), now);
                    let after = core.state();

                    let allowed = match (before, message) {
                        (ElectionState::Idle, Message::Wakeup | Message::Election) => {
                            after == ElectionState::ElectionInProgress
                        }
                        (ElectionState::Idle | ElectionState::ElectionInProgress, Message::Victory) => {
                            after == ElectionState::Follower { leader: from }
                        }
                        (ElectionState::Idle, Message::Alive) => after == ElectionState::Idle,
                        (ElectionState::ElectionInProgress, _) => {
                            after == ElectionState::ElectionInProgress
                        }
                        // Decided states never move on a message
                        _ => after == before,
                    };
                    assert!(
                        allowed,
                        "{}: {} from {} moved {:?} -> {:?}",
                        name, message, from, before, after
                    );
                }
            }
        }
    }
}
