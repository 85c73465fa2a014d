//! Bully election for a single node.
//!
//! - [`message`]: the four control messages and the mailbox entry type
//! - [`mailbox`]: per-node FIFO, the only surface shared between nodes
//! - [`timer`]: the ELECTION timestamp used to presume higher ranks crashed
//! - [`state`]: the pure state machine (`Idle -> ElectionInProgress -> Leader | Follower -> Terminated`)
//! - [`node`]: the actor that drives the state machine from its mailbox

pub mod mailbox;
pub mod message;
pub mod node;
pub mod state;
pub mod timer;

/// Position of a node in the registry. Unique, 1-based, higher wins.
pub type Rank = u64;

pub use message::{Envelope, Message};
pub use node::{Node, NodeReport, NodeStatus};
pub use state::{ElectionCore, ElectionState, Resolution};
