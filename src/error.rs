use thiserror::Error;

use crate::election::Rank;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElectionError {
    #[error("Unrecognized message type: {0}")]
    UnrecognizedMessageType(String),

    #[error("Unknown peer: node {0} is not registered")]
    UnknownPeer(Rank),

    #[error("Mailbox of node {0} is closed")]
    MailboxClosed(Rank),

    #[error("Cluster must contain at least one node")]
    EmptyCluster,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Election did not converge, nodes still running: {pending:?}")]
    ConvergenceTimeout { pending: Vec<Rank> },

    #[error("Node task failed: {0}")]
    NodeTask(String),
}

pub type Result<T> = std::result::Result<T, ElectionError>;
