pub mod cluster;
pub mod config;
pub mod election;
pub mod error;
pub mod shutdown;

pub use cluster::{Cluster, ClusterReport, Registry};
pub use error::{ElectionError, Result};
