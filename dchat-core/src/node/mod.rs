//! Local broker node management

mod config;
mod error;
mod manager;

pub use config::{NodeConfig, DEFAULT_CLIENT_PORT, DEFAULT_CLUSTER_PORT, DEFAULT_START_TIMEOUT};
pub use error::{NodeError, NodeResult};
pub use manager::{build_server_options, ClusterInfo, NodeManager, NodeState};
