//! Clustering: node identity, authenticated transport, heartbeats, gossip
//! discovery, and failure detection.

pub mod config;
pub mod error;
pub mod frame;
pub mod membership;
pub mod node_id;
pub(crate) mod transport;

pub use config::{
    ClusterConfig, DEFAULT_CLUSTER_PORT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HEARTBEAT_MISS_THRESHOLD,
};
pub use error::ClusterError;
pub use frame::{Registration, RemoteError, RemoteErrorKind, PROTOCOL_VERSION};
pub use membership::{Cluster, ClusterEvent, ClusterStatus, DownReason, NodeInfo, NodeStatus};
pub use node_id::NodeId;
