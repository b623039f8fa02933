//! Error types for cluster operations.

// Layer 1: Standard library imports
use std::io;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use super::node_id::NodeId;

/// Errors that can occur while configuring or running the cluster layer.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A node identifier failed validation.
    #[error("invalid node id '{input}': {reason}")]
    InvalidNodeId { input: String, reason: String },

    /// The cluster configuration is unusable.
    #[error("invalid cluster configuration: {reason}")]
    InvalidConfig { reason: String },

    /// An operation requires a running cluster.
    #[error("cluster is not started")]
    NotStarted,

    /// The cluster was already started on this node.
    #[error("cluster is already started")]
    AlreadyStarted,

    /// The TCP listener could not be bound.
    #[error("failed to bind cluster listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A frame was addressed to a peer that is not currently connected.
    #[error("node {node} is not connected")]
    NodeNotConnected { node: NodeId },

    /// A frame could not be encoded or decoded.
    #[error("frame codec error: {reason}")]
    Codec { reason: String },

    /// A frame failed HMAC authentication.
    #[error("frame authentication failed: {reason}")]
    Auth { reason: String },

    /// Transport-level I/O failure.
    #[error("cluster transport error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ClusterError {
    /// Returns `true` if this error means the peer should be disconnected.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            ClusterError::Auth { .. } | ClusterError::Codec { .. } | ClusterError::Io { .. }
        )
    }
}
