//! Error types for distribution operations.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::cluster::{ClusterError, NodeId, RemoteError, RemoteErrorKind};
use crate::process::ProcessError;

/// Errors that can occur when routing work across the cluster.
#[derive(Debug, Error)]
pub enum DistError {
    /// The target node is not currently connected.
    #[error("node {node} is not reachable")]
    NodeNotReachable { node: NodeId },

    /// No reply frame arrived before the deadline.
    #[error("remote call timed out after {timeout:?}")]
    RemoteCallTimeout { timeout: Duration },

    /// The peer reported that the target process does not exist.
    #[error("remote process is not running: {detail}")]
    RemoteServerNotRunning { detail: String },

    /// The behavior name is not registered on the target node.
    #[error("behavior '{name}' is not registered on the target node")]
    BehaviorNotFound { name: String },

    /// The remote spawn failed on the target node.
    #[error("remote spawn failed: {message}")]
    SpawnFailed { message: String },

    /// The remote handler failed; the remote process keeps running.
    #[error("remote call failed: {message}")]
    RemoteCallFailed { message: String },

    /// The remote callee terminated before replying.
    #[error("remote callee terminated: {message}")]
    RemoteCalleeTerminated { message: String },

    /// A global name is already bound and the existing entry wins.
    #[error("global name '{name}' is already registered")]
    GlobalNameTaken { name: String },

    /// `lookup` on an unbound global name.
    #[error("global name '{name}' is not registered")]
    GlobalNameNotFound { name: String },

    /// A distributed child id collides with an existing one.
    #[error("duplicate distributed child id '{id}'")]
    DuplicateChild { id: String },

    /// No distributed child with the given id.
    #[error("distributed child not found: '{id}'")]
    ChildNotFound { id: String },

    /// The distributed supervisor options are unusable.
    #[error("invalid distributed supervisor configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Node selection found no candidate.
    #[error("no node available for child '{id}'")]
    NoAvailableNode { id: String },

    /// The operation needs a node identity; start the cluster first.
    #[error("no local node identity; start the cluster first")]
    NoLocalNode,

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl DistError {
    /// Decode a peer-reported error into the local taxonomy.
    pub(crate) fn from_remote(error: RemoteError) -> Self {
        match error.kind {
            RemoteErrorKind::ServerNotRunning => DistError::RemoteServerNotRunning {
                detail: error.message,
            },
            RemoteErrorKind::BehaviorNotFound => DistError::BehaviorNotFound {
                name: error.message,
            },
            RemoteErrorKind::SpawnFailed => DistError::SpawnFailed {
                message: error.message,
            },
            RemoteErrorKind::CallFailed => DistError::RemoteCallFailed {
                message: error.message,
            },
            RemoteErrorKind::CalleeTerminated => DistError::RemoteCalleeTerminated {
                message: error.message,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote_mapping() {
        let err = DistError::from_remote(RemoteError::new(
            RemoteErrorKind::BehaviorNotFound,
            "worker",
        ));
        assert!(matches!(err, DistError::BehaviorNotFound { ref name } if name == "worker"));
    }

    #[test]
    fn test_display() {
        let err = DistError::NoLocalNode;
        assert!(err.to_string().contains("start the cluster"));
    }
}
