//! Cluster configuration.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use super::error::ClusterError;
use super::node_id::NodeId;

/// Default cluster port (the conventional EPMD-style port).
pub const DEFAULT_CLUSTER_PORT: u16 = 4369;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of missed heartbeats before a peer is declared down.
pub const DEFAULT_HEARTBEAT_MISS_THRESHOLD: u32 = 3;

/// Configuration for [`Cluster::start`](super::Cluster::start).
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Name component of the local node id (required).
    pub node_name: String,

    /// Host to bind and advertise.
    pub host: String,

    /// Port to bind; `0` binds an OS-assigned port, which is then
    /// advertised in the node id.
    pub port: u16,

    /// Nodes to dial at startup.
    pub seeds: Vec<NodeId>,

    /// Shared secret. When set, every frame carries an HMAC-SHA256 tag
    /// and unauthenticated frames cause disconnection.
    pub cluster_secret: Option<String>,

    /// How often heartbeats are sent (and the failure sweep runs).
    pub heartbeat_interval: Duration,

    /// Missed-heartbeat multiplier before declaring a peer down.
    pub heartbeat_miss_threshold: u32,
}

impl ClusterConfig {
    /// Config with defaults: `0.0.0.0:4369`, no seeds, no secret, 5 s
    /// heartbeats, threshold 3.
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            host: "0.0.0.0".into(),
            port: DEFAULT_CLUSTER_PORT,
            seeds: Vec::new(),
            cluster_secret: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_miss_threshold: DEFAULT_HEARTBEAT_MISS_THRESHOLD,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_seed(mut self, seed: NodeId) -> Self {
        self.seeds.push(seed);
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.cluster_secret = Some(secret.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_miss_threshold(mut self, threshold: u32) -> Self {
        self.heartbeat_miss_threshold = threshold;
        self
    }

    /// Validate and derive the local node id (with the configured port;
    /// the transport substitutes the bound port if `port` is 0).
    pub(crate) fn local_node_id(&self) -> Result<NodeId, ClusterError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ClusterError::InvalidConfig {
                reason: "heartbeat_interval must be positive".into(),
            });
        }
        if self.heartbeat_miss_threshold == 0 {
            return Err(ClusterError::InvalidConfig {
                reason: "heartbeat_miss_threshold must be at least 1".into(),
            });
        }
        // Port 0 is allowed here (OS-assigned); NodeId itself forbids it,
        // so validate with a placeholder. The transport substitutes the
        // bound port once the listener is up.
        let port = if self.port == 0 { 1 } else { self.port };
        NodeId::new(&self.node_name, &self.host, port)
    }

    /// Deadline after which a silent peer is declared down.
    pub(crate) fn failure_window(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_miss_threshold
    }
}
