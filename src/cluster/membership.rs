//! Cluster membership: peer state, heartbeats, gossip, and failure
//! detection.
//!
//! Every node keeps one [`PeerState`] per known peer. Heartbeats go out on
//! a single timer which also runs the failure sweep; a peer silent for
//! `heartbeat_interval × miss_threshold` is declared down with reason
//! `heartbeat_timeout`. Gossiped node ids that are unknown locally trigger
//! dial attempts, so a seed list of one node suffices to join a mesh.

// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// Layer 3: Internal module imports
use super::config::ClusterConfig;
use super::error::ClusterError;
use super::frame::Frame;
use super::node_id::NodeId;
use super::transport;
use crate::dist::global::{GlobalEntry, GlobalRegistry};

/// Capacity of the cluster event broadcast channel.
const EVENT_BUS_CAPACITY: usize = 256;

/// Lifecycle of the local cluster layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Connection state of a peer as seen locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Descriptive record of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub process_count: usize,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub uptime_ms: u64,
}

/// Why a peer was declared down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownReason {
    HeartbeatTimeout,
    ConnectionClosed,
    ConnectionRefused,
    GracefulShutdown,
}

impl Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DownReason::HeartbeatTimeout => "heartbeat_timeout",
            DownReason::ConnectionClosed => "connection_closed",
            DownReason::ConnectionRefused => "connection_refused",
            DownReason::GracefulShutdown => "graceful_shutdown",
        };
        write!(f, "{text}")
    }
}

/// Events observable on the cluster bus. Duplicates are suppressed: a peer
/// emits one `NodeUp` per connected episode and one `NodeDown` per
/// disconnect.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    NodeUp(NodeInfo),
    NodeDown { node: NodeId, reason: DownReason },
    StatusChanged(ClusterStatus),
}

/// A frame received from a peer that is not handled by the membership
/// layer itself (calls, casts, spawns, registry updates).
pub(crate) struct InboundFrame {
    pub(crate) from: NodeId,
    pub(crate) frame: Frame,
}

/// Collaborators injected by the composition root.
pub(crate) struct ClusterDeps {
    pub(crate) global: Arc<GlobalRegistry>,
    pub(crate) inbound: mpsc::UnboundedSender<InboundFrame>,
    pub(crate) process_count: Arc<dyn Fn() -> usize + Send + Sync>,
}

/// Per-peer connection state.
pub(crate) struct PeerState {
    info: RwLock<NodeInfo>,
    last_heartbeat: RwLock<DateTime<Utc>>,
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    /// Bumped on every (re)connection so stale reader/writer tasks of a
    /// replaced socket cannot mark the fresh connection down.
    generation: AtomicU64,
}

impl PeerState {
    fn new(node: &NodeId) -> Self {
        Self {
            info: RwLock::new(NodeInfo {
                id: node.clone(),
                host: node.host().to_string(),
                port: node.port(),
                status: NodeStatus::Connecting,
                process_count: 0,
                last_heartbeat_at: None,
                uptime_ms: 0,
            }),
            last_heartbeat: RwLock::new(Utc::now()),
            tx: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.info.read().status == NodeStatus::Connected
    }

    pub(crate) fn snapshot(&self) -> NodeInfo {
        self.info.read().clone()
    }

    pub(crate) fn send(&self, frame: Frame) -> Result<(), ClusterError> {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) if tx.send(frame).is_ok() => Ok(()),
            _ => Err(ClusterError::NodeNotConnected {
                node: self.info.read().id.clone(),
            }),
        }
    }
}

pub(crate) struct ClusterInner {
    pub(crate) config: ClusterConfig,
    pub(crate) local_id: NodeId,
    pub(crate) secret: Option<Vec<u8>>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) status: RwLock<ClusterStatus>,
    pub(crate) peers: DashMap<NodeId, Arc<PeerState>>,
    pub(crate) dialing: DashMap<NodeId, ()>,
    pub(crate) events: broadcast::Sender<ClusterEvent>,
    pub(crate) global: Arc<GlobalRegistry>,
    pub(crate) inbound: mpsc::UnboundedSender<InboundFrame>,
    pub(crate) process_count: Arc<dyn Fn() -> usize + Send + Sync>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterInner {
    pub(crate) fn set_status(&self, status: ClusterStatus) {
        {
            let mut current = self.status.write();
            if *current == status {
                return;
            }
            *current = status;
        }
        tracing::debug!(?status, node = %self.local_id, "cluster status changed");
        let _ = self.events.send(ClusterEvent::StatusChanged(status));
    }

    pub(crate) fn local_node_info(&self) -> NodeInfo {
        NodeInfo {
            id: self.local_id.clone(),
            host: self.local_id.host().to_string(),
            port: self.local_id.port(),
            status: NodeStatus::Connected,
            process_count: (self.process_count)(),
            last_heartbeat_at: None,
            uptime_ms: (Utc::now() - self.started_at).num_milliseconds().max(0) as u64,
        }
    }

    fn peer(&self, node: &NodeId) -> Option<Arc<PeerState>> {
        self.peers.get(node).map(|p| Arc::clone(p.value()))
    }
}

/// Record a fresh connection to `node` (creating the peer entry if
/// needed), emitting `NodeUp` if the peer was not already connected.
/// Returns the connection generation for the reader/writer tasks.
pub(crate) fn register_peer(
    inner: &Arc<ClusterInner>,
    node: &NodeId,
    tx: mpsc::UnboundedSender<Frame>,
) -> u64 {
    let peer = match inner.peer(node) {
        Some(peer) => peer,
        None => {
            let peer = Arc::new(PeerState::new(node));
            inner.peers.insert(node.clone(), Arc::clone(&peer));
            peer
        }
    };
    let generation = peer.generation.fetch_add(1, Ordering::SeqCst) + 1;
    *peer.tx.lock() = Some(tx);
    *peer.last_heartbeat.write() = Utc::now();
    let was_connected = {
        let mut info = peer.info.write();
        let was = info.status == NodeStatus::Connected;
        info.status = NodeStatus::Connected;
        was
    };
    if !was_connected {
        tracing::info!(node = %node, local = %inner.local_id, "node up");
        let _ = inner.events.send(ClusterEvent::NodeUp(peer.snapshot()));
    }
    generation
}

/// Transition a peer to disconnected with the given reason. Emits one
/// `NodeDown` per episode; repeated calls are no-ops. Global-registry
/// entries owned by the lost node are purged.
pub(crate) fn mark_down(inner: &Arc<ClusterInner>, node: &NodeId, reason: DownReason) {
    mark_down_gen(inner, node, reason, None);
}

pub(crate) fn mark_down_gen(
    inner: &Arc<ClusterInner>,
    node: &NodeId,
    reason: DownReason,
    generation: Option<u64>,
) {
    let Some(peer) = inner.peer(node) else {
        // A dial refusal for a node we never connected to still surfaces
        // as a down event so observers learn the attempt failed.
        if reason == DownReason::ConnectionRefused {
            let _ = inner.events.send(ClusterEvent::NodeDown {
                node: node.clone(),
                reason,
            });
        }
        return;
    };
    if let Some(generation) = generation {
        if peer.generation.load(Ordering::SeqCst) != generation {
            return;
        }
    }
    {
        let mut info = peer.info.write();
        if info.status == NodeStatus::Disconnected {
            return;
        }
        info.status = NodeStatus::Disconnected;
    }
    *peer.tx.lock() = None;
    inner.global.purge_node(node);
    tracing::warn!(node = %node, %reason, local = %inner.local_id, "node down");
    let _ = inner.events.send(ClusterEvent::NodeDown {
        node: node.clone(),
        reason,
    });
}

/// Apply an inbound heartbeat: refresh liveness, learn gossiped nodes,
/// merge global-registry entries.
pub(crate) fn handle_heartbeat(
    inner: &Arc<ClusterInner>,
    from: &NodeId,
    node_info: NodeInfo,
    known_nodes: Vec<NodeId>,
    global_entries: Vec<GlobalEntry>,
) {
    if let Some(peer) = inner.peer(from) {
        *peer.last_heartbeat.write() = Utc::now();
        let mut info = peer.info.write();
        let status = info.status;
        *info = node_info;
        info.status = status;
        info.last_heartbeat_at = Some(Utc::now());
    }
    for node in known_nodes {
        if node != inner.local_id && !inner.peers.contains_key(&node) {
            transport::spawn_dial(Arc::clone(inner), node);
        }
    }
    inner.global.merge_remote(global_entries);
}

async fn heartbeat_loop(inner: Arc<ClusterInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                send_heartbeats(&inner);
                sweep_failures(&inner);
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn send_heartbeats(inner: &Arc<ClusterInner>) {
    let frame = Frame::Heartbeat {
        node_info: inner.local_node_info(),
        known_nodes: inner.peers.iter().map(|p| p.key().clone()).collect(),
        global_entries: inner.global.snapshot(),
    };
    for peer in inner.peers.iter() {
        if peer.value().is_connected() {
            let _ = peer.value().send(frame.clone());
        }
    }
}

fn sweep_failures(inner: &Arc<ClusterInner>) {
    let window = chrono::Duration::from_std(inner.config.failure_window())
        .unwrap_or_else(|_| chrono::Duration::seconds(15));
    let now = Utc::now();
    let stale: Vec<NodeId> = inner
        .peers
        .iter()
        .filter(|p| p.value().is_connected() && now - *p.value().last_heartbeat.read() > window)
        .map(|p| p.key().clone())
        .collect();
    for node in stale {
        mark_down(inner, &node, DownReason::HeartbeatTimeout);
    }
}

/// Handle to the running cluster layer of one node.
#[derive(Clone)]
pub struct Cluster {
    pub(crate) inner: Arc<ClusterInner>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("local_id", &self.inner.local_id)
            .finish()
    }
}

impl Cluster {
    /// Bind the listener, start the heartbeat timer, and dial the seeds.
    pub(crate) async fn start(
        config: ClusterConfig,
        deps: ClusterDeps,
    ) -> Result<Self, ClusterError> {
        let provisional = config.local_node_id()?;
        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ClusterError::Bind {
                addr: bind_addr,
                source,
            })?;
        let actual_port = listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(config.port);
        let local_id = provisional.with_port(actual_port);

        let (shutdown, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let secret = config
            .cluster_secret
            .as_ref()
            .map(|secret| secret.as_bytes().to_vec());
        let inner = Arc::new(ClusterInner {
            config,
            local_id,
            secret,
            started_at: Utc::now(),
            status: RwLock::new(ClusterStatus::Stopped),
            peers: DashMap::new(),
            dialing: DashMap::new(),
            events,
            global: deps.global,
            inbound: deps.inbound,
            process_count: deps.process_count,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });
        inner.set_status(ClusterStatus::Starting);

        let accept = tokio::spawn(transport::accept_loop(Arc::clone(&inner), listener));
        let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&inner)));
        inner.tasks.lock().extend([accept, heartbeat]);

        inner.set_status(ClusterStatus::Running);
        tracing::info!(node = %inner.local_id, "cluster started");

        for seed in inner.config.seeds.clone() {
            if seed != inner.local_id {
                transport::spawn_dial(Arc::clone(&inner), seed);
            }
        }
        Ok(Self { inner })
    }

    /// Send a graceful-shutdown notice to every connected peer, close
    /// connections, and stop the timers.
    pub async fn stop(&self) {
        {
            let status = *self.inner.status.read();
            if !matches!(status, ClusterStatus::Running | ClusterStatus::Starting) {
                return;
            }
        }
        self.inner.set_status(ClusterStatus::Stopping);
        for peer in self.inner.peers.iter() {
            if peer.value().is_connected() {
                let _ = peer.value().send(Frame::GracefulShutdown);
            }
        }
        // Give writers a beat to flush the notices.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _ = self.inner.shutdown.send(true);
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let nodes: Vec<NodeId> = self.inner.peers.iter().map(|p| p.key().clone()).collect();
        for node in nodes {
            mark_down(&self.inner, &node, DownReason::ConnectionClosed);
        }
        self.inner.set_status(ClusterStatus::Stopped);
        tracing::info!(node = %self.inner.local_id, "cluster stopped");
    }

    /// Local lifecycle status.
    pub fn status(&self) -> ClusterStatus {
        *self.inner.status.read()
    }

    /// This node's identity.
    pub fn local_node_id(&self) -> NodeId {
        self.inner.local_id.clone()
    }

    /// This node's own info record.
    pub fn local_node_info(&self) -> NodeInfo {
        self.inner.local_node_info()
    }

    /// All known peers, connected or not.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.inner.peers.iter().map(|p| p.value().snapshot()).collect()
    }

    /// Currently connected peers.
    pub fn connected_nodes(&self) -> Vec<NodeInfo> {
        self.inner
            .peers
            .iter()
            .filter(|p| p.value().is_connected())
            .map(|p| p.value().snapshot())
            .collect()
    }

    /// One peer's info, if known.
    pub fn node(&self, node: &NodeId) -> Option<NodeInfo> {
        self.inner.peer(node).map(|p| p.snapshot())
    }

    /// Whether the peer is currently connected.
    pub fn is_node_connected(&self, node: &NodeId) -> bool {
        self.inner.peer(node).is_some_and(|p| p.is_connected())
    }

    /// Subscribe to node-up/node-down/status events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.inner.events.subscribe()
    }

    /// Initiate a dial to a node that is not among the seeds (the same
    /// path gossip discovery uses). No-op if already connected.
    pub fn connect(&self, node: NodeId) {
        transport::spawn_dial(Arc::clone(&self.inner), node);
    }

    /// Send a frame to a connected peer.
    pub(crate) fn send_to(&self, node: &NodeId, frame: Frame) -> Result<(), ClusterError> {
        match self.inner.peer(node) {
            Some(peer) => peer.send(frame),
            None => Err(ClusterError::NodeNotConnected { node: node.clone() }),
        }
    }

    /// Send a frame to every connected peer.
    pub(crate) fn broadcast_frame(&self, frame: Frame) {
        for peer in self.inner.peers.iter() {
            if peer.value().is_connected() {
                let _ = peer.value().send(frame.clone());
            }
        }
    }
}
