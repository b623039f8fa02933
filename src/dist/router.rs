//! The node composition root and location-transparent routing.
//!
//! [`Node`] ties the process kernel, the behavior registry, the global
//! registry, and the cluster together. `call`/`cast`/`stop_process`
//! inspect the target ref's node: local refs go straight through the
//! kernel, remote refs are serialized into frames and correlated back by
//! id. A reply observed locally and a reply observed remotely are
//! identical, network errors aside.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

// Layer 3: Internal module imports
use super::behaviors::BehaviorRegistry;
use super::error::DistError;
use super::global::GlobalRegistry;
use crate::cluster::frame::{Frame, Registration, RemoteError, RemoteErrorKind};
use crate::cluster::membership::{ClusterDeps, InboundFrame};
use crate::cluster::{Cluster, ClusterConfig, ClusterError, NodeId};
use crate::process::{
    ExitReason, ProcessError, ProcessRef, ProcessRuntime, StartOptions, DEFAULT_CALL_TIMEOUT,
    DEFAULT_STOP_TIMEOUT,
};
use crate::util::CorrelationId;

/// Default deadline for a remote spawn round trip.
pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline applied to `init` when spawning by behavior name.
pub const DEFAULT_REMOTE_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Marker key of the in-band system-stop cast used for transparent
/// remote stop (the wire protocol has no dedicated stop frame).
const SYSTEM_KEY: &str = "@system";

/// Options for [`Node::start_remote`].
#[derive(Debug, Clone)]
pub struct RemoteStartOptions {
    /// Node that should host the process (may be the local node).
    pub target_node: NodeId,

    /// Name to register, required for `Local` and `Global` registration.
    pub name: Option<String>,

    /// Where the name is registered. `Local` happens on the target during
    /// the spawn; `Global` is issued by the caller after it succeeds.
    pub registration: Registration,

    /// Deadline for the whole spawn round trip.
    pub spawn_timeout: Duration,

    /// Deadline for `init` (applied directly on the local fast path; a
    /// remote target enforces its own default).
    pub init_timeout: Duration,

    /// Serializable arguments for `init`.
    pub args: Value,
}

impl RemoteStartOptions {
    pub fn new(target_node: NodeId) -> Self {
        Self {
            target_node,
            name: None,
            registration: Registration::None,
            spawn_timeout: DEFAULT_SPAWN_TIMEOUT,
            init_timeout: DEFAULT_REMOTE_INIT_TIMEOUT,
            args: Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = registration;
        self
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }
}

struct NodeInner {
    runtime: ProcessRuntime,
    behaviors: BehaviorRegistry,
    global: Arc<GlobalRegistry>,
    cluster: RwLock<Option<Cluster>>,
    pending_calls: DashMap<CorrelationId, oneshot::Sender<Result<Value, RemoteError>>>,
    pending_spawns: DashMap<CorrelationId, oneshot::Sender<Result<ProcessRef, RemoteError>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// One runtime instance, optionally participating in a cluster.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NodeInner {
                runtime: ProcessRuntime::new(),
                behaviors: BehaviorRegistry::new(),
                global: Arc::new(GlobalRegistry::new()),
                cluster: RwLock::new(None),
                pending_calls: DashMap::new(),
                pending_spawns: DashMap::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The local process kernel.
    pub fn runtime(&self) -> &ProcessRuntime {
        &self.inner.runtime
    }

    /// The node-local behavior registry consulted on remote spawn.
    pub fn behaviors(&self) -> &BehaviorRegistry {
        &self.inner.behaviors
    }

    /// The replicated global name registry.
    pub fn global_registry(&self) -> &GlobalRegistry {
        &self.inner.global
    }

    /// The running cluster layer, if any.
    pub fn cluster(&self) -> Option<Cluster> {
        self.inner.cluster.read().clone()
    }

    /// Start the cluster layer: bind, install the node identity, wire the
    /// global registry's broadcast path, and begin serving remote frames.
    pub async fn start_cluster(&self, config: ClusterConfig) -> Result<Cluster, ClusterError> {
        if self.inner.cluster.read().is_some() {
            return Err(ClusterError::AlreadyStarted);
        }
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let process_count = {
            let runtime = self.inner.runtime.clone();
            Arc::new(move || runtime.process_count()) as Arc<dyn Fn() -> usize + Send + Sync>
        };
        let deps = ClusterDeps {
            global: Arc::clone(&self.inner.global),
            inbound: inbound_tx,
            process_count,
        };
        let cluster = Cluster::start(config, deps).await?;

        let local = cluster.local_node_id();
        self.inner.runtime.set_local_node(local.clone());
        self.inner.global.set_local_node(local);
        {
            let broadcast_via = cluster.clone();
            self.inner
                .global
                .attach_broadcaster(Arc::new(move |frame| broadcast_via.broadcast_frame(frame)));
        }

        *self.inner.cluster.write() = Some(cluster.clone());
        let node = self.clone();
        let task = tokio::spawn(async move {
            let mut inbound_rx = inbound_rx;
            while let Some(InboundFrame { from, frame }) = inbound_rx.recv().await {
                node.handle_frame(from, frame).await;
            }
        });
        self.inner.tasks.lock().push(task);
        Ok(cluster)
    }

    /// Stop the cluster layer, notifying peers gracefully.
    pub async fn stop_cluster(&self) {
        let cluster = self.inner.cluster.write().take();
        if let Some(cluster) = cluster {
            cluster.stop().await;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Location-transparent call with the default timeout.
    pub async fn call(&self, target: &ProcessRef, message: Value) -> Result<Value, DistError> {
        self.call_with_timeout(target, message, DEFAULT_CALL_TIMEOUT)
            .await
    }

    /// Location-transparent call: local refs route through the kernel,
    /// remote refs become `call` frames correlated back by id.
    pub async fn call_with_timeout(
        &self,
        target: &ProcessRef,
        message: Value,
        deadline: Duration,
    ) -> Result<Value, DistError> {
        let local = self.inner.runtime.local_node();
        if target.is_local_to(local.as_ref()) {
            return self
                .inner
                .runtime
                .call_with_timeout(target, message, deadline)
                .await
                .map_err(DistError::from);
        }
        let Some(node) = target.node().cloned() else {
            return Err(DistError::NoLocalNode);
        };
        let cluster = self.cluster().ok_or(ClusterError::NotStarted)?;
        if !cluster.is_node_connected(&node) {
            return Err(DistError::NodeNotReachable { node });
        }

        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        self.inner.pending_calls.insert(correlation_id, tx);
        let frame = Frame::Call {
            target: target.clone(),
            message,
            correlation_id,
            timeout_ms: deadline.as_millis() as u64,
        };
        if cluster.send_to(&node, frame).is_err() {
            self.inner.pending_calls.remove(&correlation_id);
            return Err(DistError::NodeNotReachable { node });
        }
        match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                self.inner.pending_calls.remove(&correlation_id);
                Err(DistError::RemoteCallTimeout { timeout: deadline })
            }
            Ok(Err(_)) => Err(DistError::RemoteCallTimeout { timeout: deadline }),
            Ok(Ok(result)) => result.map_err(DistError::from_remote),
        }
    }

    /// Location-transparent fire-and-forget. Never reports delivery.
    pub fn cast(&self, target: &ProcessRef, message: Value) {
        let local = self.inner.runtime.local_node();
        if target.is_local_to(local.as_ref()) {
            self.inner.runtime.cast(target, message);
            return;
        }
        let Some(node) = target.node().cloned() else {
            return;
        };
        let Some(cluster) = self.cluster() else {
            return;
        };
        let frame = Frame::Cast {
            target: target.clone(),
            message,
        };
        if cluster.send_to(&node, frame).is_err() {
            tracing::debug!(%node, "cast dropped: node not connected");
        }
    }

    /// Location-transparent stop. Remote stops are delivered as in-band
    /// system casts (best effort; the wire protocol has no stop ack).
    pub async fn stop_process(
        &self,
        target: &ProcessRef,
        reason: ExitReason,
        timeout: Duration,
    ) -> Result<(), DistError> {
        let local = self.inner.runtime.local_node();
        if target.is_local_to(local.as_ref()) {
            self.inner.runtime.stop_with(target, reason, timeout).await;
            return Ok(());
        }
        let Some(node) = target.node().cloned() else {
            return Err(DistError::NoLocalNode);
        };
        let cluster = self.cluster().ok_or(ClusterError::NotStarted)?;
        let frame = Frame::Cast {
            target: target.clone(),
            message: json!({ SYSTEM_KEY: "stop", "reason": reason }),
        };
        cluster
            .send_to(&node, frame)
            .map_err(|_| DistError::NodeNotReachable { node })?;
        Ok(())
    }

    /// Spawn a registered behavior on `target_node` (possibly this node).
    pub async fn start_remote(
        &self,
        behavior: &str,
        opts: RemoteStartOptions,
    ) -> Result<ProcessRef, DistError> {
        let RemoteStartOptions {
            target_node,
            name,
            registration,
            spawn_timeout,
            init_timeout,
            args,
        } = opts;
        if registration != Registration::None && name.is_none() {
            return Err(DistError::SpawnFailed {
                message: "registration requires a name".into(),
            });
        }

        let local = self.inner.runtime.local_node();
        let pref = if Some(&target_node) == local.as_ref() {
            let Some(instance) = self.inner.behaviors.instantiate(behavior) else {
                return Err(DistError::BehaviorNotFound {
                    name: behavior.to_string(),
                });
            };
            let start_opts = StartOptions {
                name: if registration == Registration::Local {
                    name.clone()
                } else {
                    None
                },
                args,
                init_timeout: Some(init_timeout),
            };
            self.inner.runtime.start(instance, start_opts).await?
        } else {
            let cluster = self.cluster().ok_or(ClusterError::NotStarted)?;
            if !cluster.is_node_connected(&target_node) {
                return Err(DistError::NodeNotReachable { node: target_node });
            }
            let correlation_id = CorrelationId::new();
            let (tx, rx) = oneshot::channel();
            self.inner.pending_spawns.insert(correlation_id, tx);
            let frame = Frame::Spawn {
                correlation_id,
                behavior: behavior.to_string(),
                args,
                name: name.clone(),
                registration,
            };
            if cluster.send_to(&target_node, frame).is_err() {
                self.inner.pending_spawns.remove(&correlation_id);
                return Err(DistError::NodeNotReachable { node: target_node });
            }
            match tokio::time::timeout(spawn_timeout, rx).await {
                Err(_) => {
                    self.inner.pending_spawns.remove(&correlation_id);
                    return Err(DistError::RemoteCallTimeout {
                        timeout: spawn_timeout,
                    });
                }
                Ok(Err(_)) => {
                    return Err(DistError::RemoteCallTimeout {
                        timeout: spawn_timeout,
                    })
                }
                Ok(Ok(result)) => result.map_err(DistError::from_remote)?,
            }
        };

        if registration == Registration::Global {
            if let Some(name) = name {
                self.inner.global.register(name, pref.clone(), None)?;
            }
        }
        Ok(pref)
    }

    /// Spawn a registered behavior locally (used for inbound spawn frames
    /// and local placement by the distributed supervisor).
    pub(crate) async fn spawn_by_name(
        &self,
        behavior: &str,
        args: Value,
        name: Option<&str>,
        registration: Registration,
    ) -> Result<ProcessRef, DistError> {
        let Some(instance) = self.inner.behaviors.instantiate(behavior) else {
            return Err(DistError::BehaviorNotFound {
                name: behavior.to_string(),
            });
        };
        let opts = StartOptions {
            name: if registration == Registration::Local {
                name.map(str::to_string)
            } else {
                None
            },
            args,
            init_timeout: Some(DEFAULT_REMOTE_INIT_TIMEOUT),
        };
        let pref = self.inner.runtime.start(instance, opts).await?;
        Ok(pref)
    }

    fn reply_to(&self, node: &NodeId, frame: Frame) {
        if let Some(cluster) = self.cluster() {
            if cluster.send_to(node, frame).is_err() {
                tracing::debug!(%node, "reply dropped: node not connected");
            }
        }
    }

    /// Dispatch one inbound frame from a peer.
    async fn handle_frame(&self, from: NodeId, frame: Frame) {
        match frame {
            Frame::Call {
                target,
                message,
                correlation_id,
                timeout_ms,
            } => {
                // Enqueue synchronously so frame order equals mailbox
                // order, then await the reply off this loop.
                let reply = match self.inner.runtime.call_enqueue(&target, message) {
                    Ok(reply) => reply,
                    Err(error) => {
                        self.reply_to(
                            &from,
                            Frame::Reply {
                                correlation_id,
                                result: Err(RemoteError::new(
                                    RemoteErrorKind::ServerNotRunning,
                                    error.to_string(),
                                )),
                            },
                        );
                        return;
                    }
                };
                let node = self.clone();
                tokio::spawn(async move {
                    let deadline = Frame::call_timeout(timeout_ms);
                    let result = match tokio::time::timeout(deadline, reply).await {
                        // The caller's deadline elapsed on its side too;
                        // any late reply would be dropped there.
                        Err(_) => return,
                        Ok(Err(_)) => Err(RemoteError::new(
                            RemoteErrorKind::CalleeTerminated,
                            "killed",
                        )),
                        Ok(Ok(Ok(value))) => Ok(value),
                        Ok(Ok(Err(ProcessError::CallFailed { source }))) => Err(RemoteError::new(
                            RemoteErrorKind::CallFailed,
                            source.to_string(),
                        )),
                        Ok(Ok(Err(error))) => Err(RemoteError::new(
                            RemoteErrorKind::CalleeTerminated,
                            error.to_string(),
                        )),
                    };
                    node.reply_to(
                        &from,
                        Frame::Reply {
                            correlation_id,
                            result,
                        },
                    );
                });
            }
            Frame::Cast { target, message } => self.apply_inbound_cast(&target, message),
            Frame::Reply {
                correlation_id,
                result,
            } => {
                if let Some((_, tx)) = self.inner.pending_calls.remove(&correlation_id) {
                    let _ = tx.send(result);
                }
            }
            Frame::Spawn {
                correlation_id,
                behavior,
                args,
                name,
                registration,
            } => {
                let node = self.clone();
                tokio::spawn(async move {
                    let result = node
                        .spawn_by_name(&behavior, args, name.as_deref(), registration)
                        .await
                        .map_err(|error| match error {
                            DistError::BehaviorNotFound { name } => {
                                RemoteError::new(RemoteErrorKind::BehaviorNotFound, name)
                            }
                            other => {
                                RemoteError::new(RemoteErrorKind::SpawnFailed, other.to_string())
                            }
                        });
                    node.reply_to(
                        &from,
                        Frame::SpawnResult {
                            correlation_id,
                            result,
                        },
                    );
                });
            }
            Frame::SpawnResult {
                correlation_id,
                result,
            } => {
                if let Some((_, tx)) = self.inner.pending_spawns.remove(&correlation_id) {
                    let _ = tx.send(result);
                }
            }
            Frame::GlobalRegister { entry } => {
                self.inner.global.apply_remote(entry);
            }
            Frame::GlobalUnregister { name, owner } => {
                self.inner.global.apply_remote_unregister(&name, &owner);
            }
            // Membership frames are handled by the transport layer.
            Frame::Handshake { .. } | Frame::Heartbeat { .. } | Frame::GracefulShutdown => {}
        }
    }

    fn apply_inbound_cast(&self, target: &ProcessRef, message: Value) {
        if message.get(SYSTEM_KEY).and_then(Value::as_str) == Some("stop") {
            let reason = message
                .get("reason")
                .cloned()
                .and_then(|raw| serde_json::from_value(raw).ok())
                .unwrap_or(ExitReason::Shutdown);
            let runtime = self.inner.runtime.clone();
            let target = target.clone();
            tokio::spawn(async move {
                runtime.stop_with(&target, reason, DEFAULT_STOP_TIMEOUT).await;
            });
            return;
        }
        self.inner.runtime.cast(target, message);
    }
}
