//! Distributed supervisor: cluster-wide children with node selection and
//! automatic failover.
//!
//! Children are specified by behavior *name* (resolved through each node's
//! behavior registry) plus serializable args. Placement goes through a
//! [`NodeSelector`]; when a node is lost, children placed there are marked
//! lost and restart-eligible ones are respawned elsewhere, each counted
//! against the restart intensity. All other supervisor semantics —
//! strategies, intensity, auto-shutdown, ordered startup and shutdown —
//! match the local supervisor, interpreted over possibly-remote refs.

// Layer 1: Standard library imports
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;

// Layer 3: Internal module imports
use super::error::DistError;
use super::router::{Node, RemoteStartOptions};
use crate::cluster::frame::Registration;
use crate::cluster::{ClusterEvent, NodeId, NodeInfo};
use crate::process::{
    Behavior, BehaviorError, DownNotification, ExitReason, ProcessContext, ProcessError,
    ProcessRef, StartOptions,
};
use crate::supervisor::{AutoShutdown, RestartIntensity, RestartPolicy, Strategy};
use crate::util::CorrelationId;

/// Capacity of the distributed-supervisor event channel.
const EVENT_BUS_CAPACITY: usize = 256;

/// Deadline for control calls (spawns run inside them).
const CONTROL_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Strategy for placing a child on a cluster node.
#[derive(Clone)]
pub enum NodeSelector {
    /// Prefer the local node when it is a candidate.
    LocalFirst,

    /// Rotate over candidates in id order.
    RoundRobin,

    /// Pick the candidate with the lowest process count.
    LeastLoaded,

    /// Pick a uniformly random candidate.
    Random,

    /// Always this node.
    Pinned(NodeId),

    /// User-supplied placement function over the current candidates.
    Custom(Arc<dyn Fn(&[NodeInfo], &str) -> Option<NodeId> + Send + Sync>),
}

impl fmt::Debug for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSelector::LocalFirst => write!(f, "LocalFirst"),
            NodeSelector::RoundRobin => write!(f, "RoundRobin"),
            NodeSelector::LeastLoaded => write!(f, "LeastLoaded"),
            NodeSelector::Random => write!(f, "Random"),
            NodeSelector::Pinned(node) => write!(f, "Pinned({node})"),
            NodeSelector::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Specification of one distributed child.
#[derive(Debug, Clone)]
pub struct DistChildSpec {
    /// Unique child id within the supervisor.
    pub id: String,

    /// Behavior name, resolved on the placement node.
    pub behavior: String,

    /// Serializable arguments for `init`.
    pub args: Value,

    pub restart: RestartPolicy,
    pub shutdown_timeout: Duration,
    pub significant: bool,

    /// Per-child placement override.
    pub selector: Option<NodeSelector>,
}

impl DistChildSpec {
    pub fn new(id: impl Into<String>, behavior: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            behavior: behavior.into(),
            args: Value::Null,
            restart: RestartPolicy::Permanent,
            shutdown_timeout: Duration::from_secs(5),
            significant: false,
            selector: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn significant(mut self, significant: bool) -> Self {
        self.significant = significant;
        self
    }

    pub fn with_selector(mut self, selector: NodeSelector) -> Self {
        self.selector = Some(selector);
        self
    }
}

/// Template for `simple_one_for_one` dynamic distributed children.
#[derive(Debug, Clone)]
pub struct DistChildTemplate {
    pub id_prefix: String,
    pub behavior: String,
    pub restart: RestartPolicy,
    pub shutdown_timeout: Duration,
    pub significant: bool,
}

impl DistChildTemplate {
    pub fn new(id_prefix: impl Into<String>, behavior: impl Into<String>) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            behavior: behavior.into(),
            restart: RestartPolicy::Permanent,
            shutdown_timeout: Duration::from_secs(5),
            significant: false,
        }
    }
}

/// Options for starting a distributed supervisor.
#[derive(Debug, Clone)]
pub struct DistSupervisorOptions {
    pub strategy: Strategy,
    pub children: Vec<DistChildSpec>,
    pub child_template: Option<DistChildTemplate>,
    pub selector: NodeSelector,
    pub intensity: RestartIntensity,
    pub auto_shutdown: AutoShutdown,
    pub name: Option<String>,
}

impl DistSupervisorOptions {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            children: Vec::new(),
            child_template: None,
            selector: NodeSelector::LocalFirst,
            intensity: RestartIntensity::default(),
            auto_shutdown: AutoShutdown::Never,
            name: None,
        }
    }

    pub fn child(mut self, spec: DistChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    pub fn template(mut self, template: DistChildTemplate) -> Self {
        self.child_template = Some(template);
        self
    }

    pub fn selector(mut self, selector: NodeSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn intensity(mut self, intensity: RestartIntensity) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn auto_shutdown(mut self, auto_shutdown: AutoShutdown) -> Self {
        self.auto_shutdown = auto_shutdown;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Snapshot of one distributed child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistChildInfo {
    pub id: String,
    pub behavior: String,
    pub node: Option<NodeId>,
    pub process: Option<ProcessRef>,
    pub restart_count: u32,
    pub running: bool,
    pub lost: bool,
}

/// Aggregate counters of a distributed supervisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistSupervisorStats {
    pub children: usize,
    pub running: usize,
    pub lost: usize,
    pub restarts: u64,
    pub migrations: u64,
    pub node_failures: u64,
}

/// Events emitted during failover.
#[derive(Debug, Clone)]
pub enum DistSupervisorEvent {
    /// A node went down; these children were placed there.
    NodeFailureDetected { node: NodeId, affected: Vec<String> },

    /// A child was respawned on a new node after its old node was lost.
    ChildMigrated {
        child: String,
        from: NodeId,
        to: NodeId,
    },
}

enum DistPending {
    Spec(DistChildSpec),
    Args(Value),
}

type PendingTable = Arc<Mutex<HashMap<CorrelationId, DistPending>>>;

struct DistChildRecord {
    spec: DistChildSpec,
    /// `None` means the local node (also the only option clusterless).
    placement: Option<NodeId>,
    current: Option<ProcessRef>,
    restart_count: u32,
    lost: bool,
}

impl DistChildRecord {
    fn info(&self) -> DistChildInfo {
        DistChildInfo {
            id: self.spec.id.clone(),
            behavior: self.spec.behavior.clone(),
            node: self.placement.clone(),
            process: self.current.clone(),
            restart_count: self.restart_count,
            running: self.current.is_some(),
            lost: self.lost,
        }
    }
}

struct DistSupervisorBehavior {
    node: Node,
    strategy: Strategy,
    intensity: RestartIntensity,
    auto_shutdown: AutoShutdown,
    selector: NodeSelector,
    template: Option<DistChildTemplate>,
    initial: Vec<DistChildSpec>,
    children: Vec<DistChildRecord>,
    restart_history: VecDeque<Instant>,
    rr_index: usize,
    stats: DistSupervisorStats,
    events: broadcast::Sender<DistSupervisorEvent>,
    pending: PendingTable,
    dynamic_seq: u64,
    giving_up: bool,
}

impl DistSupervisorBehavior {
    fn charge_intensity(&mut self) -> bool {
        let now = Instant::now();
        while let Some(oldest) = self.restart_history.front() {
            if now.duration_since(*oldest) > self.intensity.within {
                self.restart_history.pop_front();
            } else {
                break;
            }
        }
        if self.restart_history.len() >= self.intensity.max_restarts as usize {
            return false;
        }
        self.restart_history.push_back(now);
        true
    }

    fn give_up(&mut self, ctx: &ProcessContext) {
        self.giving_up = true;
        tracing::error!(
            supervisor = %ctx.process_ref(),
            max_restarts = self.intensity.max_restarts,
            within = ?self.intensity.within,
            "restart intensity exceeded; distributed supervisor terminating"
        );
        ctx.stop_self(ExitReason::error(format!(
            "max restarts exceeded: {} within {:?}",
            self.intensity.max_restarts, self.intensity.within
        )));
    }

    fn maybe_auto_shutdown(&mut self, was_significant: bool, ctx: &ProcessContext) {
        if !was_significant {
            return;
        }
        match self.auto_shutdown {
            AutoShutdown::Never => {}
            AutoShutdown::AnySignificant => ctx.stop_self(ExitReason::Shutdown),
            AutoShutdown::AllSignificant => {
                let any_live = self
                    .children
                    .iter()
                    .any(|c| c.spec.significant && c.current.is_some());
                if !any_live {
                    ctx.stop_self(ExitReason::Shutdown);
                }
            }
        }
    }

    /// Candidate nodes for placement: the local node plus every connected
    /// peer, minus `exclude`.
    fn candidates(&self, exclude: Option<&NodeId>) -> Vec<NodeInfo> {
        let Some(cluster) = self.node.cluster() else {
            return Vec::new();
        };
        let mut all = vec![cluster.local_node_info()];
        all.extend(cluster.connected_nodes());
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all.retain(|info| Some(&info.id) != exclude);
        all
    }

    /// Pick a placement for `child_id`. `None` means "the local node"
    /// (the only option when no cluster is running).
    fn select_node(
        &mut self,
        child_id: &str,
        selector_override: Option<&NodeSelector>,
        exclude: Option<&NodeId>,
    ) -> Result<Option<NodeId>, DistError> {
        let selector = selector_override.unwrap_or(&self.selector).clone();
        let local = self.node.runtime().local_node();
        if self.node.cluster().is_none() {
            // Clusterless: everything collapses to local placement except
            // an explicit pin to some other node.
            return match selector {
                NodeSelector::Pinned(node) => {
                    if Some(&node) == local.as_ref() {
                        Ok(Some(node))
                    } else {
                        Err(DistError::NoAvailableNode {
                            id: child_id.to_string(),
                        })
                    }
                }
                _ => Ok(None),
            };
        }

        let candidates = self.candidates(exclude);
        if candidates.is_empty() {
            return Err(DistError::NoAvailableNode {
                id: child_id.to_string(),
            });
        }
        let chosen = match selector {
            NodeSelector::LocalFirst => match local {
                Some(ref local_id) if candidates.iter().any(|c| &c.id == local_id) => {
                    local_id.clone()
                }
                _ => candidates[0].id.clone(),
            },
            NodeSelector::RoundRobin => {
                let pick = candidates[self.rr_index % candidates.len()].id.clone();
                self.rr_index += 1;
                pick
            }
            NodeSelector::LeastLoaded => candidates
                .iter()
                .min_by_key(|c| c.process_count)
                .map(|c| c.id.clone())
                .unwrap_or_else(|| candidates[0].id.clone()),
            NodeSelector::Random => {
                let pick = rand::thread_rng().gen_range(0..candidates.len());
                candidates[pick].id.clone()
            }
            NodeSelector::Pinned(node) => {
                if candidates.iter().any(|c| c.id == node) {
                    node
                } else {
                    return Err(DistError::NoAvailableNode {
                        id: child_id.to_string(),
                    });
                }
            }
            NodeSelector::Custom(pick) => match pick(&candidates, child_id) {
                Some(node) if candidates.iter().any(|c| c.id == node) => node,
                _ => {
                    return Err(DistError::NoAvailableNode {
                        id: child_id.to_string(),
                    })
                }
            },
        };
        Ok(Some(chosen))
    }

    fn placement_is_local(&self, placement: Option<&NodeId>) -> bool {
        match placement {
            None => true,
            Some(node) => Some(node) == self.node.runtime().local_node().as_ref(),
        }
    }

    async fn spawn_at(
        &self,
        spec: &DistChildSpec,
        placement: Option<&NodeId>,
    ) -> Result<ProcessRef, DistError> {
        match placement {
            None => {
                self.node
                    .spawn_by_name(&spec.behavior, spec.args.clone(), None, Registration::None)
                    .await
            }
            Some(target) => {
                self.node
                    .start_remote(
                        &spec.behavior,
                        RemoteStartOptions::new(target.clone()).with_args(spec.args.clone()),
                    )
                    .await
            }
        }
    }

    /// Place and start the child at `i`, monitoring it when local.
    async fn start_child_at(
        &mut self,
        i: usize,
        exclude: Option<&NodeId>,
        ctx: &ProcessContext,
    ) -> Result<(), DistError> {
        let spec = self.children[i].spec.clone();
        let placement = self.select_node(&spec.id, spec.selector.as_ref(), exclude)?;
        let pref = self.spawn_at(&spec, placement.as_ref()).await?;
        if self.placement_is_local(placement.as_ref()) {
            ctx.runtime().monitor(ctx.process_ref(), &pref);
        }
        let record = &mut self.children[i];
        record.placement = placement;
        record.current = Some(pref);
        record.lost = false;
        Ok(())
    }

    async fn stop_child_ref(&self, record: &DistChildRecord, ctx: &ProcessContext) {
        let Some(pref) = record.current.clone() else {
            return;
        };
        if self.placement_is_local(record.placement.as_ref()) {
            ctx.runtime().demonitor(ctx.process_ref(), &pref);
        }
        let _ = self
            .node
            .stop_process(&pref, ExitReason::Shutdown, record.spec.shutdown_timeout)
            .await;
    }

    async fn restart_at(&mut self, i: usize, exclude: Option<&NodeId>, ctx: &ProcessContext) {
        let id = self.children[i].spec.id.clone();
        match self.start_child_at(i, exclude, ctx).await {
            Ok(()) => {
                let record = &mut self.children[i];
                record.restart_count += 1;
                self.stats.restarts += 1;
            }
            Err(error) => {
                tracing::error!(child = %id, %error, "distributed child restart failed");
            }
        }
    }

    async fn group_restart(&mut self, from: usize, ctx: &ProcessContext) {
        let stops: Vec<usize> = (from..self.children.len())
            .filter(|&i| self.children[i].current.is_some())
            .collect();
        for &i in stops.iter().rev() {
            let record = &self.children[i];
            self.stop_child_ref(record, ctx).await;
            self.children[i].current = None;
        }
        let mut i = from;
        while i < self.children.len() {
            if self.children[i].spec.restart == RestartPolicy::Temporary
                && self.children[i].current.is_none()
            {
                self.children.remove(i);
            } else {
                i += 1;
            }
        }
        for i in from..self.children.len() {
            if self.children[i].current.is_none() {
                self.restart_at(i, None, ctx).await;
            }
        }
    }

    async fn on_child_down(&mut self, note: DownNotification, ctx: &ProcessContext) {
        if self.giving_up {
            return;
        }
        let Some(idx) = self
            .children
            .iter()
            .position(|c| c.current.as_ref() == Some(&note.process))
        else {
            return;
        };
        self.children[idx].current = None;
        let policy = self.children[idx].spec.restart;
        let significant = self.children[idx].spec.significant;
        let reason = note.reason;

        if policy == RestartPolicy::Temporary {
            self.children.remove(idx);
            self.maybe_auto_shutdown(significant, ctx);
            return;
        }
        if !policy.should_restart(&reason) {
            self.maybe_auto_shutdown(significant, ctx);
            return;
        }
        if !self.charge_intensity() {
            self.give_up(ctx);
            return;
        }
        match self.strategy {
            Strategy::OneForOne | Strategy::SimpleOneForOne => {
                self.restart_at(idx, None, ctx).await;
            }
            Strategy::OneForAll => self.group_restart(0, ctx).await,
            Strategy::RestForOne => self.group_restart(idx, ctx).await,
        }
    }

    /// Failover: mark children of the lost node, then respawn the
    /// restart-eligible ones elsewhere, each counted against intensity.
    async fn on_node_down(&mut self, lost: NodeId, ctx: &ProcessContext) {
        if self.giving_up {
            return;
        }
        let affected: Vec<String> = self
            .children
            .iter()
            .filter(|c| c.placement.as_ref() == Some(&lost) && c.current.is_some())
            .map(|c| c.spec.id.clone())
            .collect();
        if affected.is_empty() {
            return;
        }
        self.stats.node_failures += 1;
        tracing::warn!(
            supervisor = %ctx.process_ref(),
            node = %lost,
            affected = affected.len(),
            "node failure detected; migrating children"
        );
        let _ = self.events.send(DistSupervisorEvent::NodeFailureDetected {
            node: lost.clone(),
            affected: affected.clone(),
        });

        for id in affected {
            let Some(idx) = self.children.iter().position(|c| c.spec.id == id) else {
                continue;
            };
            {
                let record = &mut self.children[idx];
                record.current = None;
                record.lost = true;
            }
            self.stats.lost += 1;

            let policy = self.children[idx].spec.restart;
            if !policy.should_restart(&ExitReason::error("node_down")) {
                continue;
            }
            if !self.charge_intensity() {
                self.give_up(ctx);
                return;
            }
            let before = self.children[idx].restart_count;
            self.restart_at(idx, Some(&lost), ctx).await;
            let record = &self.children[idx];
            if record.restart_count > before {
                if let Some(new_node) = record.placement.clone().or_else(|| {
                    self.node.runtime().local_node()
                }) {
                    self.stats.migrations += 1;
                    let _ = self.events.send(DistSupervisorEvent::ChildMigrated {
                        child: id,
                        from: lost.clone(),
                        to: new_node,
                    });
                }
            }
        }
    }

    async fn handle_start_child(
        &mut self,
        token: CorrelationId,
        ctx: &ProcessContext,
    ) -> Result<Value, BehaviorError> {
        let parked = self
            .pending
            .lock()
            .remove(&token)
            .ok_or_else(|| -> BehaviorError { "missing parked child spec".into() })?;

        let spec = match (self.strategy, parked) {
            (Strategy::SimpleOneForOne, DistPending::Args(args)) => {
                let template = self.template.as_ref().ok_or_else(|| -> BehaviorError {
                    Box::new(DistError::InvalidConfiguration {
                        reason: "simple_one_for_one supervisor has no template".into(),
                    })
                })?;
                self.dynamic_seq += 1;
                DistChildSpec {
                    id: format!("{}-{}", template.id_prefix, self.dynamic_seq),
                    behavior: template.behavior.clone(),
                    args,
                    restart: template.restart,
                    shutdown_timeout: template.shutdown_timeout,
                    significant: template.significant,
                    selector: None,
                }
            }
            (Strategy::SimpleOneForOne, DistPending::Spec(_)) => {
                return Err(Box::new(DistError::InvalidConfiguration {
                    reason: "simple_one_for_one takes template arguments, not child specs".into(),
                }));
            }
            (_, DistPending::Args(_)) => {
                return Err(Box::new(DistError::InvalidConfiguration {
                    reason: "template arguments require a simple_one_for_one supervisor".into(),
                }));
            }
            (_, DistPending::Spec(spec)) => {
                if self.children.iter().any(|c| c.spec.id == spec.id) {
                    return Err(Box::new(DistError::DuplicateChild { id: spec.id }));
                }
                spec
            }
        };

        self.children.push(DistChildRecord {
            spec,
            placement: None,
            current: None,
            restart_count: 0,
            lost: false,
        });
        let i = self.children.len() - 1;
        if let Err(error) = self.start_child_at(i, None, ctx).await {
            self.children.remove(i);
            return Err(Box::new(error));
        }
        Ok(serde_json::to_value(self.children[i].info())?)
    }

    async fn handle_init_children(&mut self, ctx: &ProcessContext) -> Result<Value, BehaviorError> {
        let specs = std::mem::take(&mut self.initial);
        for spec in specs {
            self.children.push(DistChildRecord {
                spec,
                placement: None,
                current: None,
                restart_count: 0,
                lost: false,
            });
            let i = self.children.len() - 1;
            if let Err(error) = self.start_child_at(i, None, ctx).await {
                let failed_id = self.children[i].spec.id.clone();
                // Roll back in reverse start order.
                for j in (0..self.children.len()).rev() {
                    let record = &self.children[j];
                    self.stop_child_ref(record, ctx).await;
                }
                self.children.clear();
                tracing::error!(child = %failed_id, %error, "distributed supervisor startup failed");
                return Err(Box::new(error));
            }
        }
        Ok(Value::Null)
    }
}

#[async_trait]
impl Behavior for DistSupervisorBehavior {
    async fn handle_call(
        &mut self,
        request: Value,
        ctx: &ProcessContext,
    ) -> Result<Value, BehaviorError> {
        let op = request.get("op").and_then(Value::as_str).unwrap_or("");
        match op {
            "init_children" => self.handle_init_children(ctx).await,
            "start_child" => {
                let token: CorrelationId =
                    serde_json::from_value(request.get("token").cloned().unwrap_or(Value::Null))?;
                self.handle_start_child(token, ctx).await
            }
            "terminate_child" => {
                let id = request.get("id").and_then(Value::as_str).unwrap_or("");
                let Some(idx) = self.children.iter().position(|c| c.spec.id == id) else {
                    return Err(Box::new(DistError::ChildNotFound { id: id.into() }));
                };
                let record = self.children.remove(idx);
                self.stop_child_ref(&record, ctx).await;
                Ok(Value::Null)
            }
            "restart_child" => {
                let id = request.get("id").and_then(Value::as_str).unwrap_or("");
                let Some(idx) = self.children.iter().position(|c| c.spec.id == id) else {
                    return Err(Box::new(DistError::ChildNotFound { id: id.into() }));
                };
                let record = &self.children[idx];
                self.stop_child_ref(record, ctx).await;
                self.children[idx].current = None;
                self.restart_at(idx, None, ctx).await;
                Ok(serde_json::to_value(self.children[idx].info())?)
            }
            "get_children" => {
                let infos: Vec<DistChildInfo> =
                    self.children.iter().map(DistChildRecord::info).collect();
                Ok(serde_json::to_value(infos)?)
            }
            "get_stats" => {
                let mut stats = self.stats.clone();
                stats.children = self.children.len();
                stats.running = self.children.iter().filter(|c| c.current.is_some()).count();
                Ok(serde_json::to_value(stats)?)
            }
            other => Err(format!("unknown distributed supervisor op '{other}'").into()),
        }
    }

    async fn handle_cast(
        &mut self,
        message: Value,
        ctx: &ProcessContext,
    ) -> Result<(), BehaviorError> {
        if let Some(note) = DownNotification::from_value(&message) {
            self.on_child_down(note, ctx).await;
            return Ok(());
        }
        if message.get("op").and_then(Value::as_str) == Some("node_down") {
            if let Some(node) = message
                .get("node")
                .cloned()
                .and_then(|raw| serde_json::from_value::<NodeId>(raw).ok())
            {
                self.on_node_down(node, ctx).await;
            }
        }
        Ok(())
    }

    async fn terminate(&mut self, _reason: &ExitReason, ctx: &ProcessContext) {
        for i in (0..self.children.len()).rev() {
            let record = &self.children[i];
            self.stop_child_ref(record, ctx).await;
        }
    }

    fn name(&self) -> &str {
        "distributed_supervisor"
    }
}

fn dist_from_call(error: ProcessError) -> DistError {
    match error {
        ProcessError::CallFailed { source } => match source.downcast::<DistError>() {
            Ok(own) => *own,
            Err(source) => DistError::Process(ProcessError::CallFailed { source }),
        },
        other => DistError::Process(other),
    }
}

/// Handle to a running distributed supervisor.
pub struct DistributedSupervisor {
    pref: ProcessRef,
    node: Node,
    pending: PendingTable,
    events: broadcast::Sender<DistSupervisorEvent>,
}

impl DistributedSupervisor {
    /// Start the supervisor process and its static children, placing each
    /// through the node selector.
    pub async fn start(
        node: &Node,
        options: DistSupervisorOptions,
    ) -> Result<Self, DistError> {
        let DistSupervisorOptions {
            strategy,
            children,
            child_template,
            selector,
            intensity,
            auto_shutdown,
            name,
        } = options;

        match strategy {
            Strategy::SimpleOneForOne => {
                if child_template.is_none() {
                    return Err(DistError::InvalidConfiguration {
                        reason: "simple_one_for_one requires a child template".into(),
                    });
                }
                if !children.is_empty() {
                    return Err(DistError::InvalidConfiguration {
                        reason: "static children are not allowed with simple_one_for_one".into(),
                    });
                }
            }
            _ => {
                if child_template.is_some() {
                    return Err(DistError::InvalidConfiguration {
                        reason: "a child template requires the simple_one_for_one strategy".into(),
                    });
                }
            }
        }

        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let behavior = DistSupervisorBehavior {
            node: node.clone(),
            strategy,
            intensity,
            auto_shutdown,
            selector,
            template: child_template,
            initial: children,
            children: Vec::new(),
            restart_history: VecDeque::new(),
            rr_index: 0,
            stats: DistSupervisorStats::default(),
            events: events.clone(),
            pending: Arc::clone(&pending),
            dynamic_seq: 0,
            giving_up: false,
        };
        let pref = node
            .runtime()
            .start(
                Box::new(behavior),
                StartOptions {
                    name,
                    args: Value::Null,
                    init_timeout: None,
                },
            )
            .await
            .map_err(DistError::Process)?;

        // Bridge cluster node-down events into the supervisor's mailbox.
        if let Some(cluster) = node.cluster() {
            let mut cluster_events = cluster.subscribe();
            let runtime = node.runtime().clone();
            let target = pref.clone();
            tokio::spawn(async move {
                loop {
                    match cluster_events.recv().await {
                        Ok(ClusterEvent::NodeDown { node, .. }) => {
                            if !runtime.is_alive(&target) {
                                break;
                            }
                            runtime.cast(&target, json!({ "op": "node_down", "node": node }));
                        }
                        Ok(_) => {
                            if !runtime.is_alive(&target) {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                    }
                }
            });
        }

        let supervisor = Self {
            pref,
            node: node.clone(),
            pending,
            events,
        };
        if let Err(error) = supervisor.control(json!({ "op": "init_children" })).await {
            node.runtime().stop(&supervisor.pref).await;
            return Err(error);
        }
        Ok(supervisor)
    }

    /// The supervisor's process ref.
    pub fn process_ref(&self) -> &ProcessRef {
        &self.pref
    }

    /// Subscribe to failover events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DistSupervisorEvent> {
        self.events.subscribe()
    }

    /// Dynamically append and start a distributed child.
    pub async fn start_child(&self, spec: DistChildSpec) -> Result<DistChildInfo, DistError> {
        let token = CorrelationId::new();
        self.pending.lock().insert(token, DistPending::Spec(spec));
        let reply = self
            .control(json!({ "op": "start_child", "token": token }))
            .await?;
        serde_json::from_value(reply).map_err(|error| DistError::SpawnFailed {
            message: error.to_string(),
        })
    }

    /// Start a dynamic child from the `simple_one_for_one` template.
    pub async fn start_template_child(&self, args: Value) -> Result<DistChildInfo, DistError> {
        let token = CorrelationId::new();
        self.pending.lock().insert(token, DistPending::Args(args));
        let reply = self
            .control(json!({ "op": "start_child", "token": token }))
            .await?;
        serde_json::from_value(reply).map_err(|error| DistError::SpawnFailed {
            message: error.to_string(),
        })
    }

    /// Stop a child (wherever it is placed) and remove it.
    pub async fn terminate_child(&self, id: &str) -> Result<(), DistError> {
        self.control(json!({ "op": "terminate_child", "id": id }))
            .await?;
        Ok(())
    }

    /// Stop and restart a child in place, re-running node selection.
    pub async fn restart_child(&self, id: &str) -> Result<DistChildInfo, DistError> {
        let reply = self
            .control(json!({ "op": "restart_child", "id": id }))
            .await?;
        serde_json::from_value(reply).map_err(|error| DistError::SpawnFailed {
            message: error.to_string(),
        })
    }

    /// Snapshot of all children in start order.
    pub async fn get_children(&self) -> Result<Vec<DistChildInfo>, DistError> {
        let reply = self.control(json!({ "op": "get_children" })).await?;
        serde_json::from_value(reply).map_err(|error| DistError::SpawnFailed {
            message: error.to_string(),
        })
    }

    /// Aggregate counters, including lost children and migrations.
    pub async fn get_stats(&self) -> Result<DistSupervisorStats, DistError> {
        let reply = self.control(json!({ "op": "get_stats" })).await?;
        serde_json::from_value(reply).map_err(|error| DistError::SpawnFailed {
            message: error.to_string(),
        })
    }

    /// Stop the supervisor; children stop first, in reverse start order.
    pub async fn stop(&self) {
        self.node.runtime().stop(&self.pref).await;
    }

    async fn control(&self, request: Value) -> Result<Value, DistError> {
        self.node
            .runtime()
            .call_with_timeout(&self.pref, request, CONTROL_CALL_TIMEOUT)
            .await
            .map_err(dist_from_call)
    }
}
