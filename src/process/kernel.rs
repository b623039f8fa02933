//! The process kernel: process table, lifecycle, dispatch, and monitoring.
//!
//! [`ProcessRuntime`] owns every process record and enforces the actor
//! discipline: one tokio task per process drains its FIFO mailbox and runs
//! at most one handler at a time. All other subsystems interact with a
//! process exclusively through its ref.

// Layer 1: Standard library imports
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

// Layer 3: Internal module imports
use super::behavior::{Behavior, ExitReason};
use super::context::ProcessContext;
use super::error::ProcessError;
use super::lifecycle::{LifecycleBus, LifecycleEvent, LifecycleEventKind, Phase};
use super::mailbox::{mailbox, Envelope, MailboxReceiver, MailboxSender};
use super::monitor::DownNotification;
use super::pref::ProcessRef;
use crate::cluster::NodeId;
use crate::registry::Registry;
use crate::util::ProcessId;

/// Default deadline for synchronous calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period for `terminate` before force-termination.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for starting a process.
#[derive(Debug, Default)]
pub struct StartOptions {
    /// Register the process under this name on success. Duplicate names
    /// fail the start.
    pub name: Option<String>,

    /// Arguments handed to `init`.
    pub args: Value,

    /// Optional deadline for `init`.
    pub init_timeout: Option<Duration>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }
}

/// Point-in-time snapshot of a process record.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub process: ProcessRef,
    pub name: Option<String>,
    pub phase: Phase,
    pub messages_processed: u64,
    pub started_at: DateTime<Utc>,
    pub monitor_count: usize,
}

/// Runtime-internal process record.
pub(crate) struct ProcessEntry {
    pub(crate) pref: ProcessRef,
    pub(crate) name: Option<String>,
    pub(crate) sender: MailboxSender,
    pub(crate) phase: RwLock<Phase>,
    /// Observers watching this process.
    monitors: Mutex<HashSet<ProcessId>>,
    /// Targets this process is watching (for cleanup when it dies first).
    monitoring: Mutex<HashSet<ProcessId>>,
    finalized: AtomicBool,
    messages_processed: AtomicU64,
    started_at: DateTime<Utc>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// The process kernel. Cheap to clone; all clones share one process table.
#[derive(Clone)]
pub struct ProcessRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    entries: DashMap<ProcessId, Arc<ProcessEntry>>,
    registry: Registry,
    bus: LifecycleBus,
    local_node: RwLock<Option<NodeId>>,
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRuntime {
    /// Create a fresh runtime with an empty process table.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                entries: DashMap::new(),
                registry: Registry::new(),
                bus: LifecycleBus::new(),
                local_node: RwLock::new(None),
            }),
        }
    }

    /// Install the node identity used to stamp refs of newly started
    /// processes. Called once when the cluster starts.
    pub(crate) fn set_local_node(&self, node: NodeId) {
        *self.inner.local_node.write() = Some(node);
    }

    /// The node identity of this runtime, if the cluster has started.
    pub fn local_node(&self) -> Option<NodeId> {
        self.inner.local_node.read().clone()
    }

    /// The name registry of this runtime.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Subscribe to the runtime-wide lifecycle event bus.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.bus.subscribe()
    }

    pub(crate) fn emit_lifecycle(&self, process: ProcessRef, kind: LifecycleEventKind) {
        self.inner.bus.emit(process, kind);
    }

    /// Number of live processes on this runtime.
    pub fn process_count(&self) -> usize {
        self.inner.entries.len()
    }

    /// Start a process: run `init`, publish the ref, register the optional
    /// name, and begin dispatching.
    ///
    /// On any failure the ref is never published and no process exists.
    pub async fn start(
        &self,
        mut behavior: Box<dyn Behavior>,
        opts: StartOptions,
    ) -> Result<ProcessRef, ProcessError> {
        let (pref, sender, receiver, ctx) = self.allocate(behavior.name());
        let StartOptions {
            name,
            args,
            init_timeout,
        } = opts;

        let init_result = match init_timeout {
            Some(limit) => match tokio::time::timeout(limit, behavior.init(args, &ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ProcessError::InitTimeout {
                        behavior: pref.behavior().to_string(),
                        timeout: limit,
                    })
                }
            },
            None => behavior.init(args, &ctx).await,
        };
        init_result.map_err(|source| ProcessError::InitFailed {
            behavior: pref.behavior().to_string(),
            source,
        })?;

        let entry = self.commit(&pref, name.as_deref(), &sender)?;
        let runtime = self.clone();
        let loop_entry = Arc::clone(&entry);
        let task = tokio::spawn(run_process(runtime, loop_entry, behavior, ctx, receiver));
        self.attach_task(&entry, task);
        Ok(pref)
    }

    /// Synchronous call with the default timeout.
    pub async fn call(&self, target: &ProcessRef, request: Value) -> Result<Value, ProcessError> {
        self.call_with_timeout(target, request, DEFAULT_CALL_TIMEOUT)
            .await
    }

    /// Synchronous call: enqueue, then suspend until the reply, the
    /// deadline, or the callee's termination — whichever comes first.
    pub async fn call_with_timeout(
        &self,
        target: &ProcessRef,
        request: Value,
        timeout: Duration,
    ) -> Result<Value, ProcessError> {
        let reply = self.call_enqueue(target, request)?;
        match tokio::time::timeout(timeout, reply).await {
            Err(_) => Err(ProcessError::CallTimeout { timeout }),
            // Reply slot dropped without an answer: the callee was
            // force-terminated mid-handler.
            Ok(Err(_)) => Err(ProcessError::CalleeTerminated {
                reason: ExitReason::error("killed"),
            }),
            Ok(Ok(result)) => result,
        }
    }

    /// Enqueue a call without awaiting the reply. The returned receiver
    /// resolves exactly once. Enqueue order equals call order, which is what
    /// makes remote frame handling preserve per-connection ordering.
    pub(crate) fn call_enqueue(
        &self,
        target: &ProcessRef,
        request: Value,
    ) -> Result<oneshot::Receiver<Result<Value, ProcessError>>, ProcessError> {
        let entry = self.entry(target.id()).ok_or_else(|| ProcessError::NotFound {
            pref: target.clone(),
        })?;
        let (reply_tx, reply_rx) = oneshot::channel();
        entry
            .sender
            .send(Envelope::Call {
                request,
                reply: reply_tx,
            })
            .map_err(|_| ProcessError::CalleeTerminated {
                reason: ExitReason::error("killed"),
            })?;
        Ok(reply_rx)
    }

    /// Fire-and-forget message. Never reports delivery.
    pub fn cast(&self, target: &ProcessRef, message: Value) {
        if let Some(entry) = self.entry(target.id()) {
            let _ = entry.sender.send(Envelope::Cast { message });
        }
    }

    /// Stop a process with reason `Shutdown` and the default grace period.
    pub async fn stop(&self, target: &ProcessRef) {
        self.stop_with(target, ExitReason::Shutdown, DEFAULT_STOP_TIMEOUT)
            .await;
    }

    /// Stop a process. The in-flight message (if any) finishes first, then
    /// `terminate(reason)` runs; if the whole sequence exceeds `timeout`
    /// the process is force-terminated with identical cleanup. Stopping an
    /// already-dead process is a no-op.
    pub async fn stop_with(&self, target: &ProcessRef, reason: ExitReason, timeout: Duration) {
        let Some(entry) = self.entry(target.id()) else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if entry
            .sender
            .send(Envelope::Stop {
                reason: reason.clone(),
                done: Some(done_tx),
            })
            .is_err()
        {
            return;
        }
        if tokio::time::timeout(timeout, done_rx).await.is_err() {
            tracing::warn!(process = %entry.pref, ?timeout, "terminate exceeded timeout; force-terminating");
            if let Some(task) = entry.task.lock().take() {
                task.abort();
            }
            self.finalize(&entry, reason);
        }
    }

    /// Have `observer` watch `target`. If the target dies while watched,
    /// the observer receives exactly one `process_down` cast with the final
    /// reason. Watching a dead or unknown ref delivers an immediate
    /// notification with reason `noproc`.
    pub fn monitor(&self, observer: &ProcessRef, target: &ProcessRef) {
        let Some(obs) = self.entry(observer.id()) else {
            return;
        };
        match self.entry(target.id()) {
            Some(tgt) if !tgt.finalized.load(Ordering::SeqCst) => {
                tgt.monitors.lock().insert(observer.id());
                obs.monitoring.lock().insert(target.id());
            }
            _ => {
                let note =
                    DownNotification::new(target.clone(), ExitReason::error("noproc")).to_value();
                let _ = obs.sender.send(Envelope::Cast { message: note });
            }
        }
    }

    /// Remove a monitor. Pure bookkeeping; no notification is delivered.
    pub fn demonitor(&self, observer: &ProcessRef, target: &ProcessRef) {
        if let Some(tgt) = self.entry(target.id()) {
            tgt.monitors.lock().remove(&observer.id());
        }
        if let Some(obs) = self.entry(observer.id()) {
            obs.monitoring.lock().remove(&target.id());
        }
    }

    /// Whether the process currently dispatches messages.
    pub fn is_running(&self, target: &ProcessRef) -> bool {
        self.entry(target.id())
            .map(|entry| entry.phase.read().is_running())
            .unwrap_or(false)
    }

    /// Whether a record exists for this ref at all.
    pub(crate) fn is_alive(&self, target: &ProcessRef) -> bool {
        self.inner.entries.contains_key(&target.id())
    }

    /// Snapshot of the process record, `None` once terminated.
    pub fn process_info(&self, target: &ProcessRef) -> Option<ProcessInfo> {
        let entry = self.entry(target.id())?;
        let phase = *entry.phase.read();
        let monitor_count = entry.monitors.lock().len();
        Some(ProcessInfo {
            process: entry.pref.clone(),
            name: entry.name.clone(),
            phase,
            messages_processed: entry.messages_processed.load(Ordering::Relaxed),
            started_at: entry.started_at,
            monitor_count,
        })
    }

    // ------------------------------------------------------------------
    // Crate-internal plumbing shared with the state-machine runtime.
    // ------------------------------------------------------------------

    /// Allocate an identity, mailbox, and context for a new process.
    pub(crate) fn allocate(
        &self,
        behavior_tag: &str,
    ) -> (ProcessRef, MailboxSender, MailboxReceiver, ProcessContext) {
        let pref = ProcessRef::new(ProcessId::new(), self.local_node(), behavior_tag);
        let (sender, receiver) = mailbox();
        let ctx = ProcessContext::new(pref.clone(), sender.clone(), self.clone());
        (pref, sender, receiver, ctx)
    }

    /// Publish the record: bind the optional name, insert the entry, emit
    /// `Started`. The name binding happens first so a duplicate name fails
    /// the start without leaving a record behind.
    pub(crate) fn commit(
        &self,
        pref: &ProcessRef,
        name: Option<&str>,
        sender: &MailboxSender,
    ) -> Result<Arc<ProcessEntry>, ProcessError> {
        if let Some(name) = name {
            self.inner
                .registry
                .register(name, pref)
                .map_err(|_| ProcessError::NameTaken {
                    name: name.to_string(),
                })?;
        }
        let entry = Arc::new(ProcessEntry {
            pref: pref.clone(),
            name: name.map(str::to_string),
            sender: sender.clone(),
            phase: RwLock::new(Phase::Running),
            monitors: Mutex::new(HashSet::new()),
            monitoring: Mutex::new(HashSet::new()),
            finalized: AtomicBool::new(false),
            messages_processed: AtomicU64::new(0),
            started_at: Utc::now(),
            task: Mutex::new(None),
        });
        self.inner.entries.insert(pref.id(), Arc::clone(&entry));
        self.inner.bus.emit(pref.clone(), LifecycleEventKind::Started);
        tracing::debug!(process = %pref, "process started");
        Ok(entry)
    }

    pub(crate) fn attach_task(&self, entry: &Arc<ProcessEntry>, task: JoinHandle<()>) {
        *entry.task.lock() = Some(task);
    }

    pub(crate) fn record_dispatch(&self, entry: &Arc<ProcessEntry>) {
        entry.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_terminating(&self, entry: &Arc<ProcessEntry>) {
        *entry.phase.write() = Phase::Terminating;
    }

    /// Terminal cleanup, exactly once per process: unregister the name,
    /// drop the record, emit `Crashed` (if abnormal) and `Terminated`, and
    /// fan `process_down` out to monitors.
    pub(crate) fn finalize(&self, entry: &Arc<ProcessEntry>, reason: ExitReason) {
        if entry.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        *entry.phase.write() = Phase::Terminated;
        if let Some(name) = &entry.name {
            self.inner.registry.unregister_if(name, &entry.pref);
        }
        self.inner.entries.remove(&entry.pref.id());

        // Events go out before the monitor fan-out so observers reacting
        // to `process_down` (supervisors restarting, for one) can never
        // get ahead of the crash/termination record on the bus.
        if reason.is_abnormal() {
            tracing::error!(process = %entry.pref, %reason, "process crashed");
            self.inner.bus.emit(
                entry.pref.clone(),
                LifecycleEventKind::Crashed {
                    error: reason.to_string(),
                },
            );
        } else {
            tracing::debug!(process = %entry.pref, %reason, "process terminated");
        }
        self.inner.bus.emit(
            entry.pref.clone(),
            LifecycleEventKind::Terminated {
                reason: reason.clone(),
            },
        );

        let observers: Vec<ProcessId> = {
            let mut guard = entry.monitors.lock();
            guard.drain().collect()
        };
        if !observers.is_empty() {
            let note = DownNotification::new(entry.pref.clone(), reason).to_value();
            for observer in observers {
                if let Some(obs) = self.entry(observer) {
                    obs.monitoring.lock().remove(&entry.pref.id());
                    let _ = obs.sender.send(Envelope::Cast {
                        message: note.clone(),
                    });
                }
            }
        }
        let watched: Vec<ProcessId> = {
            let mut guard = entry.monitoring.lock();
            guard.drain().collect()
        };
        for target in watched {
            if let Some(tgt) = self.entry(target) {
                tgt.monitors.lock().remove(&entry.pref.id());
            }
        }
    }

    fn entry(&self, id: ProcessId) -> Option<Arc<ProcessEntry>> {
        self.inner.entries.get(&id).map(|e| Arc::clone(e.value()))
    }
}

/// The per-process dispatch loop: one worker, strict FIFO, one handler at a
/// time. Handler failures are contained per the call/cast contract; only a
/// system stop breaks the loop.
async fn run_process(
    runtime: ProcessRuntime,
    entry: Arc<ProcessEntry>,
    mut behavior: Box<dyn Behavior>,
    ctx: ProcessContext,
    mut receiver: MailboxReceiver,
) {
    let (reason, ack) = loop {
        let Some(envelope) = receiver.recv().await else {
            break (ExitReason::Normal, None);
        };
        match envelope {
            Envelope::Call { request, reply } => {
                let outcome = behavior.handle_call(request, &ctx).await;
                runtime.record_dispatch(&entry);
                let _ = reply.send(
                    outcome.map_err(|source| ProcessError::CallFailed { source }),
                );
            }
            Envelope::Cast { message } => {
                if let Err(error) = behavior.handle_cast(message, &ctx).await {
                    tracing::warn!(process = %entry.pref, %error, "cast handler failed; process continues");
                }
                runtime.record_dispatch(&entry);
            }
            Envelope::Stop { reason, done } => {
                runtime.mark_terminating(&entry);
                behavior.terminate(&reason, &ctx).await;
                break (reason, done);
            }
        }
    };

    // Reject everything still queued behind the stop.
    receiver.close();
    while let Ok(envelope) = receiver.try_recv() {
        match envelope {
            Envelope::Call { reply, .. } => {
                let _ = reply.send(Err(ProcessError::CalleeTerminated {
                    reason: reason.clone(),
                }));
            }
            Envelope::Stop {
                done: Some(done), ..
            } => {
                let _ = done.send(());
            }
            _ => {}
        }
    }

    runtime.finalize(&entry, reason);
    if let Some(done) = ack {
        let _ = done.send(());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::process::behavior::BehaviorError;
    use async_trait::async_trait;
    use serde_json::json;

    /// S1-style counter: casts increment, calls read.
    struct Counter {
        n: i64,
    }

    #[async_trait]
    impl Behavior for Counter {
        async fn handle_call(
            &mut self,
            request: Value,
            _ctx: &ProcessContext,
        ) -> Result<Value, BehaviorError> {
            match request.as_str() {
                Some("get") => Ok(json!(self.n)),
                Some("boom") => Err("handler exploded".into()),
                _ => Err("unknown request".into()),
            }
        }

        async fn handle_cast(
            &mut self,
            message: Value,
            ctx: &ProcessContext,
        ) -> Result<(), BehaviorError> {
            match message.as_str() {
                Some("inc") => {
                    self.n += 1;
                    Ok(())
                }
                Some("crash") => {
                    ctx.stop_self(ExitReason::error("deliberate"));
                    Ok(())
                }
                Some("cast_error") => Err("cast failed".into()),
                _ => Ok(()),
            }
        }

        fn name(&self) -> &str {
            "counter"
        }
    }

    struct FailingInit;

    #[async_trait]
    impl Behavior for FailingInit {
        async fn init(
            &mut self,
            _args: Value,
            _ctx: &ProcessContext,
        ) -> Result<(), BehaviorError> {
            Err("init refused".into())
        }
    }

    #[tokio::test]
    async fn test_casts_then_call_observe_all_casts() {
        let rt = ProcessRuntime::new();
        let pref = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::new())
            .await
            .unwrap();

        rt.cast(&pref, json!("inc"));
        rt.cast(&pref, json!("inc"));
        rt.cast(&pref, json!("inc"));
        let reply = rt.call(&pref, json!("get")).await.unwrap();
        assert_eq!(reply, json!(3));
    }

    #[tokio::test]
    async fn test_init_failure_publishes_no_ref() {
        let rt = ProcessRuntime::new();
        let err = rt
            .start(Box::new(FailingInit), StartOptions::named("boot"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::InitFailed { .. }));
        assert_eq!(rt.process_count(), 0);
        assert!(rt.registry().whereis("boot").is_none());
    }

    #[tokio::test]
    async fn test_call_handler_error_leaves_process_running() {
        let rt = ProcessRuntime::new();
        let pref = rt
            .start(Box::new(Counter { n: 7 }), StartOptions::new())
            .await
            .unwrap();

        let err = rt.call(&pref, json!("boom")).await.unwrap_err();
        assert!(matches!(err, ProcessError::CallFailed { .. }));
        assert!(rt.is_running(&pref));

        // Subsequent calls still succeed with intact state.
        assert_eq!(rt.call(&pref, json!("get")).await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_cast_handler_error_is_swallowed() {
        let rt = ProcessRuntime::new();
        let pref = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::new())
            .await
            .unwrap();

        rt.cast(&pref, json!("cast_error"));
        assert_eq!(rt.call(&pref, json!("get")).await.unwrap(), json!(0));
        assert!(rt.is_running(&pref));
    }

    #[tokio::test]
    async fn test_stop_runs_terminate_and_unregisters_name() {
        let rt = ProcessRuntime::new();
        let pref = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::named("counter"))
            .await
            .unwrap();
        assert!(rt.registry().is_registered("counter"));

        rt.stop(&pref).await;
        assert!(!rt.is_running(&pref));
        assert!(!rt.registry().is_registered("counter"));
        assert_eq!(rt.process_count(), 0);
    }

    #[tokio::test]
    async fn test_explicit_crash_emits_crashed_and_terminated() {
        let rt = ProcessRuntime::new();
        let mut events = rt.subscribe_lifecycle();
        let pref = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::new())
            .await
            .unwrap();

        rt.cast(&pref, json!("crash"));

        let mut saw_crashed = false;
        let mut saw_terminated = false;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.recv()).await
        {
            if event.process != pref {
                continue;
            }
            match event.kind {
                LifecycleEventKind::Crashed { ref error } => {
                    assert!(error.contains("deliberate"));
                    saw_crashed = true;
                }
                LifecycleEventKind::Terminated { ref reason } => {
                    assert!(reason.is_abnormal());
                    saw_terminated = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_crashed && saw_terminated);
    }

    #[tokio::test]
    async fn test_monitor_delivers_process_down_once() {
        let rt = ProcessRuntime::new();
        let observer = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::new())
            .await
            .unwrap();
        let target = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::new())
            .await
            .unwrap();

        rt.monitor(&observer, &target);
        rt.cast(&target, json!("crash"));

        // The observer counts down-notifications via its message counter:
        // wait until the target is gone, then inspect.
        tokio::time::timeout(Duration::from_secs(1), async {
            while rt.is_alive(&target) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        // Let the observer drain its mailbox.
        let _ = rt.call(&observer, json!("get")).await.unwrap();
        let info = rt.process_info(&observer).unwrap();
        // One down-cast plus the "get" call.
        assert_eq!(info.messages_processed, 2);
    }

    #[tokio::test]
    async fn test_monitor_on_dead_ref_delivers_noproc() {
        let rt = ProcessRuntime::new();
        let observer = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::new())
            .await
            .unwrap();
        let target = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::new())
            .await
            .unwrap();
        rt.stop(&target).await;

        rt.monitor(&observer, &target);
        let _ = rt.call(&observer, json!("get")).await.unwrap();
        let info = rt.process_info(&observer).unwrap();
        assert_eq!(info.messages_processed, 2);
    }

    #[tokio::test]
    async fn test_duplicate_name_fails_start() {
        let rt = ProcessRuntime::new();
        rt.start(Box::new(Counter { n: 0 }), StartOptions::named("one"))
            .await
            .unwrap();
        let err = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::named("one"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NameTaken { .. }));
    }

    #[tokio::test]
    async fn test_call_to_unknown_ref_fails_fast() {
        let rt = ProcessRuntime::new();
        let ghost = ProcessRef::new(ProcessId::new(), None, "ghost");
        let err = rt.call(&ghost, json!("get")).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_pending_calls_rejected_when_callee_stops() {
        let rt = ProcessRuntime::new();
        let pref = rt
            .start(Box::new(Counter { n: 0 }), StartOptions::new())
            .await
            .unwrap();

        // Queue the stop first, then a call behind it.
        let reply = {
            let (done_tx, _done_rx) = oneshot::channel();
            let entry_sender = rt.entry(pref.id()).unwrap().sender.clone();
            entry_sender
                .send(Envelope::Stop {
                    reason: ExitReason::Shutdown,
                    done: Some(done_tx),
                })
                .unwrap();
            rt.call_enqueue(&pref, json!("get")).unwrap()
        };

        let result = reply.await.unwrap();
        match result {
            Err(ProcessError::CalleeTerminated { reason }) => {
                assert_eq!(reason, ExitReason::Shutdown)
            }
            other => panic!("expected CalleeTerminated, got {other:?}"),
        }
    }
}
