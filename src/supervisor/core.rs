//! The supervisor implementation.
//!
//! A supervisor is itself a kernel process: children are watched through
//! ordinary monitors, `process_down` notifications arrive as casts in the
//! supervisor's own mailbox, and nesting falls out naturally — a child
//! factory may start another supervisor and return its ref. The parent of
//! a crashed supervisor observes a plain abnormal child exit.
//!
//! Child specs carry non-serializable start factories, so dynamic
//! `start_child` requests park the spec in a token-keyed side table and
//! send only the token through the mailbox; commands and replies stay
//! JSON.

// Layer 1: Standard library imports
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;

// Layer 3: Internal module imports
use super::error::SupervisorError;
use super::types::{
    AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartIntensity, RestartPolicy, Strategy,
    SupervisorOptions,
};
use crate::process::{
    Behavior, BehaviorError, DownNotification, ExitReason, LifecycleEventKind, ProcessContext,
    ProcessError, ProcessRef, ProcessRuntime, StartOptions,
};
use crate::util::CorrelationId;

/// Deadline for supervisor control calls; generous because child `init`s
/// run inside them.
const CONTROL_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A child spec parked by the handle until the supervisor process picks it
/// up.
enum PendingStart {
    Spec(ChildSpec),
    Args(Value),
}

type PendingTable = Arc<Mutex<HashMap<CorrelationId, PendingStart>>>;

struct ChildRecord {
    spec: ChildSpec,
    current: Option<ProcessRef>,
    /// Most recent ref, kept for `Restarted` event attribution.
    last_ref: Option<ProcessRef>,
    restart_count: u32,
}

impl ChildRecord {
    fn info(&self) -> ChildInfo {
        ChildInfo {
            id: self.spec.id.clone(),
            process: self.current.clone(),
            restart: self.spec.restart,
            significant: self.spec.significant,
            restart_count: self.restart_count,
            running: self.current.is_some(),
        }
    }
}

struct SupervisorBehavior {
    strategy: Strategy,
    intensity: RestartIntensity,
    auto_shutdown: AutoShutdown,
    template: Option<ChildTemplate>,
    /// Static specs consumed by the `init_children` command.
    initial: Vec<ChildSpec>,
    children: Vec<ChildRecord>,
    restart_history: VecDeque<Instant>,
    pending: PendingTable,
    dynamic_seq: u64,
    giving_up: bool,
}

impl SupervisorBehavior {
    /// Sliding-window intensity accounting: prune entries older than the
    /// window, refuse if the cap is already reached, record otherwise.
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
        let error = SupervisorError::MaxRestartsExceeded {
            max_restarts: self.intensity.max_restarts,
            within: self.intensity.within,
        };
        tracing::error!(supervisor = %ctx.process_ref(), %error, "restart intensity exceeded; supervisor terminating");
        ctx.stop_self(ExitReason::error(&error));
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

    /// Start (or restart) the child at `i`. On failure a retry is queued
    /// behind everything already in the mailbox; each retry is charged
    /// against the restart intensity by its handler.
    async fn start_child_at(&mut self, i: usize, ctx: &ProcessContext) {
        let (spec, old_ref, attempt) = {
            let record = &self.children[i];
            (
                record.spec.clone(),
                record.last_ref.clone(),
                record.restart_count + 1,
            )
        };
        if let Some(old) = old_ref {
            ctx.runtime()
                .emit_lifecycle(old, LifecycleEventKind::Restarted { attempt });
        }
        match spec.start_child().await {
            Ok(pref) => {
                ctx.runtime().monitor(ctx.process_ref(), &pref);
                let record = &mut self.children[i];
                record.current = Some(pref);
                record.restart_count = attempt;
            }
            Err(error) => {
                tracing::error!(child = %spec.id, %error, "child start failed; scheduling retry");
                ctx.cast_self(json!({ "op": "restart_retry", "id": spec.id }));
            }
        }
    }

    /// Stop the still-live children from `from` onward in reverse start
    /// order, drop terminated temporary children, and restart the rest in
    /// declared order. `from = 0` is one_for_all; `from = crashed index`
    /// is rest_for_one.
    async fn group_restart(&mut self, from: usize, ctx: &ProcessContext) {
        let self_ref = ctx.process_ref().clone();
        let stops: Vec<(usize, ProcessRef, Duration)> = self
            .children
            .iter()
            .enumerate()
            .skip(from)
            .filter_map(|(i, c)| {
                c.current
                    .as_ref()
                    .map(|p| (i, p.clone(), c.spec.shutdown_timeout))
            })
            .collect();
        for (i, pref, timeout) in stops.into_iter().rev() {
            ctx.runtime().demonitor(&self_ref, &pref);
            ctx.runtime()
                .stop_with(&pref, ExitReason::Shutdown, timeout)
                .await;
            let record = &mut self.children[i];
            record.last_ref = record.current.take();
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
                self.start_child_at(i, ctx).await;
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
        {
            let record = &mut self.children[idx];
            record.last_ref = record.current.take();
        }
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
        tracing::warn!(
            supervisor = %ctx.process_ref(),
            child = %self.children[idx].spec.id,
            %reason,
            strategy = ?self.strategy,
            "child exited; applying restart strategy"
        );
        match self.strategy {
            Strategy::OneForOne | Strategy::SimpleOneForOne => {
                self.start_child_at(idx, ctx).await;
            }
            Strategy::OneForAll => self.group_restart(0, ctx).await,
            Strategy::RestForOne => self.group_restart(idx, ctx).await,
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
            (Strategy::SimpleOneForOne, PendingStart::Args(args)) => {
                let template = self.template.as_ref().ok_or_else(|| -> BehaviorError {
                    Box::new(SupervisorError::InvalidConfiguration {
                        reason: "simple_one_for_one supervisor has no template".into(),
                    })
                })?;
                self.dynamic_seq += 1;
                let id = format!("{}-{}", template.id_prefix, self.dynamic_seq);
                let bound = template.clone();
                ChildSpec {
                    id,
                    start: Arc::new(move || bound.start_child(args.clone())),
                    restart: template.restart,
                    shutdown_timeout: template.shutdown_timeout,
                    significant: template.significant,
                }
            }
            (Strategy::SimpleOneForOne, PendingStart::Spec(_)) => {
                return Err(Box::new(SupervisorError::InvalidConfiguration {
                    reason: "simple_one_for_one takes template arguments, not child specs".into(),
                }));
            }
            (_, PendingStart::Args(_)) => {
                return Err(Box::new(SupervisorError::InvalidConfiguration {
                    reason: "template arguments require a simple_one_for_one supervisor".into(),
                }));
            }
            (_, PendingStart::Spec(spec)) => {
                if self.children.iter().any(|c| c.spec.id == spec.id) {
                    return Err(Box::new(SupervisorError::DuplicateChild { id: spec.id }));
                }
                spec
            }
        };

        let pref = spec.start_child().await.map_err(|source| {
            Box::new(SupervisorError::ChildStartFailed {
                id: spec.id.clone(),
                source: Box::new(source),
            }) as BehaviorError
        })?;
        ctx.runtime().monitor(ctx.process_ref(), &pref);
        self.children.push(ChildRecord {
            spec,
            current: Some(pref),
            last_ref: None,
            restart_count: 0,
        });
        let info = self
            .children
            .last()
            .map(ChildRecord::info)
            .unwrap_or_else(|| ChildInfo {
                id: String::new(),
                process: None,
                restart: RestartPolicy::Temporary,
                significant: false,
                restart_count: 0,
                running: false,
            });
        Ok(serde_json::to_value(info)?)
    }

    /// Start the static children in declared order; on failure stop the
    /// already-started ones in reverse and fail the whole startup.
    async fn handle_init_children(&mut self, ctx: &ProcessContext) -> Result<Value, BehaviorError> {
        let specs = std::mem::take(&mut self.initial);
        for spec in specs {
            match spec.start_child().await {
                Ok(pref) => {
                    ctx.runtime().monitor(ctx.process_ref(), &pref);
                    self.children.push(ChildRecord {
                        spec,
                        current: Some(pref),
                        last_ref: None,
                        restart_count: 0,
                    });
                }
                Err(source) => {
                    let failed_id = spec.id.clone();
                    let self_ref = ctx.process_ref().clone();
                    let stops: Vec<(ProcessRef, Duration)> = self
                        .children
                        .iter()
                        .filter_map(|c| {
                            c.current
                                .as_ref()
                                .map(|p| (p.clone(), c.spec.shutdown_timeout))
                        })
                        .collect();
                    for (pref, timeout) in stops.into_iter().rev() {
                        ctx.runtime().demonitor(&self_ref, &pref);
                        ctx.runtime()
                            .stop_with(&pref, ExitReason::Shutdown, timeout)
                            .await;
                    }
                    self.children.clear();
                    return Err(Box::new(SupervisorError::ChildStartFailed {
                        id: failed_id,
                        source: Box::new(source),
                    }));
                }
            }
        }
        Ok(Value::Null)
    }

    async fn handle_terminate_child(
        &mut self,
        id: &str,
        ctx: &ProcessContext,
    ) -> Result<Value, BehaviorError> {
        let Some(idx) = self.children.iter().position(|c| c.spec.id == id) else {
            return Err(Box::new(SupervisorError::ChildNotFound { id: id.into() }));
        };
        let record = self.children.remove(idx);
        if let Some(pref) = record.current {
            ctx.runtime().demonitor(ctx.process_ref(), &pref);
            ctx.runtime()
                .stop_with(&pref, ExitReason::Shutdown, record.spec.shutdown_timeout)
                .await;
        }
        Ok(Value::Null)
    }

    async fn handle_restart_child(
        &mut self,
        id: &str,
        ctx: &ProcessContext,
    ) -> Result<Value, BehaviorError> {
        let Some(idx) = self.children.iter().position(|c| c.spec.id == id) else {
            return Err(Box::new(SupervisorError::ChildNotFound { id: id.into() }));
        };
        let (current, timeout) = {
            let record = &self.children[idx];
            (record.current.clone(), record.spec.shutdown_timeout)
        };
        if let Some(pref) = current {
            ctx.runtime().demonitor(ctx.process_ref(), &pref);
            ctx.runtime()
                .stop_with(&pref, ExitReason::Shutdown, timeout)
                .await;
            let record = &mut self.children[idx];
            record.last_ref = record.current.take();
        }
        let spec = self.children[idx].spec.clone();
        let pref = spec.start_child().await.map_err(|source| {
            Box::new(SupervisorError::ChildStartFailed {
                id: spec.id.clone(),
                source: Box::new(source),
            }) as BehaviorError
        })?;
        ctx.runtime().monitor(ctx.process_ref(), &pref);
        let record = &mut self.children[idx];
        record.current = Some(pref);
        record.restart_count += 1;
        Ok(serde_json::to_value(record.info())?)
    }
}

#[async_trait]
impl Behavior for SupervisorBehavior {
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
                self.handle_terminate_child(id, ctx).await
            }
            "restart_child" => {
                let id = request.get("id").and_then(Value::as_str).unwrap_or("");
                self.handle_restart_child(id, ctx).await
            }
            "get_children" => {
                let infos: Vec<ChildInfo> = self.children.iter().map(ChildRecord::info).collect();
                Ok(serde_json::to_value(infos)?)
            }
            "get_child" => {
                let id = request.get("id").and_then(Value::as_str).unwrap_or("");
                match self.children.iter().find(|c| c.spec.id == id) {
                    Some(record) => Ok(serde_json::to_value(record.info())?),
                    None => Ok(Value::Null),
                }
            }
            other => Err(format!("unknown supervisor op '{other}'").into()),
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
        if message.get("op").and_then(Value::as_str) == Some("restart_retry") {
            if self.giving_up {
                return Ok(());
            }
            let id = message.get("id").and_then(Value::as_str).unwrap_or("");
            let Some(idx) = self
                .children
                .iter()
                .position(|c| c.spec.id == id && c.current.is_none())
            else {
                return Ok(());
            };
            if !self.charge_intensity() {
                self.give_up(ctx);
                return Ok(());
            }
            self.start_child_at(idx, ctx).await;
        }
        Ok(())
    }

    async fn terminate(&mut self, _reason: &ExitReason, ctx: &ProcessContext) {
        let self_ref = ctx.process_ref().clone();
        let stops: Vec<(ProcessRef, Duration)> = self
            .children
            .iter()
            .filter_map(|c| {
                c.current
                    .as_ref()
                    .map(|p| (p.clone(), c.spec.shutdown_timeout))
            })
            .collect();
        for (pref, timeout) in stops.into_iter().rev() {
            ctx.runtime().demonitor(&self_ref, &pref);
            ctx.runtime()
                .stop_with(&pref, ExitReason::Shutdown, timeout)
                .await;
        }
    }

    fn name(&self) -> &str {
        "supervisor"
    }
}

/// Handle to a running supervisor process.
pub struct Supervisor {
    pref: ProcessRef,
    runtime: ProcessRuntime,
    pending: PendingTable,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("pref", &self.pref)
            .finish()
    }
}

impl Supervisor {
    /// Start a supervisor and its static children (in declared order). If
    /// any child fails to start, the already-started ones are stopped in
    /// reverse order and this returns the failure.
    pub async fn start(
        runtime: &ProcessRuntime,
        options: SupervisorOptions,
    ) -> Result<Self, SupervisorError> {
        let SupervisorOptions {
            strategy,
            children,
            child_template,
            intensity,
            auto_shutdown,
            name,
        } = options;

        match strategy {
            Strategy::SimpleOneForOne => {
                if child_template.is_none() {
                    return Err(SupervisorError::InvalidConfiguration {
                        reason: "simple_one_for_one requires a child template".into(),
                    });
                }
                if !children.is_empty() {
                    return Err(SupervisorError::InvalidConfiguration {
                        reason: "static children are not allowed with simple_one_for_one".into(),
                    });
                }
            }
            _ => {
                if child_template.is_some() {
                    return Err(SupervisorError::InvalidConfiguration {
                        reason: "a child template requires the simple_one_for_one strategy".into(),
                    });
                }
            }
        }

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let behavior = SupervisorBehavior {
            strategy,
            intensity,
            auto_shutdown,
            template: child_template,
            initial: children,
            children: Vec::new(),
            restart_history: VecDeque::new(),
            pending: Arc::clone(&pending),
            dynamic_seq: 0,
            giving_up: false,
        };
        let start_opts = StartOptions {
            name,
            args: Value::Null,
            init_timeout: None,
        };
        let pref = runtime
            .start(Box::new(behavior), start_opts)
            .await
            .map_err(|source| SupervisorError::StartFailed {
                source: Box::new(source),
            })?;
        let supervisor = Self {
            pref,
            runtime: runtime.clone(),
            pending,
        };
        if let Err(error) = supervisor.control(json!({ "op": "init_children" })).await {
            runtime.stop(&supervisor.pref).await;
            return Err(error);
        }
        Ok(supervisor)
    }

    /// The supervisor's process ref — usable as a child ref in a parent
    /// supervisor, monitorable, and stoppable like any process.
    pub fn process_ref(&self) -> &ProcessRef {
        &self.pref
    }

    /// Dynamically append and start a child. Its position in the start
    /// order is fixed from here on.
    pub async fn start_child(&self, spec: ChildSpec) -> Result<ChildInfo, SupervisorError> {
        let token = CorrelationId::new();
        self.pending.lock().insert(token, PendingStart::Spec(spec));
        let reply = self
            .control(json!({ "op": "start_child", "token": token }))
            .await?;
        serde_json::from_value(reply).map_err(|_| SupervisorError::InvalidReply)
    }

    /// Start a dynamic child from the `simple_one_for_one` template.
    pub async fn start_template_child(&self, args: Value) -> Result<ChildInfo, SupervisorError> {
        let token = CorrelationId::new();
        self.pending.lock().insert(token, PendingStart::Args(args));
        let reply = self
            .control(json!({ "op": "start_child", "token": token }))
            .await?;
        serde_json::from_value(reply).map_err(|_| SupervisorError::InvalidReply)
    }

    /// Stop a child and remove it from the supervisor; later restart
    /// strategies no longer see it.
    pub async fn terminate_child(&self, id: &str) -> Result<(), SupervisorError> {
        self.control(json!({ "op": "terminate_child", "id": id }))
            .await?;
        Ok(())
    }

    /// Stop (if needed) and start a child in place, preserving its
    /// position in the start order.
    pub async fn restart_child(&self, id: &str) -> Result<ChildInfo, SupervisorError> {
        let reply = self
            .control(json!({ "op": "restart_child", "id": id }))
            .await?;
        serde_json::from_value(reply).map_err(|_| SupervisorError::InvalidReply)
    }

    /// Snapshot of all children in start order.
    pub async fn get_children(&self) -> Result<Vec<ChildInfo>, SupervisorError> {
        let reply = self.control(json!({ "op": "get_children" })).await?;
        serde_json::from_value(reply).map_err(|_| SupervisorError::InvalidReply)
    }

    /// Snapshot of one child, `None` if unknown.
    pub async fn get_child(&self, id: &str) -> Result<Option<ChildInfo>, SupervisorError> {
        let reply = self.control(json!({ "op": "get_child", "id": id })).await?;
        if reply.is_null() {
            return Ok(None);
        }
        serde_json::from_value(reply)
            .map(Some)
            .map_err(|_| SupervisorError::InvalidReply)
    }

    /// Stop the supervisor; children stop first, in reverse start order.
    pub async fn stop(&self) {
        self.runtime.stop(&self.pref).await;
    }

    async fn control(&self, request: Value) -> Result<Value, SupervisorError> {
        self.runtime
            .call_with_timeout(&self.pref, request, CONTROL_CALL_TIMEOUT)
            .await
            .map_err(SupervisorError::from_call)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::process::Behavior;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Worker;

    #[async_trait]
    impl Behavior for Worker {
        async fn handle_call(
            &mut self,
            request: Value,
            ctx: &ProcessContext,
        ) -> Result<Value, BehaviorError> {
            match request.as_str() {
                Some("ping") => Ok(json!("pong")),
                Some("crash") => {
                    ctx.stop_self(ExitReason::error("requested"));
                    Ok(Value::Null)
                }
                _ => Err("unknown".into()),
            }
        }

        async fn handle_cast(
            &mut self,
            message: Value,
            ctx: &ProcessContext,
        ) -> Result<(), BehaviorError> {
            if message.as_str() == Some("crash") {
                ctx.stop_self(ExitReason::error("requested"));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "worker"
        }
    }

    fn worker_spec(rt: &ProcessRuntime, id: &str) -> ChildSpec {
        let rt = rt.clone();
        ChildSpec::new(id, move || {
            let rt = rt.clone();
            async move { rt.start(Box::new(Worker), StartOptions::new()).await }
        })
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_static_children_start_in_order_and_run() {
        let rt = ProcessRuntime::new();
        let sup = Supervisor::start(
            &rt,
            SupervisorOptions::new(Strategy::OneForOne)
                .child(worker_spec(&rt, "a"))
                .child(worker_spec(&rt, "b")),
        )
        .await
        .unwrap();

        let children = sup.get_children().await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, "a");
        assert_eq!(children[1].id, "b");
        assert!(children.iter().all(|c| c.running));
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_one_for_one_replaces_only_the_crashed_child() {
        let rt = ProcessRuntime::new();
        let sup = Supervisor::start(
            &rt,
            SupervisorOptions::new(Strategy::OneForOne)
                .child(worker_spec(&rt, "a"))
                .child(worker_spec(&rt, "b")),
        )
        .await
        .unwrap();

        let before = sup.get_children().await.unwrap();
        let a_ref = before[0].process.clone().unwrap();
        let b_ref = before[1].process.clone().unwrap();

        rt.cast(&b_ref, json!("crash"));
        // Wait until b's replacement is visible.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let children = sup.get_children().await.unwrap();
                let b = &children[1];
                if b.restart_count == 1 && b.running {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let after = sup.get_children().await.unwrap();
        assert_eq!(after[0].process.as_ref(), Some(&a_ref));
        assert_ne!(after[1].process.as_ref(), Some(&b_ref));
        assert!(rt.is_running(&a_ref));
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_intensity_exceeded_terminates_supervisor() {
        let rt = ProcessRuntime::new();
        let mut events = rt.subscribe_lifecycle();
        let sup = Supervisor::start(
            &rt,
            SupervisorOptions::new(Strategy::OneForOne)
                .child(worker_spec(&rt, "a"))
                .intensity(RestartIntensity::new(2, Duration::from_secs(5))),
        )
        .await
        .unwrap();
        let sup_ref = sup.process_ref().clone();

        // Crash the current child repeatedly until the supervisor gives up.
        for _ in 0..4 {
            let children = match sup.get_children().await {
                Ok(children) => children,
                Err(_) => break, // supervisor already gone
            };
            if let Some(pref) = children.first().and_then(|c| c.process.clone()) {
                rt.cast(&pref, json!("crash"));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        wait_for(|| !rt.is_running(&sup_ref)).await;
        let mut saw_crash = false;
        while let Ok(event) = events.try_recv() {
            if event.process == sup_ref {
                if let LifecycleEventKind::Crashed { error } = &event.kind {
                    assert!(error.contains("max restarts exceeded"));
                    saw_crash = true;
                }
            }
        }
        assert!(saw_crash);
    }

    #[tokio::test]
    async fn test_terminate_child_removes_it() {
        let rt = ProcessRuntime::new();
        let sup = Supervisor::start(
            &rt,
            SupervisorOptions::new(Strategy::OneForOne)
                .child(worker_spec(&rt, "a"))
                .child(worker_spec(&rt, "b")),
        )
        .await
        .unwrap();

        let a_ref = sup.get_children().await.unwrap()[0].process.clone().unwrap();
        sup.terminate_child("a").await.unwrap();
        assert!(!rt.is_running(&a_ref));
        let children = sup.get_children().await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "b");
        assert!(sup.get_child("a").await.unwrap().is_none());

        let err = sup.terminate_child("a").await.unwrap_err();
        assert!(matches!(err, SupervisorError::ChildNotFound { .. }));
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_simple_one_for_one_dynamic_children() {
        let rt = ProcessRuntime::new();
        let rt2 = rt.clone();
        let template = ChildTemplate::new("dyn", move |_args| {
            let rt = rt2.clone();
            async move { rt.start(Box::new(Worker), StartOptions::new()).await }
        });
        let sup = Supervisor::start(
            &rt,
            SupervisorOptions::new(Strategy::SimpleOneForOne).template(template),
        )
        .await
        .unwrap();

        let first = sup.start_template_child(json!({"n": 1})).await.unwrap();
        let second = sup.start_template_child(json!({"n": 2})).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(first.id.starts_with("dyn-"));

        // Crashing one dynamic child leaves its peer untouched.
        let first_ref = first.process.unwrap();
        let second_ref = second.process.unwrap();
        rt.cast(&first_ref, json!("crash"));
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let children = sup.get_children().await.unwrap();
                if children.iter().any(|c| c.restart_count == 1) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(rt.is_running(&second_ref));
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_failed_static_child_rolls_back_startup() {
        let rt = ProcessRuntime::new();
        let started = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&started);
        let rt2 = rt.clone();
        let good = ChildSpec::new("good", move || {
            let rt = rt2.clone();
            counter.fetch_add(1, Ordering::Relaxed);
            async move { rt.start(Box::new(Worker), StartOptions::new()).await }
        });
        let bad = ChildSpec::new("bad", || async {
            Err::<ProcessRef, _>(ProcessError::NameTaken {
                name: "whatever".into(),
            })
        });

        let err = Supervisor::start(
            &rt,
            SupervisorOptions::new(Strategy::OneForOne).child(good).child(bad),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SupervisorError::ChildStartFailed { ref id, .. } if id == "bad"));
        assert_eq!(started.load(Ordering::Relaxed), 1);
        // The good child was stopped during rollback.
        wait_for(|| rt.process_count() == 0).await;
    }

    #[tokio::test]
    async fn test_config_validation() {
        let rt = ProcessRuntime::new();
        let err = Supervisor::start(&rt, SupervisorOptions::new(Strategy::SimpleOneForOne))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidConfiguration { .. }));

        let rt2 = rt.clone();
        let template = ChildTemplate::new("t", move |_| {
            let rt = rt2.clone();
            async move { rt.start(Box::new(Worker), StartOptions::new()).await }
        });
        let err = Supervisor::start(
            &rt,
            SupervisorOptions::new(Strategy::OneForOne).template(template),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidConfiguration { .. }));
    }
}
