//! Process kernel integration tests.
//!
//! Exercises the core actor discipline end to end: mailbox serialization,
//! call/reply ordering, handler failure containment, monitors, and
//! registry consistency across process death.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use plexus::prelude::*;

/// Counter with deliberately failable handlers.
struct Counter {
    n: i64,
    /// Per-message artificial delay, to stress serialization.
    delay: Option<Duration>,
}

impl Counter {
    fn new() -> Self {
        Self { n: 0, delay: None }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            n: 0,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl Behavior for Counter {
    async fn handle_call(
        &mut self,
        request: Value,
        _ctx: &ProcessContext,
    ) -> Result<Value, BehaviorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match request.get("op").and_then(Value::as_str) {
            Some("get") => Ok(json!(self.n)),
            Some("add") => {
                let delta = request.get("delta").and_then(Value::as_i64).unwrap_or(0);
                self.n += delta;
                Ok(json!(self.n))
            }
            Some("fail") => Err("handler refused".into()),
            _ => Err("unknown request".into()),
        }
    }

    async fn handle_cast(
        &mut self,
        message: Value,
        ctx: &ProcessContext,
    ) -> Result<(), BehaviorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match message.as_str() {
            Some("inc") => self.n += 1,
            Some("crash") => ctx.stop_self(ExitReason::error("boom")),
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "counter"
    }
}

/// Records every down-notification it receives.
struct Watcher {
    seen: Arc<Mutex<Vec<DownNotification>>>,
}

#[async_trait]
impl Behavior for Watcher {
    async fn handle_cast(
        &mut self,
        message: Value,
        _ctx: &ProcessContext,
    ) -> Result<(), BehaviorError> {
        if let Some(note) = DownNotification::from_value(&message) {
            self.seen.lock().push(note);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "watcher"
    }
}

#[tokio::test]
async fn counter_observes_casts_before_call() {
    // S1: cast, cast, cast, call(get) => 3.
    let rt = ProcessRuntime::new();
    let counter = rt
        .start(Box::new(Counter::new()), StartOptions::new())
        .await
        .unwrap();

    rt.cast(&counter, json!("inc"));
    rt.cast(&counter, json!("inc"));
    rt.cast(&counter, json!("inc"));
    let n = rt.call(&counter, json!({"op": "get"})).await.unwrap();
    assert_eq!(n, json!(3));
}

#[tokio::test]
async fn replies_arrive_in_call_order() {
    // Issue a burst of calls from one caller; the k-th reply must carry
    // the k-th running total.
    let rt = ProcessRuntime::new();
    let counter = rt
        .start(Box::new(Counter::new()), StartOptions::new())
        .await
        .unwrap();

    for expected in 1..=20i64 {
        let reply = rt
            .call(&counter, json!({"op": "add", "delta": 1}))
            .await
            .unwrap();
        assert_eq!(reply, json!(expected));
    }
}

#[tokio::test]
async fn handlers_never_overlap() {
    // Concurrent senders, slow handler: the final count must equal the
    // number of casts, which fails if two handlers ever ran in parallel
    // over the same state.
    let rt = ProcessRuntime::new();
    let counter = rt
        .start(
            Box::new(Counter::slow(Duration::from_millis(1))),
            StartOptions::new(),
        )
        .await
        .unwrap();

    let mut senders = Vec::new();
    for _ in 0..4 {
        let rt = rt.clone();
        let counter = counter.clone();
        senders.push(tokio::spawn(async move {
            for _ in 0..10 {
                rt.cast(&counter, json!("inc"));
            }
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }

    let n = rt
        .call_with_timeout(&counter, json!({"op": "get"}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(n, json!(40));
}

#[tokio::test]
async fn call_timeout_leaves_callee_alive() {
    let rt = ProcessRuntime::new();
    let counter = rt
        .start(
            Box::new(Counter::slow(Duration::from_millis(200))),
            StartOptions::new(),
        )
        .await
        .unwrap();

    let err = rt
        .call_with_timeout(&counter, json!({"op": "get"}), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::CallTimeout { .. }));

    // The callee finished its handler and keeps serving.
    let n = rt
        .call_with_timeout(&counter, json!({"op": "get"}), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(n, json!(0));
    assert!(rt.is_running(&counter));
}

#[tokio::test]
async fn handler_error_rejects_call_only() {
    let rt = ProcessRuntime::new();
    let counter = rt
        .start(Box::new(Counter::new()), StartOptions::new())
        .await
        .unwrap();

    let err = rt.call(&counter, json!({"op": "fail"})).await.unwrap_err();
    assert!(matches!(err, ProcessError::CallFailed { .. }));
    assert!(rt.is_running(&counter));
    assert_eq!(
        rt.call(&counter, json!({"op": "get"})).await.unwrap(),
        json!(0)
    );
}

#[tokio::test]
async fn monitor_sees_final_reason_exactly_once() {
    let rt = ProcessRuntime::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let watcher = rt
        .start(
            Box::new(Watcher {
                seen: Arc::clone(&seen),
            }),
            StartOptions::new(),
        )
        .await
        .unwrap();
    let counter = rt
        .start(Box::new(Counter::new()), StartOptions::new())
        .await
        .unwrap();

    rt.monitor(&watcher, &counter);
    rt.cast(&counter, json!("crash"));

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    // Give any (erroneous) duplicate a chance to arrive.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].process, counter);
    assert_eq!(seen[0].reason, ExitReason::error("boom"));
}

#[tokio::test]
async fn registry_name_is_free_after_death() {
    let rt = ProcessRuntime::new();
    let first = rt
        .start(Box::new(Counter::new()), StartOptions::named("db"))
        .await
        .unwrap();
    assert_eq!(rt.registry().whereis("db"), Some(first.clone()));

    rt.stop(&first).await;
    assert!(rt.registry().whereis("db").is_none());

    // The name can be taken again by a fresh process.
    let second = rt
        .start(Box::new(Counter::new()), StartOptions::named("db"))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(rt.registry().whereis("db"), Some(second));
}

#[tokio::test]
async fn pending_call_rejected_when_callee_dies_first() {
    let rt = ProcessRuntime::new();
    let counter = rt
        .start(
            Box::new(Counter::slow(Duration::from_millis(100))),
            StartOptions::new(),
        )
        .await
        .unwrap();

    // Keep the callee busy, enqueue a stop behind the busy handler, then
    // a call behind the stop.
    rt.cast(&counter, json!("inc"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let stopper = {
        let rt = rt.clone();
        let counter = counter.clone();
        tokio::spawn(async move { rt.stop(&counter).await })
    };
    // Let the stop task enqueue its envelope while the handler still runs.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = rt
        .call_with_timeout(&counter, json!({"op": "get"}), Duration::from_secs(2))
        .await
        .unwrap_err();
    match err {
        ProcessError::CalleeTerminated { reason } => {
            assert_eq!(reason, ExitReason::Shutdown)
        }
        other => panic!("expected CalleeTerminated, got {other:?}"),
    }
    stopper.await.unwrap();
}

#[tokio::test]
async fn process_info_reports_counters() {
    let rt = ProcessRuntime::new();
    let counter = rt
        .start(Box::new(Counter::new()), StartOptions::named("stats"))
        .await
        .unwrap();

    rt.cast(&counter, json!("inc"));
    let _ = rt.call(&counter, json!({"op": "get"})).await.unwrap();

    let info = rt.process_info(&counter).unwrap();
    assert_eq!(info.name.as_deref(), Some("stats"));
    assert_eq!(info.messages_processed, 2);
    assert!(info.phase.is_running());
}
