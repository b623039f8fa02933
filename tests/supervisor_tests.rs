//! Supervisor integration tests.
//!
//! Covers the restart strategies, the lifecycle event sequence around a
//! restart, restart-intensity accounting with the sliding window, and
//! auto-shutdown on significant children.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use plexus::prelude::*;

struct Worker;

#[async_trait]
impl Behavior for Worker {
    async fn handle_call(
        &mut self,
        request: Value,
        _ctx: &ProcessContext,
    ) -> Result<Value, BehaviorError> {
        match request.as_str() {
            Some("ping") => Ok(json!("pong")),
            _ => Err("unknown".into()),
        }
    }

    async fn handle_cast(
        &mut self,
        message: Value,
        ctx: &ProcessContext,
    ) -> Result<(), BehaviorError> {
        match message.as_str() {
            Some("crash") => ctx.stop_self(ExitReason::error("worker crash")),
            Some("finish") => ctx.stop_self(ExitReason::Normal),
            _ => {}
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

async fn child_refs(sup: &Supervisor) -> Vec<Option<ProcessRef>> {
    sup.get_children()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.process)
        .collect()
}

/// Wait until the child with the given id reaches `restart_count`.
async fn await_restart(sup: &Supervisor, id: &str, count: u32) {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(Some(child)) = sup.get_child(id).await {
                if child.restart_count >= count && child.running {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn one_for_one_restart_with_event_sequence() {
    // S2: crash B under [A, B]; A untouched, B replaced once, and the
    // lifecycle bus shows crashed(B), terminated(B), restarted(B, 1),
    // started(new B).
    let rt = ProcessRuntime::new();
    let mut events = rt.subscribe_lifecycle();
    let sup = Supervisor::start(
        &rt,
        SupervisorOptions::new(Strategy::OneForOne)
            .child(worker_spec(&rt, "a"))
            .child(worker_spec(&rt, "b")),
    )
    .await
    .unwrap();

    let before = child_refs(&sup).await;
    let a_ref = before[0].clone().unwrap();
    let b_ref = before[1].clone().unwrap();

    rt.cast(&b_ref, json!("crash"));
    await_restart(&sup, "b", 1).await;

    let after = child_refs(&sup).await;
    assert_eq!(after[0].as_ref(), Some(&a_ref), "A must keep its ref");
    assert_ne!(after[1].as_ref(), Some(&b_ref), "B must be replaced");
    assert!(rt.is_running(&a_ref));

    // Collect the event trail for the old B ref and its successor.
    let mut trail = Vec::new();
    while let Ok(event) = events.try_recv() {
        trail.push(event);
    }
    let crashed = trail
        .iter()
        .position(|e| e.process == b_ref && matches!(e.kind, LifecycleEventKind::Crashed { .. }));
    let terminated = trail
        .iter()
        .position(|e| e.process == b_ref && matches!(e.kind, LifecycleEventKind::Terminated { .. }));
    let restarted = trail.iter().position(|e| {
        e.process == b_ref && matches!(e.kind, LifecycleEventKind::Restarted { attempt: 1 })
    });
    let new_b = after[1].clone().unwrap();
    let started = trail
        .iter()
        .position(|e| e.process == new_b && matches!(e.kind, LifecycleEventKind::Started));

    let crashed = crashed.expect("crashed event");
    let terminated = terminated.expect("terminated event");
    let restarted = restarted.expect("restarted event");
    let started = started.expect("started event");
    assert!(crashed < terminated);
    assert!(terminated < restarted);
    assert!(restarted < started);

    sup.stop().await;
}

#[tokio::test]
async fn one_for_all_restarts_every_child() {
    let rt = ProcessRuntime::new();
    let sup = Supervisor::start(
        &rt,
        SupervisorOptions::new(Strategy::OneForAll)
            .child(worker_spec(&rt, "a"))
            .child(worker_spec(&rt, "b"))
            .child(worker_spec(&rt, "c")),
    )
    .await
    .unwrap();

    let before = child_refs(&sup).await;
    rt.cast(before[1].as_ref().unwrap(), json!("crash"));
    await_restart(&sup, "b", 1).await;

    let after = child_refs(&sup).await;
    for (old, new) in before.iter().zip(&after) {
        assert_ne!(old, new, "every child must be replaced");
        assert!(rt.is_running(new.as_ref().unwrap()));
    }
    sup.stop().await;
}

#[tokio::test]
async fn rest_for_one_restarts_only_followers() {
    let rt = ProcessRuntime::new();
    let sup = Supervisor::start(
        &rt,
        SupervisorOptions::new(Strategy::RestForOne)
            .child(worker_spec(&rt, "a"))
            .child(worker_spec(&rt, "b"))
            .child(worker_spec(&rt, "c")),
    )
    .await
    .unwrap();

    let before = child_refs(&sup).await;
    rt.cast(before[1].as_ref().unwrap(), json!("crash"));
    await_restart(&sup, "b", 1).await;

    let after = child_refs(&sup).await;
    assert_eq!(after[0], before[0], "A (before the crash) is untouched");
    assert_ne!(after[1], before[1], "B is replaced");
    assert_ne!(after[2], before[2], "C (after B) is replaced");
    sup.stop().await;
}

#[tokio::test]
async fn transient_child_is_not_restarted_on_normal_exit() {
    let rt = ProcessRuntime::new();
    let sup = Supervisor::start(
        &rt,
        SupervisorOptions::new(Strategy::OneForOne)
            .child(worker_spec(&rt, "a").with_restart(RestartPolicy::Transient)),
    )
    .await
    .unwrap();

    let a_ref = child_refs(&sup).await[0].clone().unwrap();
    rt.cast(&a_ref, json!("finish"));

    tokio::time::timeout(Duration::from_secs(2), async {
        while rt.is_running(&a_ref) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let child = sup.get_child("a").await.unwrap().unwrap();
    assert!(!child.running);
    assert_eq!(child.restart_count, 0);
    sup.stop().await;
}

#[tokio::test]
async fn intensity_exceeded_terminates_supervisor() {
    // S3: a child that crashes as fast as it restarts exhausts
    // max_restarts=2 and kills the supervisor with the intensity error.
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

    // Keep crashing whatever incarnation is current.
    let crasher = {
        let rt = rt.clone();
        tokio::spawn(async move {
            loop {
                match sup.get_children().await {
                    Ok(children) => {
                        if let Some(pref) = children.first().and_then(|c| c.process.clone()) {
                            rt.cast(&pref, json!("crash"));
                        }
                    }
                    Err(_) => break,
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while rt.is_running(&sup_ref) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    crasher.abort();

    let mut saw_intensity_crash = false;
    while let Ok(event) = events.try_recv() {
        if event.process == sup_ref {
            if let LifecycleEventKind::Crashed { error } = &event.kind {
                assert!(error.contains("max restarts exceeded"));
                saw_intensity_crash = true;
            }
        }
    }
    assert!(saw_intensity_crash);
}

#[tokio::test]
async fn sliding_window_lets_old_restarts_age_out() {
    // S4 (intent): with max_restarts=2 / within=700ms, crashes spaced
    // wider than the window keep the supervisor alive indefinitely, while
    // a rapid burst kills it.
    let rt = ProcessRuntime::new();
    let sup = Supervisor::start(
        &rt,
        SupervisorOptions::new(Strategy::OneForOne)
            .child(worker_spec(&rt, "a"))
            .intensity(RestartIntensity::new(2, Duration::from_millis(700))),
    )
    .await
    .unwrap();
    let sup_ref = sup.process_ref().clone();

    // Three paced crashes: each pair is farther apart than the window, so
    // entries age out before the next one lands.
    for round in 1..=3u32 {
        let pref = sup.get_child("a").await.unwrap().unwrap().process.unwrap();
        rt.cast(&pref, json!("crash"));
        await_restart(&sup, "a", round).await;
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(rt.is_running(&sup_ref), "supervisor died on paced crash {round}");
    }

    // Burst: three crashes inside one window exceed max_restarts=2.
    for _ in 0..4 {
        if let Ok(Some(child)) = sup.get_child("a").await {
            if let Some(pref) = child.process {
                rt.cast(&pref, json!("crash"));
            }
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    tokio::time::timeout(Duration::from_secs(3), async {
        while rt.is_running(&sup_ref) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn any_significant_child_shuts_supervisor_down() {
    let rt = ProcessRuntime::new();
    let sup = Supervisor::start(
        &rt,
        SupervisorOptions::new(Strategy::OneForOne)
            .child(worker_spec(&rt, "essential")
                .with_restart(RestartPolicy::Transient)
                .significant(true))
            .child(worker_spec(&rt, "helper"))
            .auto_shutdown(AutoShutdown::AnySignificant),
    )
    .await
    .unwrap();
    let sup_ref = sup.process_ref().clone();
    let helper_ref = sup.get_child("helper").await.unwrap().unwrap().process.unwrap();

    let essential = sup.get_child("essential").await.unwrap().unwrap().process.unwrap();
    rt.cast(&essential, json!("finish"));

    tokio::time::timeout(Duration::from_secs(2), async {
        while rt.is_running(&sup_ref) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    // The helper went down with the supervisor.
    assert!(!rt.is_running(&helper_ref));
}

#[tokio::test]
async fn nested_supervisor_is_an_ordinary_child() {
    // A parent supervising a child supervisor: when the inner supervisor
    // goes down, the parent replaces the whole subtree like any child.
    let rt = ProcessRuntime::new();

    let inner_spec = {
        let rt = rt.clone();
        ChildSpec::new("inner", move || {
            let rt = rt.clone();
            async move {
                let sup = Supervisor::start(
                    &rt,
                    SupervisorOptions::new(Strategy::OneForOne).child(worker_spec(&rt, "w")),
                )
                .await
                .map_err(|e| ProcessError::InitFailed {
                    behavior: "supervisor".into(),
                    source: Box::new(e),
                })?;
                Ok(sup.process_ref().clone())
            }
        })
    };

    let parent = Supervisor::start(
        &rt,
        SupervisorOptions::new(Strategy::OneForOne).child(inner_spec),
    )
    .await
    .unwrap();

    let inner_ref = parent
        .get_child("inner")
        .await
        .unwrap()
        .unwrap()
        .process
        .unwrap();
    // Supervisor + inner supervisor + worker.
    assert_eq!(rt.process_count(), 3);

    // Take the inner supervisor down; its worker stops with it, then the
    // parent's permanent policy rebuilds the subtree.
    rt.stop(&inner_ref).await;
    await_restart(&parent, "inner", 1).await;

    let replacement = parent
        .get_child("inner")
        .await
        .unwrap()
        .unwrap()
        .process
        .unwrap();
    assert_ne!(replacement, inner_ref);
    assert!(rt.is_running(&replacement));
    assert_eq!(rt.process_count(), 3);
    parent.stop().await;
    assert_eq!(rt.process_count(), 0);
}
