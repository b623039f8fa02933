//! Cluster integration tests over loopback TCP.
//!
//! Nodes bind OS-assigned ports (`port 0`), so tests can run in
//! parallel. Heartbeat intervals are shortened to keep detection fast.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::time::Duration;

use plexus::prelude::*;

fn fast_config(name: &str) -> ClusterConfig {
    ClusterConfig::new(name)
        .with_host("127.0.0.1")
        .with_port(0)
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_heartbeat_miss_threshold(5)
}

async fn await_connected(cluster: &Cluster, peer: &NodeId) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !cluster.is_node_connected(peer) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never connected to {peer}"));
}

#[tokio::test]
async fn seed_dial_connects_both_directions() {
    let a = Node::new();
    let cluster_a = a.start_cluster(fast_config("alpha")).await.unwrap();
    let a_id = cluster_a.local_node_id();

    let b = Node::new();
    let cluster_b = b
        .start_cluster(fast_config("beta").with_seed(a_id.clone()))
        .await
        .unwrap();
    let b_id = cluster_b.local_node_id();

    await_connected(&cluster_b, &a_id).await;
    await_connected(&cluster_a, &b_id).await;

    assert_eq!(cluster_a.status(), ClusterStatus::Running);
    assert_eq!(cluster_a.connected_nodes().len(), 1);
    assert_eq!(cluster_b.connected_nodes().len(), 1);
    assert_eq!(cluster_a.node(&b_id).unwrap().status, NodeStatus::Connected);

    a.stop_cluster().await;
    b.stop_cluster().await;
}

#[tokio::test]
async fn node_up_event_is_emitted_once() {
    let a = Node::new();
    let cluster_a = a.start_cluster(fast_config("alpha")).await.unwrap();
    let mut events = cluster_a.subscribe();
    let a_id = cluster_a.local_node_id();

    let b = Node::new();
    let cluster_b = b
        .start_cluster(fast_config("beta").with_seed(a_id.clone()))
        .await
        .unwrap();
    let b_id = cluster_b.local_node_id();
    await_connected(&cluster_a, &b_id).await;

    // Let several heartbeats pass; duplicates would arrive here.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut ups = 0;
    while let Ok(event) = events.try_recv() {
        if let ClusterEvent::NodeUp(info) = event {
            assert_eq!(info.id, b_id);
            ups += 1;
        }
    }
    assert_eq!(ups, 1);

    a.stop_cluster().await;
    b.stop_cluster().await;
}

#[tokio::test]
async fn graceful_stop_reports_graceful_shutdown() {
    let a = Node::new();
    let cluster_a = a.start_cluster(fast_config("alpha")).await.unwrap();
    let a_id = cluster_a.local_node_id();

    let b = Node::new();
    let cluster_b = b
        .start_cluster(fast_config("beta").with_seed(a_id.clone()))
        .await
        .unwrap();
    let b_id = cluster_b.local_node_id();
    await_connected(&cluster_a, &b_id).await;

    let mut events = cluster_a.subscribe();
    b.stop_cluster().await;

    let reason = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(ClusterEvent::NodeDown { node, reason }) = events.recv().await {
                if node == b_id {
                    break reason;
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(reason, DownReason::GracefulShutdown);
    assert!(!cluster_a.is_node_connected(&b_id));

    a.stop_cluster().await;
}

#[tokio::test]
async fn gossip_connects_nodes_that_share_one_seed() {
    // C seeds only A, but learns about B through A's heartbeat.
    let a = Node::new();
    let cluster_a = a.start_cluster(fast_config("alpha")).await.unwrap();
    let a_id = cluster_a.local_node_id();

    let b = Node::new();
    let cluster_b = b
        .start_cluster(fast_config("beta").with_seed(a_id.clone()))
        .await
        .unwrap();
    let b_id = cluster_b.local_node_id();
    await_connected(&cluster_a, &b_id).await;

    let c = Node::new();
    let cluster_c = c
        .start_cluster(fast_config("gamma").with_seed(a_id.clone()))
        .await
        .unwrap();
    let c_id = cluster_c.local_node_id();

    await_connected(&cluster_c, &a_id).await;
    // Gossip spreads B to C (and C to B) within a few heartbeats.
    await_connected(&cluster_c, &b_id).await;
    await_connected(&cluster_b, &c_id).await;

    a.stop_cluster().await;
    b.stop_cluster().await;
    c.stop_cluster().await;
}

#[tokio::test]
async fn wrong_secret_cannot_join() {
    let a = Node::new();
    let cluster_a = a
        .start_cluster(fast_config("alpha").with_secret("right-secret"))
        .await
        .unwrap();
    let a_id = cluster_a.local_node_id();

    let b = Node::new();
    let cluster_b = b
        .start_cluster(
            fast_config("beta")
                .with_secret("wrong-secret")
                .with_seed(a_id.clone()),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!cluster_a.is_node_connected(&cluster_b.local_node_id()));
    assert!(!cluster_b.is_node_connected(&a_id));

    a.stop_cluster().await;
    b.stop_cluster().await;
}

#[tokio::test]
async fn matching_secret_joins_and_routes() {
    let a = Node::new();
    let cluster_a = a
        .start_cluster(fast_config("alpha").with_secret("s3cret"))
        .await
        .unwrap();
    let a_id = cluster_a.local_node_id();

    let b = Node::new();
    let cluster_b = b
        .start_cluster(
            fast_config("beta")
                .with_secret("s3cret")
                .with_seed(a_id.clone()),
        )
        .await
        .unwrap();
    await_connected(&cluster_b, &a_id).await;

    a.stop_cluster().await;
    b.stop_cluster().await;
}

#[tokio::test]
async fn global_registry_converges_and_resolves_conflicts() {
    // S5: both isolated nodes register the same name; after they connect,
    // the earlier registration wins everywhere and the losing node emits
    // a conflict event.
    let a = Node::new();
    let cluster_a = a.start_cluster(fast_config("alpha")).await.unwrap();
    let a_id = cluster_a.local_node_id();

    let b = Node::new();
    let cluster_b = b.start_cluster(fast_config("beta")).await.unwrap();

    // A registers first (earlier timestamp), then B.
    let svc_a = a
        .runtime()
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    a.global_registry()
        .register("svc", svc_a.clone(), None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let svc_b = b
        .runtime()
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    b.global_registry()
        .register("svc", svc_b.clone(), None)
        .unwrap();

    let mut b_events = b.global_registry().subscribe();
    cluster_b.connect(a_id.clone());

    // Both sides converge on A's registration.
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if b.global_registry().whereis("svc") == Some(svc_a.clone())
                && a.global_registry().whereis("svc") == Some(svc_a.clone())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let mut saw_conflict = false;
    while let Ok(event) = b_events.try_recv() {
        if let GlobalRegistryEvent::ConflictResolved { name, winner, loser } = event {
            assert_eq!(name, "svc");
            assert_eq!(winner.process, svc_a);
            assert_eq!(loser.process, svc_b);
            saw_conflict = true;
        }
    }
    assert!(saw_conflict, "losing node must emit ConflictResolved");

    a.stop_cluster().await;
    b.stop_cluster().await;
}

#[tokio::test]
async fn lost_node_entries_are_purged() {
    let a = Node::new();
    let cluster_a = a.start_cluster(fast_config("alpha")).await.unwrap();
    let a_id = cluster_a.local_node_id();

    let b = Node::new();
    let cluster_b = b
        .start_cluster(fast_config("beta").with_seed(a_id.clone()))
        .await
        .unwrap();
    let b_id = cluster_b.local_node_id();
    await_connected(&cluster_a, &b_id).await;

    let svc_b = b
        .runtime()
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    b.global_registry().register("svc", svc_b, None).unwrap();

    // A learns the entry, then B leaves.
    tokio::time::timeout(Duration::from_secs(3), async {
        while a.global_registry().whereis("svc").is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let mut a_events = a.global_registry().subscribe();
    b.stop_cluster().await;

    tokio::time::timeout(Duration::from_secs(3), async {
        while a.global_registry().whereis("svc").is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let mut saw_node_lost = false;
    while let Ok(event) = a_events.try_recv() {
        if let GlobalRegistryEvent::NodeLost { node, names } = event {
            assert_eq!(node, b_id);
            assert_eq!(names, vec!["svc".to_string()]);
            saw_node_lost = true;
        }
    }
    assert!(saw_node_lost);

    a.stop_cluster().await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let node = Node::new();
    let err = node
        .start_cluster(ClusterConfig::new("9bad").with_port(0))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::InvalidNodeId { .. }));

    let err = node
        .start_cluster(
            ClusterConfig::new("ok")
                .with_host("127.0.0.1")
                .with_port(0)
                .with_heartbeat_miss_threshold(0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::InvalidConfig { .. }));
}

/// Minimal behavior for processes used as registration targets.
struct Idle;

impl Behavior for Idle {
    fn name(&self) -> &str {
        "idle"
    }
}
