//! Cluster transport: TCP listener, dialer, handshake, and per-peer
//! reader/writer tasks.
//!
//! Every connection starts with a handshake frame in each direction. When
//! both sides dial each other, the duplicate is resolved by the node with
//! the lexicographically smaller id keeping its outgoing connection.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use super::error::ClusterError;
use super::frame::{read_frame, write_frame, Frame, PROTOCOL_VERSION};
use super::membership::{self, ClusterInner, DownReason, InboundFrame};
use super::node_id::NodeId;

/// Deadline for the handshake exchange on a fresh connection.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn accept_loop(inner: Arc<ClusterInner>, listener: TcpListener) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        if let Err(error) = handle_inbound(inner, stream).await {
                            tracing::debug!(%error, "inbound connection rejected");
                        }
                    });
                }
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_inbound(inner: Arc<ClusterInner>, mut stream: TcpStream) -> Result<(), ClusterError> {
    let secret = inner.secret.clone();
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut stream, secret.as_deref()))
        .await
        .map_err(|_| ClusterError::Codec {
            reason: "handshake timed out".into(),
        })??;
    let Frame::Handshake {
        node,
        protocol_version,
    } = frame
    else {
        return Err(ClusterError::Codec {
            reason: "expected handshake as first frame".into(),
        });
    };
    if protocol_version != PROTOCOL_VERSION {
        return Err(ClusterError::Codec {
            reason: format!("protocol version mismatch: {protocol_version}"),
        });
    }
    if node == inner.local_id {
        return Ok(());
    }

    // Duplicate connection tiebreak: the lexicographically smaller node
    // keeps its outgoing connection, so it drops inbound duplicates.
    if let Some(peer) = inner.peers.get(&node).map(|p| Arc::clone(p.value())) {
        if peer.is_connected() && inner.local_id < node {
            tracing::debug!(node = %node, "dropping duplicate inbound connection");
            return Ok(());
        }
    }

    write_frame(
        &mut stream,
        &Frame::Handshake {
            node: inner.local_id.clone(),
            protocol_version: PROTOCOL_VERSION,
        },
        secret.as_deref(),
    )
    .await?;
    register_connection(inner, node, stream);
    Ok(())
}

/// Dial `node` in the background, unless it is us, already connected, or
/// already being dialed.
pub(crate) fn spawn_dial(inner: Arc<ClusterInner>, node: NodeId) {
    if node == inner.local_id {
        return;
    }
    if inner
        .peers
        .get(&node)
        .is_some_and(|p| p.value().is_connected())
    {
        return;
    }
    if inner.dialing.insert(node.clone(), ()).is_some() {
        return;
    }
    tokio::spawn(async move {
        let result = dial(&inner, &node).await;
        inner.dialing.remove(&node);
        if let Err(error) = result {
            tracing::debug!(node = %node, %error, "dial failed");
            // A redundant dial may lose the duplicate-connection tiebreak
            // while the peer is perfectly reachable; only report refusal
            // when no connection exists.
            let connected = inner
                .peers
                .get(&node)
                .is_some_and(|p| p.value().is_connected());
            if !connected {
                membership::mark_down(&inner, &node, DownReason::ConnectionRefused);
            }
        }
    });
}

async fn dial(inner: &Arc<ClusterInner>, node: &NodeId) -> Result<(), ClusterError> {
    let mut stream = TcpStream::connect(node.addr()).await?;
    let secret = inner.secret.clone();
    write_frame(
        &mut stream,
        &Frame::Handshake {
            node: inner.local_id.clone(),
            protocol_version: PROTOCOL_VERSION,
        },
        secret.as_deref(),
    )
    .await?;
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut stream, secret.as_deref()))
        .await
        .map_err(|_| ClusterError::Codec {
            reason: "handshake timed out".into(),
        })??;
    let Frame::Handshake {
        node: remote,
        protocol_version,
    } = frame
    else {
        return Err(ClusterError::Codec {
            reason: "expected handshake reply".into(),
        });
    };
    if protocol_version != PROTOCOL_VERSION {
        return Err(ClusterError::Codec {
            reason: format!("protocol version mismatch: {protocol_version}"),
        });
    }
    if &remote != node {
        tracing::warn!(dialed = %node, reported = %remote, "peer reported a different identity");
    }
    register_connection(Arc::clone(inner), remote, stream);
    Ok(())
}

/// Split the authenticated stream into per-peer reader and writer tasks.
fn register_connection(inner: Arc<ClusterInner>, node: NodeId, stream: TcpStream) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let generation = membership::register_peer(&inner, &node, tx);
    tokio::spawn(writer_loop(
        Arc::clone(&inner),
        node.clone(),
        write_half,
        rx,
        generation,
    ));
    tokio::spawn(reader_loop(inner, node, read_half, generation));
}

async fn writer_loop(
    inner: Arc<ClusterInner>,
    node: NodeId,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    generation: u64,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(error) = write_frame(&mut write_half, &frame, inner.secret.as_deref()).await {
            tracing::debug!(node = %node, %error, "peer write failed");
            membership::mark_down_gen(&inner, &node, DownReason::ConnectionClosed, Some(generation));
            break;
        }
    }
}

async fn reader_loop(
    inner: Arc<ClusterInner>,
    node: NodeId,
    mut read_half: OwnedReadHalf,
    generation: u64,
) {
    loop {
        match read_frame(&mut read_half, inner.secret.as_deref()).await {
            Ok(Frame::Heartbeat {
                node_info,
                known_nodes,
                global_entries,
            }) => membership::handle_heartbeat(&inner, &node, node_info, known_nodes, global_entries),
            Ok(Frame::GracefulShutdown) => {
                membership::mark_down_gen(
                    &inner,
                    &node,
                    DownReason::GracefulShutdown,
                    Some(generation),
                );
                break;
            }
            Ok(Frame::Handshake { .. }) => {
                tracing::debug!(node = %node, "ignoring repeated handshake");
            }
            Ok(frame) => {
                let _ = inner.inbound.send(InboundFrame {
                    from: node.clone(),
                    frame,
                });
            }
            Err(error) => {
                if matches!(error, ClusterError::Auth { .. }) {
                    tracing::warn!(node = %node, %error, "unauthenticated frame; disconnecting peer");
                } else {
                    tracing::debug!(node = %node, %error, "peer read ended");
                }
                membership::mark_down_gen(
                    &inner,
                    &node,
                    DownReason::ConnectionClosed,
                    Some(generation),
                );
                break;
            }
        }
    }
}
