//! Wire frames: length-prefixed JSON records with optional HMAC-SHA256
//! authentication.
//!
//! Layout on the wire:
//!
//! ```text
//! [u32 BE payload length][u8 flags][32-byte mac?][JSON frame body]
//! ```
//!
//! `flags` bit 0 marks the presence of the mac, computed over the JSON
//! body with the cluster secret as key. When a secret is configured,
//! frames without a valid mac are dropped and the connection is closed.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// Layer 3: Internal module imports
use super::error::ClusterError;
use super::membership::NodeInfo;
use super::node_id::NodeId;
use crate::dist::global::GlobalEntry;
use crate::process::ProcessRef;
use crate::util::CorrelationId;

type HmacSha256 = Hmac<Sha256>;

/// Protocol version carried in handshakes; mismatches are rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame payload (16 MiB). Prevents unbounded allocation from a
/// malicious or buggy peer.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

const FLAG_MAC: u8 = 0b0000_0001;

/// Name registration requested by a remote spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    /// No name is registered.
    #[default]
    None,

    /// Register in the target node's local registry.
    Local,

    /// The caller registers the name in the global registry after the
    /// spawn succeeds.
    Global,
}

/// Error kinds a peer can report in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The target process does not exist on the peer.
    ServerNotRunning,

    /// The requested behavior name is not registered on the peer.
    BehaviorNotFound,

    /// The remote spawn failed (init error, duplicate name, …).
    SpawnFailed,

    /// The remote call handler failed.
    CallFailed,

    /// The remote callee terminated before replying.
    CalleeTerminated,
}

/// Serializable error payload carried in reply frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One inter-node protocol frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Mandatory first frame in both directions on every connection.
    Handshake {
        node: NodeId,
        protocol_version: u32,
    },

    /// Periodic liveness + gossip.
    Heartbeat {
        node_info: NodeInfo,
        known_nodes: Vec<NodeId>,
        global_entries: Vec<GlobalEntry>,
    },

    /// Location-transparent synchronous call.
    Call {
        target: ProcessRef,
        message: Value,
        correlation_id: CorrelationId,
        timeout_ms: u64,
    },

    /// Location-transparent fire-and-forget.
    Cast { target: ProcessRef, message: Value },

    /// Response to `Call`.
    Reply {
        correlation_id: CorrelationId,
        result: Result<Value, RemoteError>,
    },

    /// Remote spawn request.
    Spawn {
        correlation_id: CorrelationId,
        behavior: String,
        args: Value,
        name: Option<String>,
        registration: Registration,
    },

    /// Response to `Spawn`.
    SpawnResult {
        correlation_id: CorrelationId,
        result: Result<ProcessRef, RemoteError>,
    },

    /// Eager global-registry registration broadcast.
    GlobalRegister { entry: GlobalEntry },

    /// Eager global-registry unregistration broadcast.
    GlobalUnregister { name: String, owner: NodeId },

    /// Orderly disconnect notice.
    GracefulShutdown,
}

impl Frame {
    /// Remote call timeout as a `Duration`.
    pub(crate) fn call_timeout(timeout_ms: u64) -> Duration {
        Duration::from_millis(timeout_ms)
    }
}

fn codec_error(reason: impl std::fmt::Display) -> ClusterError {
    ClusterError::Codec {
        reason: reason.to_string(),
    }
}

fn compute_mac(secret: &[u8], body: &[u8]) -> Result<[u8; 32], ClusterError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| codec_error("HMAC key setup failed"))?;
    mac.update(body);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Constant-time verification via `Mac::verify_slice`.
fn verify_mac(secret: &[u8], body: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(tag).is_ok()
}

/// Encode a frame for the wire, sealing it with the secret if present.
pub(crate) fn encode_frame(frame: &Frame, secret: Option<&[u8]>) -> Result<Vec<u8>, ClusterError> {
    let body = serde_json::to_vec(frame).map_err(codec_error)?;
    let mac = match secret {
        Some(secret) => Some(compute_mac(secret, &body)?),
        None => None,
    };
    let payload_len = 1 + mac.map_or(0, |_| 32) + body.len();
    if payload_len as u64 > u64::from(MAX_FRAME_LEN) {
        return Err(codec_error("frame exceeds maximum size"));
    }
    let mut out = Vec::with_capacity(4 + payload_len);
    out.extend_from_slice(&(payload_len as u32).to_be_bytes());
    match mac {
        Some(tag) => {
            out.push(FLAG_MAC);
            out.extend_from_slice(&tag);
        }
        None => out.push(0),
    }
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one frame from raw payload bytes (without the length prefix),
/// enforcing the authentication policy.
pub(crate) fn decode_payload(payload: &[u8], secret: Option<&[u8]>) -> Result<Frame, ClusterError> {
    let (&flags, rest) = payload
        .split_first()
        .ok_or_else(|| codec_error("empty frame"))?;
    let has_mac = flags & FLAG_MAC != 0;
    let (tag, body) = if has_mac {
        if rest.len() < 32 {
            return Err(codec_error("truncated mac"));
        }
        let (tag, body) = rest.split_at(32);
        (Some(tag), body)
    } else {
        (None, rest)
    };

    if let Some(secret) = secret {
        let Some(tag) = tag else {
            return Err(ClusterError::Auth {
                reason: "missing mac on authenticated cluster".into(),
            });
        };
        if !verify_mac(secret, body, tag) {
            return Err(ClusterError::Auth {
                reason: "invalid mac".into(),
            });
        }
    }

    serde_json::from_slice(body).map_err(codec_error)
}

/// Write one frame to the stream.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    secret: Option<&[u8]>,
) -> Result<(), ClusterError> {
    let bytes = encode_frame(frame, secret)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from the stream, enforcing the size cap and the
/// authentication policy.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    secret: Option<&[u8]>,
) -> Result<Frame, ClusterError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(codec_error(format!("invalid frame length {len}")));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    decode_payload(&payload, secret)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame::Handshake {
            node: "alpha@localhost:4369".parse().unwrap(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    #[test]
    fn test_round_trip_without_secret() {
        let bytes = encode_frame(&sample_frame(), None).unwrap();
        let frame = decode_payload(&bytes[4..], None).unwrap();
        assert!(matches!(frame, Frame::Handshake { protocol_version, .. } if protocol_version == PROTOCOL_VERSION));
    }

    #[test]
    fn test_round_trip_with_secret() {
        let secret = b"cluster-secret";
        let bytes = encode_frame(&sample_frame(), Some(secret)).unwrap();
        let frame = decode_payload(&bytes[4..], Some(secret)).unwrap();
        assert!(matches!(frame, Frame::Handshake { .. }));
    }

    #[test]
    fn test_missing_mac_rejected_when_secret_configured() {
        let bytes = encode_frame(&sample_frame(), None).unwrap();
        let err = decode_payload(&bytes[4..], Some(b"secret")).unwrap_err();
        assert!(matches!(err, ClusterError::Auth { .. }));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let bytes = encode_frame(&sample_frame(), Some(b"right")).unwrap();
        let err = decode_payload(&bytes[4..], Some(b"wrong")).unwrap_err();
        assert!(matches!(err, ClusterError::Auth { .. }));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = b"secret";
        let mut bytes = encode_frame(&sample_frame(), Some(secret)).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = decode_payload(&bytes[4..], Some(secret)).unwrap_err();
        assert!(err.is_fatal_for_connection());
    }

    #[test]
    fn test_unauthenticated_cluster_accepts_mac_frames() {
        // A peer sending macs to a secretless node is tolerated.
        let bytes = encode_frame(&sample_frame(), Some(b"secret")).unwrap();
        let frame = decode_payload(&bytes[4..], None).unwrap();
        assert!(matches!(frame, Frame::Handshake { .. }));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &sample_frame(), Some(b"s"))
            .await
            .unwrap();
        let frame = read_frame(&mut server, Some(b"s")).await.unwrap();
        assert!(matches!(frame, Frame::Handshake { .. }));
    }
}
