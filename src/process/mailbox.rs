//! Per-process mailbox: a FIFO of pending messages with reply correlation.
//!
//! The mailbox is an unbounded tokio channel; message kinds mirror the
//! dispatch contract (call with a reply slot, cast, system stop).

// Layer 2: Third-party crate imports
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

// Layer 3: Internal module imports
use super::behavior::ExitReason;
use super::error::ProcessError;

/// One pending message in a process mailbox.
#[derive(Debug)]
pub(crate) enum Envelope {
    /// Synchronous call; the handler's outcome is delivered through `reply`.
    Call {
        request: Value,
        reply: oneshot::Sender<Result<Value, ProcessError>>,
    },

    /// Fire-and-forget message.
    Cast { message: Value },

    /// System shutdown request. The current in-flight message finishes
    /// first; `done` is acknowledged after termination completes.
    Stop {
        reason: ExitReason,
        done: Option<oneshot::Sender<()>>,
    },
}

pub(crate) type MailboxSender = mpsc::UnboundedSender<Envelope>;
pub(crate) type MailboxReceiver = mpsc::UnboundedReceiver<Envelope>;

/// Create a fresh mailbox pair.
pub(crate) fn mailbox() -> (MailboxSender, MailboxReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mailbox_preserves_fifo_order() {
        let (tx, mut rx) = mailbox();
        for i in 0..5 {
            tx.send(Envelope::Cast {
                message: json!(i),
            })
            .unwrap();
        }
        for i in 0..5 {
            match rx.recv().await.unwrap() {
                Envelope::Cast { message } => assert_eq!(message, json!(i)),
                other => panic!("unexpected envelope: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_call_reply_slot_round_trip() {
        let (tx, mut rx) = mailbox();
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Envelope::Call {
            request: json!("ping"),
            reply: reply_tx,
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            Envelope::Call { reply, .. } => reply.send(Ok(json!("pong"))).unwrap(),
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert_eq!(reply_rx.await.unwrap().unwrap(), json!("pong"));
    }
}
