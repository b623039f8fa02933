//! Execution context handed to behavior handlers.

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use super::behavior::ExitReason;
use super::kernel::ProcessRuntime;
use super::mailbox::{Envelope, MailboxSender};
use super::pref::ProcessRef;

/// Context available to a behavior while one of its handlers runs.
///
/// The context is the only sanctioned way for a handler to reach its own
/// process: `cast_self` and `stop_self` enqueue into the mailbox, so the
/// message is dispatched only after the current handler returns — a handler
/// can never re-enter itself.
pub struct ProcessContext {
    pref: ProcessRef,
    sender: MailboxSender,
    runtime: ProcessRuntime,
}

impl ProcessContext {
    pub(crate) fn new(pref: ProcessRef, sender: MailboxSender, runtime: ProcessRuntime) -> Self {
        Self {
            pref,
            sender,
            runtime,
        }
    }

    /// The ref of the process this handler runs in.
    pub fn process_ref(&self) -> &ProcessRef {
        &self.pref
    }

    /// Handle to the owning runtime, for starting, calling, or monitoring
    /// other processes from inside a handler.
    pub fn runtime(&self) -> &ProcessRuntime {
        &self.runtime
    }

    /// Enqueue a cast to this process's own mailbox. Dispatched after the
    /// current handler completes.
    pub fn cast_self(&self, message: Value) {
        let _ = self.sender.send(Envelope::Cast { message });
    }

    /// Request termination of this process with the given reason. This is
    /// the deliberate crash path: an `Error` reason emits a `crashed`
    /// lifecycle event and notifies monitors and the parent supervisor.
    ///
    /// The stop is processed after the current handler returns; any
    /// messages already queued ahead of it are rejected during drain.
    pub fn stop_self(&self, reason: ExitReason) {
        let _ = self.sender.send(Envelope::Stop { reason, done: None });
    }
}
