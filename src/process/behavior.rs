//! The `Behavior` trait: user-defined reaction to init / call / cast /
//! terminate, plus the exit-reason vocabulary shared across the runtime.
//!
//! State lives inside the behavior value itself; messages are
//! `serde_json::Value` so the same behavior can be spawned locally or by
//! name on a remote node. The kernel guarantees that at most one handler
//! runs at a time per process, so handlers take `&mut self` without any
//! further synchronization.

// Layer 1: Standard library imports
use std::error::Error;
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use super::context::ProcessContext;

/// Error type produced by user behavior handlers.
pub type BehaviorError = Box<dyn Error + Send + Sync>;

/// Why a process exited.
///
/// `Normal` and `Shutdown` are orderly; everything else is abnormal and
/// makes `Transient` children eligible for restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExitReason {
    /// The process finished its work.
    Normal,

    /// The process was asked to shut down.
    Shutdown,

    /// The process crashed with an error.
    Error(String),

    /// Application-defined exit reason; treated as abnormal.
    Custom(String),
}

impl ExitReason {
    /// Build an error reason from anything printable.
    pub fn error(message: impl Display) -> Self {
        Self::Error(message.to_string())
    }

    /// Returns `true` for any reason other than `Normal` or `Shutdown`.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ExitReason::Normal | ExitReason::Shutdown)
    }

    /// Returns `true` for an orderly shutdown request.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ExitReason::Shutdown)
    }
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Error(detail) => write!(f, "error: {detail}"),
            ExitReason::Custom(detail) => write!(f, "{detail}"),
        }
    }
}

/// User-defined process behavior.
///
/// The four handlers mirror the OTP callbacks:
///
/// - [`init`](Behavior::init) runs before the ref is published; failure
///   fails the start and no process exists afterwards.
/// - [`handle_call`](Behavior::handle_call) produces the reply for a
///   synchronous call. Returning `Err` rejects that call only; the process
///   keeps running and later calls succeed.
/// - [`handle_cast`](Behavior::handle_cast) handles fire-and-forget
///   messages. Errors are logged and swallowed; a cast never kills the
///   process unless the behavior itself escalates via
///   [`ProcessContext::stop_self`].
/// - [`terminate`](Behavior::terminate) runs once on the way down, for any
///   reason.
///
/// Handlers may await freely; the mailbox stays a strict queue across
/// suspension points.
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Initialize the process. Runs before the ref is published.
    async fn init(&mut self, _args: Value, _ctx: &ProcessContext) -> Result<(), BehaviorError> {
        Ok(())
    }

    /// Handle a synchronous call and produce the reply.
    async fn handle_call(
        &mut self,
        request: Value,
        _ctx: &ProcessContext,
    ) -> Result<Value, BehaviorError> {
        Err(format!("unexpected call: {request}").into())
    }

    /// Handle a fire-and-forget message.
    async fn handle_cast(
        &mut self,
        _message: Value,
        _ctx: &ProcessContext,
    ) -> Result<(), BehaviorError> {
        Ok(())
    }

    /// Cleanup hook invoked on any orderly or error shutdown.
    async fn terminate(&mut self, _reason: &ExitReason, _ctx: &ProcessContext) {}

    /// Behavior tag recorded in the process ref, for introspection.
    fn name(&self) -> &str {
        "process"
    }
}
