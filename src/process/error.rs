//! Error types for process kernel operations.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use super::behavior::{BehaviorError, ExitReason};
use super::pref::ProcessRef;

/// Errors that can occur when starting or interacting with a process.
///
/// The taxonomy keeps the three user-visible failure modes disjoint: a call
/// that fails (`CallFailed`) leaves the callee running, a call that times
/// out (`CallTimeout`) leaves the callee untouched, and a callee that dies
/// before replying surfaces its final reason (`CalleeTerminated`).
#[derive(Debug, Error)]
pub enum ProcessError {
    /// `init` returned an error; no ref was published.
    #[error("init failed for behavior '{behavior}': {source}")]
    InitFailed {
        behavior: String,
        #[source]
        source: BehaviorError,
    },

    /// `init` did not complete within the allowed time.
    #[error("init for behavior '{behavior}' timed out after {timeout:?}")]
    InitTimeout { behavior: String, timeout: Duration },

    /// The caller's deadline elapsed before a reply arrived. The callee is
    /// unaffected; its eventual reply is dropped.
    #[error("call timed out after {timeout:?}")]
    CallTimeout { timeout: Duration },

    /// The callee terminated before replying.
    #[error("callee terminated before replying ({reason})")]
    CalleeTerminated { reason: ExitReason },

    /// The call handler returned an error. The process keeps running.
    #[error("call handler failed: {source}")]
    CallFailed {
        #[source]
        source: BehaviorError,
    },

    /// No process exists for the given ref.
    #[error("no such process: {pref}")]
    NotFound { pref: ProcessRef },

    /// The requested registered name is already bound.
    #[error("name '{name}' is already registered")]
    NameTaken { name: String },
}

impl ProcessError {
    /// Returns `true` for the caller-deadline case.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProcessError::CallTimeout { .. } | ProcessError::InitTimeout { .. }
        )
    }

    /// Returns the callee's final exit reason, when the error carries one.
    pub fn exit_reason(&self) -> Option<&ExitReason> {
        match self {
            ProcessError::CalleeTerminated { reason } => Some(reason),
            _ => None,
        }
    }

    /// Returns `true` if the target process no longer exists.
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            ProcessError::NotFound { .. } | ProcessError::CalleeTerminated { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_predicate() {
        let err = ProcessError::CallTimeout {
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert!(!err.is_gone());
    }

    #[test]
    fn test_exit_reason_accessor() {
        let err = ProcessError::CalleeTerminated {
            reason: ExitReason::error("boom"),
        };
        assert_eq!(err.exit_reason(), Some(&ExitReason::error("boom")));
        assert!(err.is_gone());
    }

    #[test]
    fn test_call_failed_carries_source() {
        use std::error::Error as _;
        let err = ProcessError::CallFailed {
            source: "handler exploded".into(),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("handler exploded"));
    }
}
