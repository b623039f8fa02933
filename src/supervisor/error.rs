//! Error types for supervisor operations.

// Layer 1: Standard library imports
use std::error::Error;
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::process::ProcessError;

/// Errors that can occur during supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No child with the given id.
    #[error("child not found: '{id}'")]
    ChildNotFound { id: String },

    /// A child factory failed to produce a running process.
    #[error("failed to start child '{id}': {source}")]
    ChildStartFailed {
        id: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    /// A dynamic child id collides with an existing one.
    #[error("child '{id}' already present")]
    DuplicateChild { id: String },

    /// The restart intensity was exceeded; the supervisor gave up and
    /// terminated. Its parent observes this as an abnormal child exit.
    #[error("max restarts exceeded: {max_restarts} within {within:?}")]
    MaxRestartsExceeded { max_restarts: u32, within: Duration },

    /// The supervisor options are unusable.
    #[error("invalid supervisor configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The supervisor process itself failed to start.
    #[error("supervisor failed to start: {source}")]
    StartFailed {
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    /// Talking to the supervisor process failed (it may be terminating).
    #[error("supervisor call failed: {source}")]
    Call {
        #[source]
        source: ProcessError,
    },

    /// The supervisor process replied with an unexpected shape.
    #[error("unexpected reply from supervisor")]
    InvalidReply,
}

impl SupervisorError {
    /// Returns `true` if this error is fatal for the supervisor itself.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::MaxRestartsExceeded { .. }
                | SupervisorError::InvalidConfiguration { .. }
        )
    }

    /// Map a call-transport error, unwrapping a `SupervisorError` that the
    /// supervisor process raised inside its handler.
    pub(crate) fn from_call(error: ProcessError) -> Self {
        match error {
            ProcessError::CallFailed { source } => match source.downcast::<SupervisorError>() {
                Ok(own) => *own,
                Err(source) => SupervisorError::Call {
                    source: ProcessError::CallFailed { source },
                },
            },
            other => SupervisorError::Call { source: other },
        }
    }
}
