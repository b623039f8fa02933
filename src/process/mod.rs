//! Process kernel: behaviors, refs, mailboxes, dispatch, and monitoring.

pub mod behavior;
pub mod context;
pub mod error;
pub mod kernel;
pub mod lifecycle;
pub(crate) mod mailbox;
pub mod monitor;
pub mod pref;

pub use behavior::{Behavior, BehaviorError, ExitReason};
pub use context::ProcessContext;
pub use error::ProcessError;
pub use kernel::{
    ProcessInfo, ProcessRuntime, StartOptions, DEFAULT_CALL_TIMEOUT, DEFAULT_STOP_TIMEOUT,
};
pub use lifecycle::{LifecycleEvent, LifecycleEventKind, Phase};
pub use monitor::DownNotification;
pub use pref::ProcessRef;
