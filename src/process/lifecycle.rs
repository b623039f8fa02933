//! Process lifecycle phases and the runtime-wide lifecycle event bus.

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

// Layer 3: Internal module imports
use super::behavior::ExitReason;
use super::pref::ProcessRef;

/// Capacity of the lifecycle broadcast channel. Slow subscribers lag and
/// lose oldest events rather than blocking the kernel.
const LIFECYCLE_BUS_CAPACITY: usize = 1024;

/// Lifecycle phase of a process record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// `init` is running; the ref is not yet published.
    Starting,

    /// Dispatching messages.
    Running,

    /// A stop was accepted; `terminate` is running.
    Terminating,

    /// Fully terminated; monitors notified, name unregistered.
    Terminated,
}

impl Phase {
    /// Returns `true` while the process dispatches messages.
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Running)
    }
}

/// One lifecycle event, as observed on the runtime-wide bus.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// The process the event is about.
    pub process: ProcessRef,

    /// What happened.
    pub kind: LifecycleEventKind,
}

/// Kinds of lifecycle events.
///
/// The persistence variants are reserved for out-of-core snapshot adapters,
/// which emit them through the same bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// The process started and its ref was published.
    Started,

    /// The process terminated abnormally. Followed by `Terminated`.
    Crashed { error: String },

    /// A supervisor replaced this process after a failure.
    Restarted { attempt: u32 },

    /// The process reached its terminal state.
    Terminated { reason: ExitReason },

    /// A state snapshot was persisted by an external adapter.
    StatePersisted,

    /// State was restored from a snapshot by an external adapter.
    StateRestored,

    /// A persistence adapter failed.
    PersistenceError { error: String },
}

/// Best-effort broadcast bus for lifecycle events. Emission never blocks
/// and never fails the kernel; with no subscribers events are dropped.
#[derive(Debug)]
pub(crate) struct LifecycleBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = broadcast::channel(LIFECYCLE_BUS_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, process: ProcessRef, kind: LifecycleEventKind) {
        let _ = self.tx.send(LifecycleEvent {
            timestamp: Utc::now(),
            process,
            kind,
        });
    }
}
