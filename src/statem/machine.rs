//! State-machine behavior contract: events, results, and actions.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::process::{BehaviorError, ExitReason, ProcessContext};
use crate::util::CorrelationId;

/// Token identifying a deferred reply slot handed to a handler.
///
/// The kernel retains the slot until a later handler queues a
/// [`Action::Reply`] naming the token, or the machine terminates (the
/// caller then sees `CalleeTerminated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyToken(CorrelationId);

impl ReplyToken {
    pub(crate) fn new() -> Self {
        Self(CorrelationId::new())
    }
}

/// An event delivered to [`StateMachineBehavior::handle_event`].
#[derive(Debug, Clone)]
pub enum Event {
    /// Fire-and-forget event.
    Cast(Value),

    /// Synchronous event; `from` is the deferred reply token. The handler
    /// may reply this turn or hold the token for later.
    Call { request: Value, from: ReplyToken },

    /// A timer fired.
    Timeout(TimeoutKind),
}

/// Which timer fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The machine stayed in its current state too long. Cancelled by any
    /// transition.
    State,

    /// No event arrived in time. Cancelled by any event, synthetic
    /// included.
    Event,

    /// A named timer that survives transitions until it fires or is
    /// cancelled by name.
    Generic(String),
}

/// Actions queued by a handler, processed in order before the next
/// external event is pulled.
#[derive(Debug, Clone)]
pub enum Action {
    /// Satisfy a deferred reply token.
    Reply { to: ReplyToken, value: Value },

    /// Insert a synthetic event ahead of all external events.
    NextEvent(Event),

    /// Arm the state timeout. Any transition cancels it.
    SetStateTimeout(Duration),

    /// Arm the event timeout. Any event (synthetic included) cancels it.
    SetEventTimeout(Duration),

    /// Arm (or re-arm) a named generic timer.
    SetGenericTimeout { name: String, after: Duration },

    /// Cancel a named generic timer.
    CancelGenericTimeout { name: String },
}

/// Initial configuration returned by [`StateMachineBehavior::init`].
#[derive(Debug)]
pub struct Init {
    pub state: String,
    pub actions: Vec<Action>,
}

impl Init {
    /// Start in `state` with no initial actions.
    pub fn state(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }
}

/// Outcome of one event handler invocation.
#[derive(Debug)]
pub enum EventResult {
    /// Stay in the current state. Data changes live in `self` already.
    KeepState { actions: Vec<Action> },

    /// Move to `next`; `on_exit`/`on_enter` run before the next event.
    Transition { next: String, actions: Vec<Action> },

    /// Terminate the machine in an orderly fashion.
    Stop { reason: ExitReason },
}

impl EventResult {
    pub fn keep() -> Self {
        EventResult::KeepState {
            actions: Vec::new(),
        }
    }

    pub fn keep_with(actions: Vec<Action>) -> Self {
        EventResult::KeepState { actions }
    }

    pub fn transition(next: impl Into<String>) -> Self {
        EventResult::Transition {
            next: next.into(),
            actions: Vec::new(),
        }
    }

    pub fn transition_with(next: impl Into<String>, actions: Vec<Action>) -> Self {
        EventResult::Transition {
            next: next.into(),
            actions,
        }
    }

    pub fn stop(reason: ExitReason) -> Self {
        EventResult::Stop { reason }
    }
}

/// A process behavior partitioned by named states.
///
/// Data lives in `self`; the runtime tracks the current state name and
/// drives `on_exit`/`on_enter` exactly once per transition. External
/// events are serialized like any process mailbox; synthetic events queued
/// via [`Action::NextEvent`] drain before the next external event.
#[async_trait]
pub trait StateMachineBehavior: Send + 'static {
    /// Produce the initial state (and optional actions). Failure fails the
    /// start; no machine exists afterwards.
    async fn init(&mut self, args: Value) -> Result<Init, BehaviorError>;

    /// Handle one event in the named state.
    async fn handle_event(
        &mut self,
        state: &str,
        event: Event,
        ctx: &ProcessContext,
    ) -> Result<EventResult, BehaviorError>;

    /// Entering `state`. Runs once per transition, and once for the
    /// initial state.
    async fn on_enter(&mut self, _state: &str) {}

    /// Leaving `state` for `next`. Runs before the matching `on_enter`.
    async fn on_exit(&mut self, _state: &str, _next: &str) {}

    /// Cleanup hook on termination, for any reason.
    async fn terminate(&mut self, _reason: &ExitReason) {}

    /// Behavior tag recorded in the process ref.
    fn name(&self) -> &str {
        "state_machine"
    }
}
