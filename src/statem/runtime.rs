//! The state-machine driver and its public handle.
//!
//! A state machine is a real kernel process: it has a ref, can be named,
//! monitored, called, and routed to transparently. The driver replaces the
//! generic dispatch loop with one that tracks the current state, a
//! synthetic event queue, three timer kinds, and deferred reply tokens.

// Layer 1: Standard library imports
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep_until, Instant};

// Layer 3: Internal module imports
use super::machine::{Action, Event, EventResult, Init, ReplyToken, StateMachineBehavior, TimeoutKind};
use crate::process::kernel::ProcessEntry;
use crate::process::mailbox::{Envelope, MailboxReceiver};
use crate::process::{
    ExitReason, ProcessContext, ProcessError, ProcessRef, ProcessRuntime, StartOptions,
    DEFAULT_CALL_TIMEOUT,
};

/// Active timers of one machine.
#[derive(Default)]
struct Timers {
    state: Option<Instant>,
    event: Option<Instant>,
    generic: HashMap<String, Instant>,
}

impl Timers {
    /// The earliest pending deadline, if any.
    fn next_deadline(&self) -> Option<Instant> {
        let mut earliest = None;
        for candidate in self
            .state
            .iter()
            .chain(self.event.iter())
            .chain(self.generic.values())
        {
            earliest = match earliest {
                None => Some(*candidate),
                Some(current) if *candidate < current => Some(*candidate),
                keep => keep,
            };
        }
        earliest
    }

    /// Pop one due timer, clearing it. State takes precedence over event,
    /// event over generic; generic ties break by name for determinism.
    fn fire_due(&mut self) -> Option<TimeoutKind> {
        let now = Instant::now();
        if self.state.is_some_and(|at| at <= now) {
            self.state = None;
            return Some(TimeoutKind::State);
        }
        if self.event.is_some_and(|at| at <= now) {
            self.event = None;
            return Some(TimeoutKind::Event);
        }
        let mut due: Vec<&String> = self
            .generic
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(name, _)| name)
            .collect();
        due.sort();
        if let Some(name) = due.first() {
            let name = (*name).clone();
            self.generic.remove(&name);
            return Some(TimeoutKind::Generic(name));
        }
        None
    }
}

type PendingReplies = HashMap<ReplyToken, oneshot::Sender<Result<Value, ProcessError>>>;

fn apply_actions(
    actions: Vec<Action>,
    queue: &mut VecDeque<Event>,
    timers: &mut Timers,
    pending: &mut PendingReplies,
) {
    for action in actions {
        match action {
            Action::Reply { to, value } => match pending.remove(&to) {
                Some(reply) => {
                    let _ = reply.send(Ok(value));
                }
                None => {
                    tracing::debug!("reply action for unknown or already-used token");
                }
            },
            Action::NextEvent(event) => queue.push_back(event),
            Action::SetStateTimeout(after) => timers.state = Some(Instant::now() + after),
            Action::SetEventTimeout(after) => timers.event = Some(Instant::now() + after),
            Action::SetGenericTimeout { name, after } => {
                timers.generic.insert(name, Instant::now() + after);
            }
            Action::CancelGenericTimeout { name } => {
                timers.generic.remove(&name);
            }
        }
    }
}

enum Step {
    Inbound(Option<Envelope>),
    Timer,
}

#[allow(clippy::too_many_lines)]
async fn run_state_machine(
    runtime: ProcessRuntime,
    entry: Arc<ProcessEntry>,
    mut behavior: Box<dyn StateMachineBehavior>,
    ctx: ProcessContext,
    mut receiver: MailboxReceiver,
    init: Init,
    state_tx: watch::Sender<String>,
) {
    let mut current = init.state;
    let mut queue: VecDeque<Event> = VecDeque::new();
    let mut timers = Timers::default();
    let mut pending: PendingReplies = HashMap::new();

    // Enter-side effects are uniform: the initial state is entered too.
    behavior.on_enter(&current).await;
    apply_actions(init.actions, &mut queue, &mut timers, &mut pending);

    let (reason, ack) = 'main: loop {
        // Synthetic events drain before the next external event.
        let event = if let Some(event) = queue.pop_front() {
            event
        } else {
            let deadline = timers.next_deadline();
            let sleep_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
            let step = tokio::select! {
                inbound = receiver.recv() => Step::Inbound(inbound),
                _ = sleep_until(sleep_at), if deadline.is_some() => Step::Timer,
            };
            match step {
                Step::Inbound(None) => break 'main (ExitReason::Normal, None),
                Step::Inbound(Some(Envelope::Stop { reason, done })) => {
                    runtime.mark_terminating(&entry);
                    break 'main (reason, done);
                }
                Step::Inbound(Some(Envelope::Call { request, reply })) => {
                    let token = ReplyToken::new();
                    pending.insert(token, reply);
                    Event::Call {
                        request,
                        from: token,
                    }
                }
                Step::Inbound(Some(Envelope::Cast { message })) => Event::Cast(message),
                Step::Timer => match timers.fire_due() {
                    Some(kind) => Event::Timeout(kind),
                    None => continue,
                },
            }
        };

        // Any event, synthetic included, cancels the event timeout.
        timers.event = None;

        let call_token = match &event {
            Event::Call { from, .. } => Some(*from),
            _ => None,
        };
        let outcome = behavior.handle_event(&current, event, &ctx).await;
        runtime.record_dispatch(&entry);
        match outcome {
            Err(error) => match call_token.and_then(|token| pending.remove(&token)) {
                Some(reply) => {
                    let _ = reply.send(Err(ProcessError::CallFailed { source: error }));
                }
                None => {
                    tracing::warn!(
                        process = %ctx.process_ref(),
                        state = %current,
                        %error,
                        "event handler failed; machine continues"
                    );
                }
            },
            Ok(EventResult::KeepState { actions }) => {
                apply_actions(actions, &mut queue, &mut timers, &mut pending);
            }
            Ok(EventResult::Transition { next, actions }) => {
                if next != current {
                    // One on_exit/on_enter pair per transition; the state
                    // timeout does not survive it.
                    timers.state = None;
                    behavior.on_exit(&current, &next).await;
                    behavior.on_enter(&next).await;
                    current = next;
                    let _ = state_tx.send(current.clone());
                }
                apply_actions(actions, &mut queue, &mut timers, &mut pending);
            }
            Ok(EventResult::Stop { reason }) => {
                runtime.mark_terminating(&entry);
                break 'main (reason, None);
            }
        }
    };

    behavior.terminate(&reason).await;

    // Deferred callers and everything still queued see the final reason.
    for (_token, reply) in pending.drain() {
        let _ = reply.send(Err(ProcessError::CalleeTerminated {
            reason: reason.clone(),
        }));
    }
    receiver.close();
    while let Ok(envelope) = receiver.try_recv() {
        match envelope {
            Envelope::Call { reply, .. } => {
                let _ = reply.send(Err(ProcessError::CalleeTerminated {
                    reason: reason.clone(),
                }));
            }
            Envelope::Stop {
                done: Some(done), ..
            } => {
                let _ = done.send(());
            }
            _ => {}
        }
    }
    runtime.finalize(&entry, reason);
    if let Some(done) = ack {
        let _ = done.send(());
    }
}

/// Handle to a running state machine.
pub struct StateMachine {
    pref: ProcessRef,
    runtime: ProcessRuntime,
    state_rx: watch::Receiver<String>,
}

impl StateMachine {
    /// Start a state machine process: run `init`, publish the ref, enter
    /// the initial state, and begin dispatching.
    pub async fn start(
        runtime: &ProcessRuntime,
        mut behavior: Box<dyn StateMachineBehavior>,
        opts: StartOptions,
    ) -> Result<Self, ProcessError> {
        let (pref, sender, receiver, ctx) = runtime.allocate(behavior.name());
        let StartOptions {
            name,
            args,
            init_timeout,
        } = opts;

        let init_result = match init_timeout {
            Some(limit) => match tokio::time::timeout(limit, behavior.init(args)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ProcessError::InitTimeout {
                        behavior: pref.behavior().to_string(),
                        timeout: limit,
                    })
                }
            },
            None => behavior.init(args).await,
        };
        let init = init_result.map_err(|source| ProcessError::InitFailed {
            behavior: pref.behavior().to_string(),
            source,
        })?;

        let entry = runtime.commit(&pref, name.as_deref(), &sender)?;
        let (state_tx, state_rx) = watch::channel(init.state.clone());
        let rt = runtime.clone();
        let loop_entry = Arc::clone(&entry);
        let task = tokio::spawn(run_state_machine(
            rt, loop_entry, behavior, ctx, receiver, init, state_tx,
        ));
        runtime.attach_task(&entry, task);

        Ok(Self {
            pref,
            runtime: runtime.clone(),
            state_rx,
        })
    }

    /// The machine's process ref.
    pub fn process_ref(&self) -> &ProcessRef {
        &self.pref
    }

    /// Synchronous event with the default call timeout. The handler may
    /// reply immediately or hold the token and reply from a later event.
    pub async fn call(&self, request: Value) -> Result<Value, ProcessError> {
        self.runtime
            .call_with_timeout(&self.pref, request, DEFAULT_CALL_TIMEOUT)
            .await
    }

    /// Synchronous event with an explicit deadline for the (possibly
    /// deferred) reply.
    pub async fn call_with_reply(
        &self,
        request: Value,
        timeout: Duration,
    ) -> Result<Value, ProcessError> {
        self.runtime
            .call_with_timeout(&self.pref, request, timeout)
            .await
    }

    /// Fire-and-forget event.
    pub fn cast(&self, message: Value) {
        self.runtime.cast(&self.pref, message);
    }

    /// Name of the state the machine is currently in.
    pub fn current_state(&self) -> String {
        self.state_rx.borrow().clone()
    }

    /// Stop the machine with reason `Shutdown`.
    pub async fn stop(&self) {
        self.runtime.stop(&self.pref).await;
    }

    /// Stop the machine with an explicit reason and grace period.
    pub async fn stop_with(&self, reason: ExitReason, timeout: Duration) {
        self.runtime.stop_with(&self.pref, reason, timeout).await;
    }
}
