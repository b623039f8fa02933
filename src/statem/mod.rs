//! State-machine processes: per-state handlers, enter/exit hooks, timers,
//! deferred replies, and a synthetic event queue.

pub mod machine;
pub mod runtime;

pub use machine::{
    Action, Event, EventResult, Init, ReplyToken, StateMachineBehavior, TimeoutKind,
};
pub use runtime::StateMachine;
