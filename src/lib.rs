//! # plexus - Erlang-Style Process Runtime
//!
//! An in-process actor runtime for building fault-tolerant stateful
//! services in the OTP tradition: isolated processes with serialized
//! mailboxes, hierarchical supervisors that restart children on failure,
//! and a peer-to-peer clustering layer that extends both across nodes.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use plexus::prelude::*;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct Counter {
//!     n: i64,
//! }
//!
//! #[async_trait]
//! impl Behavior for Counter {
//!     async fn handle_call(
//!         &mut self,
//!         request: Value,
//!         _ctx: &ProcessContext,
//!     ) -> Result<Value, BehaviorError> {
//!         Ok(json!(self.n))
//!     }
//!
//!     async fn handle_cast(
//!         &mut self,
//!         _message: Value,
//!         _ctx: &ProcessContext,
//!     ) -> Result<(), BehaviorError> {
//!         self.n += 1;
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &str {
//!         "counter"
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rt = ProcessRuntime::new();
//!     let counter = rt.start(Box::new(Counter { n: 0 }), StartOptions::new()).await?;
//!
//!     rt.cast(&counter, json!("inc"));
//!     let n = rt.call(&counter, json!("get")).await?;
//!     assert_eq!(n, json!(1));
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`process`] - Process kernel: behaviors, refs, mailboxes, dispatch,
//!   monitors, lifecycle events
//! - [`registry`] - Named-process lookup with auto-unregister on death
//! - [`events`] - Topic pub/sub with segment wildcards
//! - [`statem`] - State-machine processes: per-state handlers, enter/exit
//!   hooks, timers, deferred replies
//!
//! ## Fault Tolerance
//! - [`supervisor`] - Child specs, restart strategies, restart intensity,
//!   ordered startup/shutdown
//!
//! ## Distribution
//! - [`cluster`] - Node identity, HMAC-authenticated transport,
//!   heartbeats, gossip discovery, failure detection
//! - [`dist`] - Behavior registry, transparent call/cast routing, remote
//!   spawn, global name registry, distributed supervisor
//!
//! # Design Principles
//!
//! - **Isolation is the invariant**: process state is touched only by its
//!   own dispatch loop; everything else goes through refs and messages.
//! - **Failures are data**: handler errors reject the offending call and
//!   leave the process alive; death is explicit (`stop_self` with an
//!   error) and supervisors decide what happens next.
//! - **Names are identity on the wire**: the cluster carries behavior
//!   names and serialized refs; implementations never cross nodes.

pub mod cluster;
pub mod dist;
pub mod events;
pub mod prelude;
pub mod process;
pub mod registry;
pub mod statem;
pub mod supervisor;
pub mod util;

// Re-export commonly used types
pub use cluster::{Cluster, ClusterConfig, ClusterError, ClusterEvent, NodeId, NodeInfo};
pub use dist::{
    BehaviorRegistry, DistError, DistributedSupervisor, GlobalRegistry, Node, NodeSelector,
    RemoteStartOptions,
};
pub use events::EventBus;
pub use process::{
    Behavior, BehaviorError, ExitReason, LifecycleEvent, LifecycleEventKind, ProcessContext,
    ProcessError, ProcessRef, ProcessRuntime, StartOptions,
};
pub use registry::{Registry, RegistryError};
pub use statem::{StateMachine, StateMachineBehavior};
pub use supervisor::{
    ChildSpec, RestartIntensity, RestartPolicy, Strategy, Supervisor, SupervisorError,
    SupervisorOptions,
};
