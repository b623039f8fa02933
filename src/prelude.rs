//! Convenient re-exports of the user-facing surface.

pub use crate::cluster::{
    Cluster, ClusterConfig, ClusterError, ClusterEvent, ClusterStatus, DownReason, NodeId,
    NodeInfo, NodeStatus, Registration,
};
pub use crate::dist::{
    BehaviorRegistry, DistChildSpec, DistChildTemplate, DistError, DistSupervisorEvent,
    DistSupervisorOptions, DistributedSupervisor, GlobalEntry, GlobalRegistry,
    GlobalRegistryEvent, Node, NodeSelector, RemoteStartOptions,
};
pub use crate::events::{EventBus, Subscription, TopicPattern};
pub use crate::process::{
    Behavior, BehaviorError, DownNotification, ExitReason, LifecycleEvent, LifecycleEventKind,
    Phase, ProcessContext, ProcessError, ProcessInfo, ProcessRef, ProcessRuntime, StartOptions,
};
pub use crate::registry::{Registry, RegistryError};
pub use crate::statem::{
    Action, Event, EventResult, Init, ReplyToken, StateMachine, StateMachineBehavior, TimeoutKind,
};
pub use crate::supervisor::{
    AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartIntensity, RestartPolicy, Strategy,
    Supervisor, SupervisorError, SupervisorOptions,
};
pub use crate::util::{CorrelationId, ProcessId};
