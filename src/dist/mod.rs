//! Distribution: behavior-name registry, location-transparent routing,
//! global name registry, and the distributed supervisor.

pub mod behaviors;
pub mod error;
pub mod global;
pub mod router;
pub mod supervisor;

pub use behaviors::{BehaviorFactory, BehaviorRegistry};
pub use error::DistError;
pub use global::{GlobalEntry, GlobalRegistry, GlobalRegistryEvent};
pub use router::{Node, RemoteStartOptions, DEFAULT_REMOTE_INIT_TIMEOUT, DEFAULT_SPAWN_TIMEOUT};
pub use supervisor::{
    DistChildInfo, DistChildSpec, DistChildTemplate, DistSupervisorEvent, DistSupervisorOptions,
    DistSupervisorStats, DistributedSupervisor, NodeSelector,
};
