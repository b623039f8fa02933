//! Supervision: child specs, restart strategies, intensity limits, and
//! ordered startup/shutdown.

pub mod core;
pub mod error;
pub mod types;

pub use core::Supervisor;
pub use error::SupervisorError;
pub use types::{
    AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartIntensity, RestartPolicy, Strategy,
    SupervisorOptions, DEFAULT_CHILD_SHUTDOWN_TIMEOUT,
};
