//! Shared utilities: identifier newtypes.

pub mod ids;

pub use ids::{CorrelationId, ProcessId};
