//! Type definitions for the supervisor: restart policies, strategies,
//! child specifications, and restart intensity.

// Layer 1: Standard library imports
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::process::{ExitReason, ProcessError, ProcessRef};

/// Default grace period when stopping a child.
pub const DEFAULT_CHILD_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Restart policy for supervised children.
///
/// Based on Erlang/OTP supervisor restart policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Always restart the child, regardless of exit reason.
    Permanent,

    /// Restart only if the child exits abnormally.
    Transient,

    /// Never restart the child. Temporary children are dropped from the
    /// supervisor once they terminate, for any reason.
    Temporary,
}

impl RestartPolicy {
    /// Whether a child with this policy should be restarted after exiting
    /// with `reason`.
    pub fn should_restart(&self, reason: &ExitReason) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => reason.is_abnormal(),
            RestartPolicy::Temporary => false,
        }
    }
}

/// Which siblings restart when a child exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Restart only the exited child.
    OneForOne,

    /// Stop all other live children (reverse start order), then start all
    /// children in declared order.
    OneForAll,

    /// Stop the children started after the exited one (reverse order),
    /// then restart the exited child and those followers in order.
    RestForOne,

    /// Dynamic children from a single template; peers are unaffected.
    SimpleOneForOne,
}

/// Automatic supervisor shutdown when significant children terminate
/// without restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoShutdown {
    /// Never shut down automatically.
    Never,

    /// Shut down when any significant child terminates without restart.
    AnySignificant,

    /// Shut down when the last live significant child terminates without
    /// restart.
    AllSignificant,
}

/// Sliding-window cap on restart frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartIntensity {
    /// Maximum restarts tolerated within the window.
    pub max_restarts: u32,

    /// Window length.
    pub within: Duration,
}

impl Default for RestartIntensity {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            within: Duration::from_secs(5),
        }
    }
}

impl RestartIntensity {
    pub fn new(max_restarts: u32, within: Duration) -> Self {
        Self {
            max_restarts,
            within,
        }
    }
}

/// Boxed future produced by a child start factory.
pub type StartFuture = BoxFuture<'static, Result<ProcessRef, ProcessError>>;

/// Factory producing a fresh child process.
pub type StartFn = Arc<dyn Fn() -> StartFuture + Send + Sync>;

/// Factory producing a fresh child process from per-start arguments
/// (`simple_one_for_one` template).
pub type TemplateFn = Arc<dyn Fn(Value) -> StartFuture + Send + Sync>;

/// Specification of one static (or dynamically appended) child.
#[derive(Clone)]
pub struct ChildSpec {
    /// Unique child id within the supervisor.
    pub id: String,

    /// Start factory; invoked for the initial start and every restart.
    pub(crate) start: StartFn,

    /// When to restart this child.
    pub restart: RestartPolicy,

    /// Grace period when stopping this child.
    pub shutdown_timeout: Duration,

    /// Whether this child participates in auto-shutdown accounting.
    pub significant: bool,
}

impl ChildSpec {
    /// Create a spec with defaults: permanent restart, 5 s shutdown grace,
    /// not significant.
    pub fn new<F, Fut>(id: impl Into<String>, start: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProcessRef, ProcessError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            start: Arc::new(move || Box::pin(start())),
            restart: RestartPolicy::Permanent,
            shutdown_timeout: DEFAULT_CHILD_SHUTDOWN_TIMEOUT,
            significant: false,
        }
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn significant(mut self, significant: bool) -> Self {
        self.significant = significant;
        self
    }

    pub(crate) fn start_child(&self) -> StartFuture {
        (self.start)()
    }
}

impl fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("id", &self.id)
            .field("restart", &self.restart)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("significant", &self.significant)
            .finish()
    }
}

/// Template for `simple_one_for_one` dynamic children.
#[derive(Clone)]
pub struct ChildTemplate {
    /// Prefix for generated child ids (`prefix-1`, `prefix-2`, …).
    pub id_prefix: String,

    pub(crate) start: TemplateFn,
    pub restart: RestartPolicy,
    pub shutdown_timeout: Duration,
    pub significant: bool,
}

impl ChildTemplate {
    pub fn new<F, Fut>(id_prefix: impl Into<String>, start: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProcessRef, ProcessError>> + Send + 'static,
    {
        Self {
            id_prefix: id_prefix.into(),
            start: Arc::new(move |args| Box::pin(start(args))),
            restart: RestartPolicy::Permanent,
            shutdown_timeout: DEFAULT_CHILD_SHUTDOWN_TIMEOUT,
            significant: false,
        }
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub(crate) fn start_child(&self, args: Value) -> StartFuture {
        (self.start)(args)
    }
}

impl fmt::Debug for ChildTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildTemplate")
            .field("id_prefix", &self.id_prefix)
            .field("restart", &self.restart)
            .finish()
    }
}

/// Options for starting a supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub strategy: Strategy,
    pub children: Vec<ChildSpec>,
    pub child_template: Option<ChildTemplate>,
    pub intensity: RestartIntensity,
    pub auto_shutdown: AutoShutdown,
    pub name: Option<String>,
}

impl SupervisorOptions {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            children: Vec::new(),
            child_template: None,
            intensity: RestartIntensity::default(),
            auto_shutdown: AutoShutdown::Never,
            name: None,
        }
    }

    pub fn child(mut self, spec: ChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    pub fn template(mut self, template: ChildTemplate) -> Self {
        self.child_template = Some(template);
        self
    }

    pub fn intensity(mut self, intensity: RestartIntensity) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn auto_shutdown(mut self, auto_shutdown: AutoShutdown) -> Self {
        self.auto_shutdown = auto_shutdown;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Snapshot of one supervised child, as returned by `get_children`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildInfo {
    pub id: String,
    pub process: Option<ProcessRef>,
    pub restart: RestartPolicy,
    pub significant: bool,
    pub restart_count: u32,
    pub running: bool,
}
