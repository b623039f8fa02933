//! Node-local behavior registry for remote spawn.
//!
//! The cluster wire carries behavior *names* only; implementations never
//! cross nodes. Every node that should be able to host a behavior must
//! register the same name before the cluster starts. The registry is not
//! gossiped.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use crate::process::Behavior;

/// Factory producing a fresh behavior instance per spawn.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn Behavior> + Send + Sync>;

/// Name → behavior-factory table.
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    factories: Arc<DashMap<String, BehaviorFactory>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`. Re-registering replaces the
    /// previous factory.
    pub fn register<B, F>(&self, name: impl Into<String>, factory: F)
    where
        B: Behavior,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.factories.insert(
            name.into(),
            Arc::new(move || Box::new(factory()) as Box<dyn Behavior>),
        );
    }

    /// Whether a factory is registered under `name`.
    pub fn has(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// The factory registered under `name`.
    pub fn get(&self, name: &str) -> Option<BehaviorFactory> {
        self.factories.get(name).map(|f| Arc::clone(f.value()))
    }

    /// Instantiate a fresh behavior from the named factory.
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn Behavior>> {
        self.get(name).map(|factory| factory())
    }

    /// All registered behavior names.
    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|f| f.key().clone()).collect()
    }

    /// Number of registered behaviors.
    pub fn count(&self) -> usize {
        self.factories.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Echo;

    impl Behavior for Echo {
        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_register_and_instantiate() {
        let registry = BehaviorRegistry::new();
        registry.register("echo", Echo::default);

        assert!(registry.has("echo"));
        assert_eq!(registry.count(), 1);
        let instance = registry.instantiate("echo").unwrap();
        assert_eq!(instance.name(), "echo");
    }

    #[test]
    fn test_unknown_name() {
        let registry = BehaviorRegistry::new();
        assert!(!registry.has("ghost"));
        assert!(registry.get("ghost").is_none());
        assert!(registry.instantiate("ghost").is_none());
    }

    #[test]
    fn test_names_listing() {
        let registry = BehaviorRegistry::new();
        registry.register("a", Echo::default);
        registry.register("b", Echo::default);
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
