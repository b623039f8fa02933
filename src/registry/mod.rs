//! Runtime-wide name registry: name ↔ process ref.
//!
//! Mutations are atomic with respect to lookups (single-writer discipline
//! via the concurrent map's entry API). The kernel unregisters a name
//! automatically when the owning process terminates, before monitors are
//! notified, so a name can never resolve to a dead process after its
//! `process_down` has been observed.

// Layer 2: Third-party crate imports
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

// Layer 3: Internal module imports
use crate::process::ProcessRef;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The name is already bound to a live process.
    #[error("name '{name}' is already registered")]
    NameTaken { name: String },

    /// `lookup` on an unbound name.
    #[error("no process registered under '{name}'")]
    NotRegistered { name: String },
}

/// Name → ref table.
#[derive(Debug, Default)]
pub struct Registry {
    names: DashMap<String, ProcessRef>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            names: DashMap::new(),
        }
    }

    /// Bind `name` to `pref`. Fails if the name is already bound.
    pub fn register(&self, name: &str, pref: &ProcessRef) -> Result<(), RegistryError> {
        match self.names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::NameTaken {
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(pref.clone());
                Ok(())
            }
        }
    }

    /// Remove a binding. Returns `true` if the name was bound.
    pub fn unregister(&self, name: &str) -> bool {
        self.names.remove(name).is_some()
    }

    /// Remove a binding only if it still points at `pref`. Used by the
    /// kernel on termination so a re-registered name is not clobbered.
    pub(crate) fn unregister_if(&self, name: &str, pref: &ProcessRef) {
        self.names.remove_if(name, |_, bound| bound == pref);
    }

    /// Resolve a name, failing if unbound.
    pub fn lookup(&self, name: &str) -> Result<ProcessRef, RegistryError> {
        self.whereis(name).ok_or_else(|| RegistryError::NotRegistered {
            name: name.to_string(),
        })
    }

    /// Resolve a name, `None` if unbound.
    pub fn whereis(&self, name: &str) -> Option<ProcessRef> {
        self.names.get(name).map(|entry| entry.value().clone())
    }

    /// Whether the name is currently bound.
    pub fn is_registered(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// All currently bound names.
    pub fn names(&self) -> Vec<String> {
        self.names.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of bound names.
    pub fn count(&self) -> usize {
        self.names.len()
    }
}
