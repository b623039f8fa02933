//! Process references: the opaque, serializable identity of a process.

// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::cluster::NodeId;
use crate::util::ProcessId;

/// Opaque process identity.
///
/// A ref carries the process id, the node it lives on, and the behavior tag
/// for introspection. Equality and hashing consider `(id, node)` only; the
/// behavior tag is informational. Refs serialize freely and remain valid as
/// routing keys on any node.
///
/// A `node` of `None` identifies a process on this runtime that was started
/// before a node identity was installed; such refs are local-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRef {
    id: ProcessId,
    node: Option<NodeId>,
    behavior: String,
}

impl ProcessRef {
    pub(crate) fn new(id: ProcessId, node: Option<NodeId>, behavior: impl Into<String>) -> Self {
        Self {
            id,
            node,
            behavior: behavior.into(),
        }
    }

    /// The unique process id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// The node this process lives on, if a node identity was installed
    /// when it started.
    pub fn node(&self) -> Option<&NodeId> {
        self.node.as_ref()
    }

    /// The behavior tag, for introspection only.
    pub fn behavior(&self) -> &str {
        &self.behavior
    }

    /// Whether this ref addresses a process on the runtime identified by
    /// `local` (an unstamped ref is always local).
    pub fn is_local_to(&self, local: Option<&NodeId>) -> bool {
        match (&self.node, local) {
            (None, _) => true,
            (Some(n), Some(l)) => n == l,
            (Some(_), None) => false,
        }
    }
}

impl PartialEq for ProcessRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.node == other.node
    }
}

impl Eq for ProcessRef {}

impl Hash for ProcessRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.node.hash(state);
    }
}

impl Display for ProcessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{}<{}>@{}", self.behavior, self.id, node),
            None => write!(f, "{}<{}>@local", self.behavior, self.id),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn node(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    #[test]
    fn test_equality_ignores_behavior_tag() {
        let id = ProcessId::new();
        let a = ProcessRef::new(id, None, "counter");
        let b = ProcessRef::new(id, None, "renamed");
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_considers_node() {
        let id = ProcessId::new();
        let a = ProcessRef::new(id, Some(node("n1@host:1")), "w");
        let b = ProcessRef::new(id, Some(node("n2@host:1")), "w");
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_local_to() {
        let id = ProcessId::new();
        let n1 = node("n1@host:1");
        let n2 = node("n2@host:1");

        let unstamped = ProcessRef::new(id, None, "w");
        assert!(unstamped.is_local_to(None));
        assert!(unstamped.is_local_to(Some(&n1)));

        let stamped = ProcessRef::new(id, Some(n1.clone()), "w");
        assert!(stamped.is_local_to(Some(&n1)));
        assert!(!stamped.is_local_to(Some(&n2)));
        assert!(!stamped.is_local_to(None));
    }

    #[test]
    fn test_serde_round_trip() {
        let pref = ProcessRef::new(ProcessId::new(), Some(node("n1@host:1")), "worker");
        let json = serde_json::to_string(&pref).unwrap();
        let back: ProcessRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pref);
        assert_eq!(back.behavior(), "worker");
    }

    #[test]
    fn test_display_contains_behavior_and_node() {
        let pref = ProcessRef::new(ProcessId::new(), Some(node("n1@host:1")), "worker");
        let rendered = pref.to_string();
        assert!(rendered.starts_with("worker<"));
        assert!(rendered.ends_with("@n1@host:1"));
    }
}
