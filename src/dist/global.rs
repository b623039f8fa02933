//! Cluster-wide name registry, eventually consistent.
//!
//! Every node holds a complete replica; lookups never touch the network.
//! Writes are broadcast eagerly and additionally piggyback on every
//! heartbeat, so replicas converge even across lost frames. Concurrent
//! registrations of the same name are resolved deterministically: the
//! earlier `registered_at` wins, then the higher priority, then the
//! lexicographically lesser owner node. The losing owner unregisters and
//! emits a `ConflictResolved` event.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// Layer 3: Internal module imports
use super::error::DistError;
use crate::cluster::frame::Frame;
use crate::cluster::NodeId;
use crate::process::ProcessRef;

/// Capacity of the registry event channel.
const EVENT_BUS_CAPACITY: usize = 256;

/// One replicated registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntry {
    pub name: String,
    pub process: ProcessRef,
    pub registered_at: DateTime<Utc>,
    pub priority: Option<i32>,
    pub owner: NodeId,
}

impl GlobalEntry {
    /// Deterministic conflict resolution: earlier registration wins, then
    /// higher priority, then lesser owner id.
    pub(crate) fn beats(&self, other: &GlobalEntry) -> bool {
        if self.registered_at != other.registered_at {
            return self.registered_at < other.registered_at;
        }
        let mine = self.priority.unwrap_or(0);
        let theirs = other.priority.unwrap_or(0);
        if mine != theirs {
            return mine > theirs;
        }
        self.owner < other.owner
    }
}

/// Events observable on the global registry.
#[derive(Debug, Clone)]
pub enum GlobalRegistryEvent {
    /// A name became bound (locally or learned from a peer).
    Registered(GlobalEntry),

    /// A name became unbound.
    Unregistered { name: String },

    /// A concurrent registration was resolved against an entry owned by
    /// this node.
    ConflictResolved {
        name: String,
        winner: GlobalEntry,
        loser: GlobalEntry,
    },

    /// A node went down and its entries were purged.
    NodeLost { node: NodeId, names: Vec<String> },

    /// A gossip merge added previously unknown entries.
    Synced { added: usize },
}

/// The replicated registry. Shared via `Arc`; the cluster layer merges
/// gossip into it and purges entries of lost nodes.
pub struct GlobalRegistry {
    entries: DashMap<String, GlobalEntry>,
    events: broadcast::Sender<GlobalRegistryEvent>,
    local_node: RwLock<Option<NodeId>>,
    /// Installed when the cluster starts; eagerly broadcasts writes.
    broadcaster: RwLock<Option<Arc<dyn Fn(Frame) + Send + Sync>>>,
}

impl Default for GlobalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            entries: DashMap::new(),
            events,
            local_node: RwLock::new(None),
            broadcaster: RwLock::new(None),
        }
    }

    /// Subscribe to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<GlobalRegistryEvent> {
        self.events.subscribe()
    }

    pub(crate) fn set_local_node(&self, node: NodeId) {
        *self.local_node.write() = Some(node);
    }

    pub(crate) fn attach_broadcaster(&self, broadcaster: Arc<dyn Fn(Frame) + Send + Sync>) {
        *self.broadcaster.write() = Some(broadcaster);
    }

    fn broadcast(&self, frame: Frame) {
        let broadcaster = self.broadcaster.read().clone();
        if let Some(broadcaster) = broadcaster {
            broadcaster(frame);
        }
    }

    /// Register `name` cluster-wide, owned by this node.
    ///
    /// Fails if the name is already bound (a fresh registration always
    /// loses to an existing one under the conflict rules, since its
    /// `registered_at` is later).
    pub fn register(
        &self,
        name: impl Into<String>,
        process: ProcessRef,
        priority: Option<i32>,
    ) -> Result<GlobalEntry, DistError> {
        let name = name.into();
        let owner = self
            .local_node
            .read()
            .clone()
            .or_else(|| process.node().cloned())
            .ok_or(DistError::NoLocalNode)?;
        let entry = GlobalEntry {
            name: name.clone(),
            process,
            registered_at: Utc::now(),
            priority,
            owner,
        };
        {
            use dashmap::mapref::entry::Entry;
            match self.entries.entry(name.clone()) {
                Entry::Occupied(_) => return Err(DistError::GlobalNameTaken { name }),
                Entry::Vacant(slot) => {
                    slot.insert(entry.clone());
                }
            }
        }
        let _ = self
            .events
            .send(GlobalRegistryEvent::Registered(entry.clone()));
        self.broadcast(Frame::GlobalRegister {
            entry: entry.clone(),
        });
        Ok(entry)
    }

    /// Unregister a name owned by this node. Returns `true` if it was
    /// bound.
    pub fn unregister(&self, name: &str) -> bool {
        let Some((_, entry)) = self.entries.remove(name) else {
            return false;
        };
        let _ = self.events.send(GlobalRegistryEvent::Unregistered {
            name: name.to_string(),
        });
        self.broadcast(Frame::GlobalUnregister {
            name: name.to_string(),
            owner: entry.owner,
        });
        true
    }

    /// Resolve a name, failing if unbound.
    pub fn lookup(&self, name: &str) -> Result<ProcessRef, DistError> {
        self.whereis(name).ok_or_else(|| DistError::GlobalNameNotFound {
            name: name.to_string(),
        })
    }

    /// Resolve a name, `None` if unbound.
    pub fn whereis(&self, name: &str) -> Option<ProcessRef> {
        self.entries.get(name).map(|e| e.value().process.clone())
    }

    /// The full entry for a name.
    pub fn entry(&self, name: &str) -> Option<GlobalEntry> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// Whether a name is currently bound.
    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All bound names.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of bound names.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// All entries owned by `node`.
    pub fn entries_for_node(&self, node: &NodeId) -> Vec<GlobalEntry> {
        self.entries
            .iter()
            .filter(|e| &e.value().owner == node)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Snapshot of every entry, gossiped in heartbeats.
    pub(crate) fn snapshot(&self) -> Vec<GlobalEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Merge one remote entry, applying conflict resolution. Idempotent.
    /// Returns `true` when a previously unknown name was added.
    pub(crate) fn apply_remote(&self, incoming: GlobalEntry) -> bool {
        use dashmap::mapref::entry::Entry;
        let local_node = self.local_node.read().clone();
        let mut resolved: Option<(GlobalEntry, GlobalEntry)> = None;
        let mut added = false;
        match self.entries.entry(incoming.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(incoming.clone());
                added = true;
                let _ = self.events.send(GlobalRegistryEvent::Registered(incoming));
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get().clone();
                if existing == incoming {
                    return false;
                }
                if incoming.beats(&existing) {
                    slot.insert(incoming.clone());
                    // The losing side announces the resolution.
                    if Some(&existing.owner) == local_node.as_ref() {
                        resolved = Some((incoming, existing));
                    }
                }
                // Otherwise our entry wins; the next heartbeat will teach
                // the peer.
            }
        }
        if let Some((winner, loser)) = resolved {
            tracing::warn!(
                name = %winner.name,
                winner = %winner.owner,
                loser = %loser.owner,
                "global name conflict resolved against local entry"
            );
            let _ = self.events.send(GlobalRegistryEvent::ConflictResolved {
                name: winner.name.clone(),
                winner,
                loser,
            });
        }
        added
    }

    /// Merge a gossiped snapshot, announcing how many names were learned.
    pub(crate) fn merge_remote(&self, entries: Vec<GlobalEntry>) {
        let mut added = 0;
        for entry in entries {
            if self.apply_remote(entry) {
                added += 1;
            }
        }
        if added > 0 {
            let _ = self.events.send(GlobalRegistryEvent::Synced { added });
        }
    }

    /// Apply a peer's unregister notice: remove only if still owned by
    /// that peer.
    pub(crate) fn apply_remote_unregister(&self, name: &str, owner: &NodeId) {
        let removed = self
            .entries
            .remove_if(name, |_, entry| &entry.owner == owner)
            .is_some();
        if removed {
            let _ = self.events.send(GlobalRegistryEvent::Unregistered {
                name: name.to_string(),
            });
        }
    }

    /// Drop every entry owned by a lost node. Returns the removed names.
    pub(crate) fn purge_node(&self, node: &NodeId) -> Vec<String> {
        let names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| &e.value().owner == node)
            .map(|e| e.key().clone())
            .collect();
        for name in &names {
            self.entries.remove_if(name, |_, entry| &entry.owner == node);
        }
        if !names.is_empty() {
            tracing::info!(node = %node, count = names.len(), "purged global entries of lost node");
            let _ = self.events.send(GlobalRegistryEvent::NodeLost {
                node: node.clone(),
                names: names.clone(),
            });
        }
        names
    }
}
