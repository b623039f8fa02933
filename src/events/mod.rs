//! Topic-based pub/sub with segment wildcards.
//!
//! Every [`EventBus`] instance is itself a kernel process: publishes are
//! casts into its mailbox, so handler invocation is serialized with
//! everything else the bus does. Subscriptions mutate a shared table
//! directly (serialized by its lock) and take effect for the next publish.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use crate::process::{
    Behavior, BehaviorError, ProcessContext, ProcessError, ProcessRef, ProcessRuntime,
    StartOptions,
};

/// A dot-separated topic pattern.
///
/// A segment of `*` matches exactly one topic segment; the bare pattern `*`
/// matches every topic. All other segments match literally.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<String>,
}

impl TopicPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = raw.split('.').map(str::to_string).collect();
        Self { raw, segments }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this pattern matches the given topic.
    pub fn matches(&self, topic: &str) -> bool {
        if self.raw == "*" {
            return true;
        }
        let topic_segments: Vec<&str> = topic.split('.').collect();
        if topic_segments.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(topic_segments)
            .all(|(pattern, segment)| pattern == "*" || pattern == segment)
    }
}

/// Handler invoked for each matching publish. Errors are logged and
/// isolated; they abort neither the bus nor the other handlers.
pub type EventHandler = Arc<dyn Fn(&str, &Value) -> Result<(), BehaviorError> + Send + Sync>;

struct SubscriptionEntry {
    id: u64,
    pattern: TopicPattern,
    handler: EventHandler,
}

#[derive(Default)]
struct SubscriptionTable {
    entries: Mutex<Vec<SubscriptionEntry>>,
    next_id: AtomicU64,
}

/// The bus process behavior: dispatches each published message to matching
/// handlers in subscription order.
struct EventBusBehavior {
    table: Arc<SubscriptionTable>,
}

#[async_trait]
impl Behavior for EventBusBehavior {
    async fn handle_cast(
        &mut self,
        message: Value,
        _ctx: &ProcessContext,
    ) -> Result<(), BehaviorError> {
        let Some(topic) = message.get("topic").and_then(Value::as_str) else {
            return Ok(());
        };
        let payload = message.get("message").cloned().unwrap_or(Value::Null);

        // Snapshot matching handlers so a handler that subscribes or
        // unsubscribes does not deadlock on the table.
        let matching: Vec<(u64, EventHandler)> = {
            let entries = self.table.entries.lock();
            entries
                .iter()
                .filter(|sub| sub.pattern.matches(topic))
                .map(|sub| (sub.id, Arc::clone(&sub.handler)))
                .collect()
        };
        for (id, handler) in matching {
            if let Err(error) = handler(topic, &payload) {
                tracing::warn!(subscription = id, topic, %error, "event handler failed");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "event_bus"
    }
}

/// Handle to an active subscription. Explicitly revocable; dropping the
/// handle leaves the subscription in place.
pub struct Subscription {
    table: Arc<SubscriptionTable>,
    id: u64,
}

impl Subscription {
    /// Remove this subscription from the bus.
    pub fn unsubscribe(self) {
        self.table.entries.lock().retain(|sub| sub.id != self.id);
    }
}

/// A topic pub/sub bus running as a kernel process.
pub struct EventBus {
    pref: ProcessRef,
    runtime: ProcessRuntime,
    table: Arc<SubscriptionTable>,
}

impl EventBus {
    /// Start a new bus process on the given runtime.
    pub async fn start(runtime: &ProcessRuntime, opts: StartOptions) -> Result<Self, ProcessError> {
        let table = Arc::new(SubscriptionTable::default());
        let behavior = EventBusBehavior {
            table: Arc::clone(&table),
        };
        let pref = runtime.start(Box::new(behavior), opts).await?;
        Ok(Self {
            pref,
            runtime: runtime.clone(),
            table,
        })
    }

    /// The bus's process ref.
    pub fn process_ref(&self) -> &ProcessRef {
        &self.pref
    }

    /// Subscribe a handler to all topics matching `pattern`. Handlers run
    /// in subscription order on the bus process.
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> Subscription
    where
        F: Fn(&str, &Value) -> Result<(), BehaviorError> + Send + Sync + 'static,
    {
        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
        self.table.entries.lock().push(SubscriptionEntry {
            id,
            pattern: TopicPattern::new(pattern),
            handler: Arc::new(handler),
        });
        Subscription {
            table: Arc::clone(&self.table),
            id,
        }
    }

    /// Publish fire-and-forget: enqueue the message for fan-out and return
    /// immediately.
    pub fn publish(&self, topic: &str, message: Value) {
        self.runtime.cast(
            &self.pref,
            json!({ "topic": topic, "message": message }),
        );
    }

    /// Stop the bus process.
    pub async fn stop(&self) {
        self.runtime.stop(&self.pref).await;
    }
}
