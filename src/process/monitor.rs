//! Monitor down-notifications.
//!
//! When a monitored process terminates, every observer receives exactly one
//! `process_down` message in its mailbox, carrying the final exit reason. A
//! monitor placed on an unknown or already-dead ref delivers an immediate
//! notification with reason `noproc`.

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// Layer 3: Internal module imports
use super::behavior::ExitReason;
use super::pref::ProcessRef;

/// Payload of the `process_down` message delivered to monitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownNotification {
    /// The process that terminated.
    pub process: ProcessRef,

    /// Its final exit reason.
    pub reason: ExitReason,
}

impl DownNotification {
    /// Discriminator carried in the `type` field of the cast payload.
    pub const TYPE: &'static str = "process_down";

    pub(crate) fn new(process: ProcessRef, reason: ExitReason) -> Self {
        Self { process, reason }
    }

    /// Render as the cast payload delivered to observers.
    pub fn to_value(&self) -> Value {
        json!({
            "type": Self::TYPE,
            "process": self.process,
            "reason": self.reason,
        })
    }

    /// Parse a cast payload; `None` if it is not a down-notification.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("type")?.as_str()? != Self::TYPE {
            return None;
        }
        let process = serde_json::from_value(value.get("process")?.clone()).ok()?;
        let reason = serde_json::from_value(value.get("reason")?.clone()).ok()?;
        Some(Self { process, reason })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::util::ProcessId;

    #[test]
    fn test_round_trip() {
        let note = DownNotification::new(
            ProcessRef::new(ProcessId::new(), None, "worker"),
            ExitReason::error("boom"),
        );
        let value = note.to_value();
        let back = DownNotification::from_value(&value).unwrap();
        assert_eq!(back, note);
    }

    #[test]
    fn test_rejects_other_payloads() {
        assert!(DownNotification::from_value(&json!({"type": "other"})).is_none());
        assert!(DownNotification::from_value(&json!(42)).is_none());
    }
}
