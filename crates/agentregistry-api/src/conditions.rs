//! Status condition type shared by config and runtime records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported when a record has been fully processed.
pub const CONDITION_READY: &str = "Ready";

/// A single status condition.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Ready`.
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// A `Ready=True` condition.
    pub fn ready(now: DateTime<Utc>) -> Self {
        Self {
            type_: CONDITION_READY.to_string(),
            status: "True".to_string(),
            reason: Some("Reconciled".to_string()),
            message: None,
            last_transition_time: Some(now),
        }
    }

    /// A `Ready=False` condition carrying a failure reason.
    pub fn not_ready(reason: impl Into<String>, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            type_: CONDITION_READY.to_string(),
            status: "False".to_string(),
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_transition_time: Some(now),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Replace the condition of the same type in `conditions`, preserving the
/// transition time when the status did not change.
pub fn upsert(conditions: &mut Vec<Condition>, mut next: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == next.type_) {
        if existing.status == next.status {
            next.last_transition_time = existing.last_transition_time;
        }
        *existing = next;
    } else {
        conditions.push(next);
    }
}
