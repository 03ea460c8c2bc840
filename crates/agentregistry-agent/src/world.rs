//! Concurrent world state: narrative summary plus the incident registry.

use crate::events::Severity;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of an incident.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentState {
    #[default]
    Investigating,
    Resolved,
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentState::Investigating => write!(f, "investigating"),
            IncidentState::Resolved => write!(f, "resolved"),
        }
    }
}

/// An operator-visible aggregation of related events. The id is a stable
/// human slug chosen by the model, never a UUID.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub severity: Severity,
    pub source: String,
    pub summary: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: IncidentState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

/// Serializable snapshot suitable for the config record's status.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorldStatus {
    pub summary: String,
    pub events_processed: u64,
    pub pending_events: usize,
    pub incidents: Vec<Incident>,
    pub last_updated: Option<DateTime<Utc>>,
}

struct WorldInner {
    summary: String,
    events_processed: u64,
    incidents: HashMap<String, Incident>,
    last_updated: Option<DateTime<Utc>>,
}

/// Concurrency-safe incident registry and narrative summary.
pub struct WorldState {
    inner: RwLock<WorldInner>,
}

impl WorldState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(WorldInner {
                summary: String::new(),
                events_processed: 0,
                incidents: HashMap::new(),
                last_updated: None,
            }),
        }
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.summary = summary.into();
        inner.last_updated = Some(Utc::now());
    }

    pub fn get_summary(&self) -> String {
        self.inner.read().summary.clone()
    }

    pub fn increment_events(&self, count: u64) {
        let mut inner = self.inner.write();
        inner.events_processed += count;
        inner.last_updated = Some(Utc::now());
    }

    pub fn events_processed(&self) -> u64 {
        self.inner.read().events_processed
    }

    /// Create or update an incident. Severity never downgrades: an update
    /// carrying a lower severity keeps the existing one, while the summary,
    /// source and last-seen still refresh.
    pub fn add_or_update_incident(
        &self,
        id: impl Into<String>,
        severity: Severity,
        source: impl Into<String>,
        summary: impl Into<String>,
    ) {
        let id = id.into();
        let now = Utc::now();
        let mut inner = self.inner.write();
        match inner.incidents.get_mut(&id) {
            Some(incident) => {
                incident.severity = incident.severity.max(severity);
                incident.source = source.into();
                incident.summary = summary.into();
                incident.last_seen = now;
            }
            None => {
                inner.incidents.insert(
                    id.clone(),
                    Incident {
                        id,
                        severity,
                        source: source.into(),
                        summary: summary.into(),
                        first_seen: now,
                        last_seen: now,
                        status: IncidentState::Investigating,
                        actions: Vec::new(),
                    },
                );
            }
        }
        inner.last_updated = Some(now);
    }

    /// Append an action taken on an incident. Unknown ids are ignored.
    pub fn add_incident_action(&self, id: &str, action: impl Into<String>) {
        let now = Utc::now();
        let mut inner = self.inner.write();
        if let Some(incident) = inner.incidents.get_mut(id) {
            incident.actions.push(action.into());
            incident.last_seen = now;
        }
        inner.last_updated = Some(now);
    }

    /// Mark an incident resolved and refresh its last-seen time. Returns
    /// `false` for an unknown id.
    pub fn resolve_incident(&self, id: &str) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let resolved = match inner.incidents.get_mut(id) {
            Some(incident) => {
                incident.status = IncidentState::Resolved;
                incident.last_seen = now;
                true
            }
            None => false,
        };
        inner.last_updated = Some(now);
        resolved
    }

    /// Deep copy of every incident, newest-seen first.
    pub fn get_incidents(&self) -> Vec<Incident> {
        let inner = self.inner.read();
        let mut incidents: Vec<Incident> = inner.incidents.values().cloned().collect();
        incidents.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        incidents
    }

    /// Formatted list of the non-resolved incidents, for prompts.
    pub fn active_incidents_summary(&self) -> String {
        let incidents = self.get_incidents();
        let active: Vec<String> = incidents
            .iter()
            .filter(|i| i.status != IncidentState::Resolved)
            .map(|i| format!("- [{}] {} ({}): {}", i.severity, i.id, i.status, i.summary))
            .collect();
        if active.is_empty() {
            "No active incidents.".to_string()
        } else {
            active.join("\n")
        }
    }

    /// Snapshot for the config record's status.
    pub fn to_status(&self, pending_events: usize) -> WorldStatus {
        let inner = self.inner.read();
        let mut incidents: Vec<Incident> = inner.incidents.values().cloned().collect();
        incidents.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        WorldStatus {
            summary: inner.summary.clone(),
            events_processed: inner.events_processed,
            pending_events,
            incidents,
            last_updated: inner.last_updated,
        }
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}
