//! Batch triage: turn the model's grouping JSON into ordered event groups.

use crate::events::{InfraEvent, Severity};
use serde::Deserialize;
use std::collections::HashMap;

/// Synthetic group collecting events the model did not assign.
pub const UNASSIGNED_GROUP_ID: &str = "unassigned";

/// A triage-produced cluster of related events, processed as a single LLM
/// turn. Priority 1 is the highest.
#[derive(Clone, Debug)]
pub struct EventGroup {
    pub group_id: String,
    pub summary: String,
    pub priority: i64,
    pub severity: Severity,
    pub event_ids: Vec<String>,
    pub events: Vec<InfraEvent>,
}

#[derive(Debug, Deserialize)]
struct RawTriage {
    #[serde(default)]
    groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    group_id: String,
    #[serde(default)]
    summary: String,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(default)]
    severity: Severity,
    #[serde(default)]
    event_ids: Vec<String>,
}

fn default_priority() -> i64 {
    1
}

/// Strip Markdown fences and locate the JSON object in a model response.
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = if let Some(stripped) = trimmed.strip_prefix("```") {
        let stripped = stripped.strip_prefix("json").unwrap_or(stripped);
        stripped.rsplit_once("```").map_or(stripped, |(body, _)| body)
    } else {
        trimmed
    };
    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&inner[start..=end])
}

/// Parse the triage response and materialize groups over `events`.
///
/// Events the model omitted land in a synthetic `unassigned` group with
/// priority one past the worst model priority and the highest severity among
/// them. Returns `None` on parse failure or when no group references a
/// known event, letting the caller fall back to per-event groups.
pub fn groups_from_response(text: &str, events: &[InfraEvent]) -> Option<Vec<EventGroup>> {
    let json = extract_json(text)?;
    let raw: RawTriage = serde_json::from_str(json).ok()?;
    if raw.groups.is_empty() {
        return None;
    }

    let by_id: HashMap<&str, &InfraEvent> = events.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut assigned: HashMap<String, ()> = HashMap::new();
    let mut groups: Vec<EventGroup> = Vec::with_capacity(raw.groups.len());

    for raw_group in raw.groups {
        let mut materialized = Vec::new();
        let mut ids = Vec::new();
        for id in &raw_group.event_ids {
            if let Some(event) = by_id.get(id.as_str()) {
                assigned.insert(id.clone(), ());
                ids.push(id.clone());
                materialized.push((*event).clone());
            }
        }
        groups.push(EventGroup {
            group_id: raw_group.group_id,
            summary: raw_group.summary,
            priority: raw_group.priority,
            severity: raw_group.severity,
            event_ids: ids,
            events: materialized,
        });
    }

    if groups.iter().all(|g| g.events.is_empty()) {
        return None;
    }

    let unassigned: Vec<InfraEvent> = events
        .iter()
        .filter(|e| !assigned.contains_key(&e.id))
        .cloned()
        .collect();
    if !unassigned.is_empty() {
        let worst_priority = groups.iter().map(|g| g.priority).max().unwrap_or(0);
        let severity = unassigned
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or(Severity::Info);
        groups.push(EventGroup {
            group_id: UNASSIGNED_GROUP_ID.to_string(),
            summary: "Events not assigned by triage".to_string(),
            priority: worst_priority + 1,
            severity,
            event_ids: unassigned.iter().map(|e| e.id.clone()).collect(),
            events: unassigned,
        });
    }

    groups.sort_by_key(|g| g.priority);
    Some(groups)
}

/// Fallback when triage output is unusable: one group per event, prioritised
/// by severity.
pub fn fallback_groups(events: &[InfraEvent]) -> Vec<EventGroup> {
    let mut groups: Vec<EventGroup> = events
        .iter()
        .map(|event| EventGroup {
            group_id: event.id.clone(),
            summary: event.message.clone(),
            priority: match event.severity {
                Severity::Critical => 1,
                Severity::Warning => 2,
                Severity::Info => 3,
            },
            severity: event.severity,
            event_ids: vec![event.id.clone()],
            events: vec![event.clone()],
        })
        .collect();
    groups.sort_by_key(|g| g.priority);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, severity: Severity) -> InfraEvent {
        let mut e = InfraEvent::new("db", "connection", severity, format!("event {id}"));
        e.id = id.to_string();
        e
    }

    #[test]
    fn parses_plain_json() {
        let events = vec![event("e1", Severity::Critical), event("e2", Severity::Warning)];
        let response = r#"{"groups": [{"group_id": "db", "summary": "db issues", "priority": 1, "severity": "critical", "event_ids": ["e1", "e2"]}]}"#;
        let groups = groups_from_response(response, &events).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].events.len(), 2);
        assert_eq!(groups[0].severity, Severity::Critical);
    }

    #[test]
    fn parses_fenced_json() {
        let events = vec![event("e1", Severity::Info)];
        let response = "```json\n{\"groups\": [{\"group_id\": \"g\", \"priority\": 2, \"event_ids\": [\"e1\"]}]}\n```";
        let groups = groups_from_response(response, &events).unwrap();
        assert_eq!(groups[0].group_id, "g");
    }

    #[test]
    fn omitted_events_form_unassigned_group() {
        let events = vec![
            event("e1", Severity::Info),
            event("e2", Severity::Critical),
            event("e3", Severity::Warning),
        ];
        let response = r#"{"groups": [{"group_id": "g", "priority": 2, "event_ids": ["e1"]}]}"#;
        let groups = groups_from_response(response, &events).unwrap();
        assert_eq!(groups.len(), 2);
        let unassigned = &groups[1];
        assert_eq!(unassigned.group_id, UNASSIGNED_GROUP_ID);
        assert_eq!(unassigned.priority, 3);
        assert_eq!(unassigned.severity, Severity::Critical);
        assert_eq!(unassigned.event_ids, vec!["e2", "e3"]);
    }

    #[test]
    fn groups_sort_by_priority() {
        let events = vec![event("e1", Severity::Info), event("e2", Severity::Info)];
        let response = r#"{"groups": [
            {"group_id": "low", "priority": 5, "event_ids": ["e1"]},
            {"group_id": "high", "priority": 1, "event_ids": ["e2"]}
        ]}"#;
        let groups = groups_from_response(response, &events).unwrap();
        assert_eq!(groups[0].group_id, "high");
        assert_eq!(groups[1].group_id, "low");
    }

    #[test]
    fn unusable_responses_yield_none() {
        let events = vec![event("e1", Severity::Info)];
        assert!(groups_from_response("not json at all", &events).is_none());
        assert!(groups_from_response(r#"{"groups": []}"#, &events).is_none());
        // Groups referencing only unknown ids are unusable too.
        assert!(groups_from_response(
            r#"{"groups": [{"group_id": "g", "event_ids": ["zzz"]}]}"#,
            &events
        )
        .is_none());
    }

    #[test]
    fn fallback_orders_by_severity() {
        let events = vec![
            event("i", Severity::Info),
            event("c", Severity::Critical),
            event("w", Severity::Warning),
        ];
        let groups = fallback_groups(&events);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].group_id, "c");
        assert_eq!(groups[0].priority, 1);
        assert_eq!(groups[1].group_id, "w");
        assert_eq!(groups[2].group_id, "i");
    }
}
