//! Bounded event hub: a FIFO for pending events plus a ring buffer of the
//! most recent ones.
//!
//! Many producers push without blocking; consumers block on [`EventHub::pop`]
//! until an event or cancellation arrives. The ring buffer and the push
//! counter are guarded by the same lock that accepts a push, so observers
//! never see a half-applied push.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default FIFO bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// Default ring-buffer bound.
pub const DEFAULT_RING_CAPACITY: usize = 100;

/// Event severity, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// An infrastructure event pushed by external producers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfraEvent {
    /// Unique id; autogenerated on push when empty.
    #[serde(default)]
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub severity: Severity,
    pub message: String,
    /// Autoset on push when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl InfraEvent {
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            source: source.into(),
            event_type: event_type.into(),
            severity,
            message: message.into(),
            timestamp: None,
            raw: None,
        }
    }
}

struct HubInner {
    queue: VecDeque<InfraEvent>,
    recent: VecDeque<InfraEvent>,
    total_processed: u64,
}

/// Bounded FIFO + ring buffer of recent events.
pub struct EventHub {
    inner: Mutex<HubInner>,
    notify: Notify,
    queue_capacity: usize,
    ring_capacity: usize,
}

impl EventHub {
    /// Non-positive bounds fall back to the defaults.
    pub fn new(queue_capacity: usize, ring_capacity: usize) -> Self {
        let queue_capacity = if queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            queue_capacity
        };
        let ring_capacity = if ring_capacity == 0 {
            DEFAULT_RING_CAPACITY
        } else {
            ring_capacity
        };
        Self {
            inner: Mutex::new(HubInner {
                queue: VecDeque::with_capacity(queue_capacity),
                recent: VecDeque::with_capacity(ring_capacity),
                total_processed: 0,
            }),
            notify: Notify::new(),
            queue_capacity,
            ring_capacity,
        }
    }

    /// Accept an event without blocking. Returns `false` iff the FIFO is
    /// full; only an accepted event reaches the ring buffer and counter.
    pub fn push(&self, mut event: InfraEvent) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.queue.len() >= self.queue_capacity {
                return false;
            }
            if event.id.is_empty() {
                event.id = Uuid::new_v4().to_string();
            }
            if event.timestamp.is_none() {
                event.timestamp = Some(Utc::now());
            }
            inner.queue.push_back(event.clone());
            if inner.recent.len() >= self.ring_capacity {
                inner.recent.pop_front();
            }
            inner.recent.push_back(event);
            inner.total_processed += 1;
        }
        self.notify.notify_one();
        true
    }

    /// Block until an event is available or the token fires. `None` iff
    /// cancelled.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<InfraEvent> {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    fn try_pop(&self) -> Option<InfraEvent> {
        self.inner.lock().queue.pop_front()
    }

    /// Remove and return everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<InfraEvent> {
        self.inner.lock().queue.drain(..).collect()
    }

    /// The last `n` pushed events, oldest first. `n <= 0` means all.
    pub fn recent(&self, n: isize) -> Vec<InfraEvent> {
        let inner = self.inner.lock();
        let len = inner.recent.len();
        let take = if n <= 0 { len } else { (n as usize).min(len) };
        inner.recent.iter().skip(len - take).cloned().collect()
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn total_processed(&self) -> u64 {
        self.inner.lock().total_processed
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, DEFAULT_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(message: &str) -> InfraEvent {
        InfraEvent::new("test", "unit", Severity::Info, message)
    }

    #[test]
    fn push_fills_id_and_timestamp() {
        let hub = EventHub::new(10, 10);
        assert!(hub.push(event("a")));
        let recent = hub.recent(1);
        assert_eq!(recent.len(), 1);
        assert!(!recent[0].id.is_empty());
        assert!(recent[0].timestamp.is_some());
    }

    #[test]
    fn push_respects_capacity_exactly() {
        let hub = EventHub::new(3, 10);
        let mut accepted = 0;
        for i in 0..5 {
            if hub.push(event(&format!("e{i}"))) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);
        assert_eq!(hub.queue_depth(), 3);
        // Rejected pushes must not touch the counter or the ring.
        assert_eq!(hub.total_processed(), 3);
        assert_eq!(hub.recent(0).len(), 3);
    }

    #[tokio::test]
    async fn pop_after_push_frees_capacity() {
        let hub = EventHub::new(2, 10);
        assert!(hub.push(event("a")));
        assert!(hub.push(event("b")));
        assert!(!hub.push(event("c")));

        let cancel = CancellationToken::new();
        let popped = hub.pop(&cancel).await.unwrap();
        assert_eq!(popped.message, "a");
        assert!(hub.push(event("c")));
    }

    #[tokio::test]
    async fn pop_blocks_until_push() {
        let hub = std::sync::Arc::new(EventHub::new(10, 10));
        let cancel = CancellationToken::new();
        let hub2 = hub.clone();
        let cancel2 = cancel.clone();
        let waiter = tokio::spawn(async move { hub2.pop(&cancel2).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(hub.push(event("late")));
        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.message, "late");
    }

    #[tokio::test]
    async fn pop_returns_none_on_cancel() {
        let hub = EventHub::new(10, 10);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(hub.pop(&cancel).await.is_none());
    }

    #[test]
    fn ring_buffer_never_exceeds_capacity() {
        let hub = EventHub::new(100, 5);
        for i in 0..20 {
            assert!(hub.push(event(&format!("e{i}"))));
        }
        let recent = hub.recent(0);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent.last().unwrap().message, "e19");
        assert_eq!(hub.recent(2).len(), 2);
        assert_eq!(hub.recent(2)[0].message, "e18");
    }

    #[test]
    fn recent_returns_last_pushed_event() {
        let hub = EventHub::new(10, 10);
        let mut e = event("specific");
        e.id = "my-id".to_string();
        assert!(hub.push(e));
        assert_eq!(hub.recent(1)[0].id, "my-id");
    }

    #[test]
    fn drain_empties_queue() {
        let hub = EventHub::new(10, 10);
        for i in 0..4 {
            assert!(hub.push(event(&format!("e{i}"))));
        }
        let drained = hub.drain();
        assert_eq!(drained.len(), 4);
        assert_eq!(hub.queue_depth(), 0);
        assert!(hub.drain().is_empty());
    }

    #[test]
    fn zero_bounds_fall_back_to_defaults() {
        let hub = EventHub::new(0, 0);
        assert_eq!(hub.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(hub.ring_capacity, DEFAULT_RING_CAPACITY);
    }
}
