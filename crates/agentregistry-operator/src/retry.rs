//! Discovery retry helper: classify the store error, retry transient
//! classes asynchronously with linear backoff, and keep a per-resource
//! error tracker for observability.

use crate::error::{classify, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Attempts per resource, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Linear backoff step: the k-th retry waits `k × 500ms`.
pub const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Last failure observed for one resource identity.
#[derive(Clone, Debug)]
pub struct ErrorEntry {
    pub message: String,
    pub retry_count: u32,
    pub last_attempt: DateTime<Utc>,
}

/// Per-resource failure registry. Lock is never held together with the
/// watcher map's.
#[derive(Default)]
pub struct ErrorTracker {
    inner: Mutex<HashMap<String, ErrorEntry>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, identity: &str, message: String, retry_count: u32) {
        self.inner.lock().insert(
            identity.to_string(),
            ErrorEntry {
                message,
                retry_count,
                last_attempt: Utc::now(),
            },
        );
    }

    pub fn clear(&self, identity: &str) {
        self.inner.lock().remove(identity);
    }

    pub fn get(&self, identity: &str) -> Option<ErrorEntry> {
        self.inner.lock().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Run `op` in a background task with up to [`MAX_ATTEMPTS`] tries.
///
/// Retryable classes (conflict, timeout, internal, unavailable, unknown)
/// back off linearly; not-found is a silent skip; other permanent classes
/// stop with the failure recorded. Success clears the tracker entry.
pub fn spawn_with_retry<F, Fut>(
    tracker: Arc<ErrorTracker>,
    identity: String,
    op: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        for attempt in 1..=MAX_ATTEMPTS {
            match op().await {
                Ok(()) => {
                    tracker.clear(&identity);
                    return;
                }
                Err(e) => {
                    let kind = classify(&e);
                    if e.is_not_found() {
                        // The referenced object disappeared; nothing to
                        // write any more.
                        debug!(identity = %identity, "shadow write skipped, source gone");
                        tracker.clear(&identity);
                        return;
                    }
                    tracker.record(&identity, e.to_string(), attempt);
                    if !kind.is_retryable() || attempt == MAX_ATTEMPTS {
                        warn!(identity = %identity, attempt, error = %e, "shadow write gave up");
                        return;
                    }
                    let delay = BACKOFF_STEP * attempt;
                    debug!(
                        identity = %identity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying shadow write"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_until_success() {
        let tracker = Arc::new(ErrorTracker::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let handle = spawn_with_retry(tracker.clone(), "mcpserver/ns/x".to_string(), move || {
            let attempts = attempts2.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err(Error::Conflict)
                } else {
                    Ok(())
                }
            }
        });
        handle.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_cap_at_three_attempts() {
        let tracker = Arc::new(ErrorTracker::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let handle = spawn_with_retry(tracker.clone(), "mcpserver/ns/x".to_string(), move || {
            let attempts = attempts2.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Conflict)
            }
        });
        handle.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
        let entry = tracker.get("mcpserver/ns/x").unwrap();
        assert_eq!(entry.retry_count, MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_stop_immediately() {
        let tracker = Arc::new(ErrorTracker::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let handle = spawn_with_retry(tracker.clone(), "mcpserver/ns/x".to_string(), move || {
            let attempts = attempts2.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Validation("bad spec".to_string()))
            }
        });
        handle.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(tracker.get("mcpserver/ns/x").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_a_silent_skip() {
        let tracker = Arc::new(ErrorTracker::new());
        let handle = spawn_with_retry(tracker.clone(), "mcpserver/ns/x".to_string(), move || async {
            Err(Error::NotFound("ns/x".to_string()))
        });
        handle.await.unwrap();
        assert!(tracker.is_empty());
    }
}
