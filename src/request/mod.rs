//! Bounded, observable execution of outbound operations.
//!
//! `RequestScheduler` caps how many transport calls run at once and keeps a
//! record of what is in flight and of every failure, so a UI can show
//! spinners and an error log without the engine ever blocking on it.

pub mod lock;
pub mod undo;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

pub use lock::{FolderLockGuard, FolderLocks};
pub use undo::{UndoQueue, UndoToken};

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCategory {
    /// Fetch and sync reads
    Fetch,
    /// Flag changes, moves and copies
    Push,
}

#[derive(Debug, Clone)]
pub struct TrackedRequest {
    pub id: u64,
    pub category: RequestCategory,
    pub description: String,
    pub started_at: DateTime<Utc>,
}

/// A failed transport call, kept for display.
#[derive(Debug, Clone)]
pub struct RequestError {
    pub description: String,
    pub account: Option<String>,
    pub folder: Option<String>,
    pub error: TransportError,
    pub at: DateTime<Utc>,
}

impl RequestError {
    pub fn new(description: impl Into<String>, error: TransportError) -> Self {
        Self {
            description: description.into(),
            account: None,
            folder: None,
            error,
            at: Utc::now(),
        }
    }

    pub fn with_location(mut self, account: &str, folder: &str) -> Self {
        self.account = Some(account.to_string());
        self.folder = Some(folder.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    next_id: u64,
    tracked: BTreeMap<u64, TrackedRequest>,
    errors: Vec<RequestError>,
}

#[derive(Debug)]
pub struct RequestScheduler {
    semaphore: Semaphore,
    max_concurrent: usize,
    pending: AtomicUsize,
    state: Mutex<SchedulerState>,
}

impl RequestScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
            pending: AtomicUsize::new(0),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run `operation` once a slot is free, tracking it under `category`
    /// until it settles. Waiters are served in FIFO order.
    pub async fn run_tracked<F, T>(
        &self,
        category: RequestCategory,
        description: impl Into<String>,
        operation: F,
    ) -> T
    where
        F: Future<Output = T>,
    {
        let description = description.into();

        self.pending.fetch_add(1, Ordering::SeqCst);
        let permit = self.semaphore.acquire().await;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        if permit.is_err() {
            tracing::warn!("Request slots closed, running {} unbounded", description);
        }

        let _tracked = self.track(category, description);
        operation.await
    }

    fn track(&self, category: RequestCategory, description: String) -> TrackedGuard<'_> {
        let mut state = self.lock_state();
        let id = state.next_id;
        state.next_id += 1;
        tracing::trace!("Start {:?} request {}: {}", category, id, description);
        state.tracked.insert(
            id,
            TrackedRequest {
                id,
                category,
                description,
                started_at: Utc::now(),
            },
        );
        TrackedGuard {
            scheduler: self,
            id,
        }
    }

    /// Operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.lock_state().tracked.len()
    }

    /// Operations waiting for a slot.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn tracked(&self, category: RequestCategory) -> Vec<TrackedRequest> {
        self.lock_state()
            .tracked
            .values()
            .filter(|request| request.category == category)
            .cloned()
            .collect()
    }

    pub fn record_error(&self, error: RequestError) {
        tracing::warn!(
            "{} failed ({}/{}): {}",
            error.description,
            error.account.as_deref().unwrap_or("-"),
            error.folder.as_deref().unwrap_or("-"),
            error.error
        );
        self.lock_state().errors.push(error);
    }

    pub fn errors(&self) -> Vec<RequestError> {
        self.lock_state().errors.clone()
    }

    pub fn clear_errors(&self) {
        self.lock_state().errors.clear();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RequestScheduler {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_MAX_CONCURRENT_REQUESTS)
    }
}

/// Removes the tracking record when the operation settles or is dropped.
struct TrackedGuard<'a> {
    scheduler: &'a RequestScheduler,
    id: u64,
}

impl Drop for TrackedGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.lock_state().tracked.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling() {
        let scheduler = Arc::new(RequestScheduler::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let scheduler = scheduler.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .run_tracked(RequestCategory::Fetch, format!("op {}", i), async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        i
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.in_flight(), 2);
        assert_eq!(scheduler.pending(), 4);
        assert_eq!(scheduler.tracked(RequestCategory::Fetch).len(), 2);
        assert!(scheduler.tracked(RequestCategory::Push).is_empty());

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_release_slot() {
        let scheduler = RequestScheduler::new(1);
        let result: Result<(), TransportError> = scheduler
            .run_tracked(RequestCategory::Push, "failing", async {
                Err(TransportError::network("connection reset"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(scheduler.in_flight(), 0);

        let value = scheduler
            .run_tracked(RequestCategory::Push, "next", async { 7 })
            .await;
        assert_eq!(value, 7);
    }

    #[test]
    fn test_error_log() {
        let scheduler = RequestScheduler::default();
        assert_eq!(scheduler.max_concurrent(), 4);

        scheduler.record_error(
            RequestError::new("Sync inbox", TransportError::server("503"))
                .with_location("acct1", "inbox"),
        );
        let errors = scheduler.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].account.as_deref(), Some("acct1"));

        scheduler.clear_errors();
        assert!(scheduler.errors().is_empty());
    }
}
