//! Call pacing and rate-limit backoff for the Action Gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use adpilot_core::types::DbId;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between consecutive calls.
///
/// Callers queue on the lock, so concurrent runs sharing one pacer are
/// serialized and spaced out rather than bursting.
#[derive(Debug)]
pub struct CallPacer {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl CallPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until the next call is allowed, then claim the slot.
    pub async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }

    /// No call in flight and the spacing window since the last call has
    /// passed, so a fresh pacer would behave identically.
    fn is_quiet(&self) -> bool {
        self.last_call.try_lock().is_ok_and(|last| {
            (*last).map_or(true, |previous| previous.elapsed() >= self.min_interval)
        })
    }
}

/// One [`CallPacer`] per account owner, shared by every run for that owner.
///
/// Pacers nobody holds and whose window has passed are evicted on lookup,
/// so the map only tracks owners with recent or in-flight calls.
#[derive(Debug)]
pub struct PacerRegistry {
    min_interval: Duration,
    pacers: Mutex<HashMap<DbId, Arc<CallPacer>>>,
}

impl PacerRegistry {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            pacers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn for_owner(&self, owner_id: DbId) -> Arc<CallPacer> {
        let mut pacers = self.pacers.lock().await;
        pacers.retain(|_, pacer| Arc::strong_count(pacer) > 1 || !pacer.is_quiet());
        pacers
            .entry(owner_id)
            .or_insert_with(|| Arc::new(CallPacer::new(self.min_interval)))
            .clone()
    }
}

/// Backoff schedule for rate-limited calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before retry number `retry` (zero-based), or `None` once the
    /// schedule is exhausted. A server hint longer than the schedule wins.
    pub fn delay_for(&self, retry: usize, hint: Option<Duration>) -> Option<Duration> {
        let scheduled = *self.delays.get(retry)?;
        Some(hint.map_or(scheduled, |h| h.max(scheduled)))
    }

    /// Total calls allowed for one action, including the first.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}
