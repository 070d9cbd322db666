//! Bounded-concurrency gate
//!
//! At most `max_concurrent` operations run at once; the rest wait in FIFO
//! order (tokio's semaphore is fair) and start as slots free up. No queued
//! operation is ever dropped. The gate does not cancel long-running work;
//! deadlines belong to the wrapped operation.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Metrics for gate monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyGateMetrics {
    /// Configured concurrency limit
    pub max_concurrent: usize,
    /// Operations currently running
    pub running: usize,
    /// Operations currently waiting for a slot
    pub queued: usize,
    /// Operations that finished (successfully or not)
    pub completed: u64,
    /// Highest number of operations observed running at once
    pub peak_running: usize,
}

impl ConcurrencyGateMetrics {
    /// Current utilization (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        self.running as f64 / self.max_concurrent as f64
    }

    /// Human-readable status line
    pub fn status_message(&self) -> String {
        format!(
            "Gate: {}/{} running ({:.1}% utilized), {} queued, {} completed",
            self.running,
            self.max_concurrent,
            self.utilization() * 100.0,
            self.queued,
            self.completed
        )
    }
}

#[derive(Debug, Default)]
struct GateCounters {
    running: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    peak_running: AtomicUsize,
}

/// Bounded-concurrency gate
///
/// Clones share the same slots.
#[derive(Clone)]
pub struct BoundedConcurrencyGate {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<GateCounters>,
}

impl fmt::Debug for BoundedConcurrencyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedConcurrencyGate")
            .field("max_concurrent", &self.max_concurrent)
            .field("running", &self.running())
            .field("queued", &self.queued())
            .finish()
    }
}

impl BoundedConcurrencyGate {
    /// Create a gate allowing `max_concurrent` operations at once
    pub fn new(max_concurrent: usize) -> ConfigResult<Self> {
        if max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        Ok(Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            counters: Arc::new(GateCounters::default()),
        })
    }

    /// Run `operation` once a slot is free
    ///
    /// The slot is released when the operation finishes or its future is
    /// dropped, whichever comes first.
    #[instrument(skip(self, operation), fields(max = self.max_concurrent))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let waiting = CounterGuard::enter(&self.counters.queued);
        let permit = self.semaphore.acquire().await.map_err(|_| ResilienceError::GateClosed)?;
        drop(waiting);

        let running = CounterGuard::enter(&self.counters.running);
        self.counters.peak_running.fetch_max(running.value, Ordering::Relaxed);
        debug!(running = running.value, queued = self.queued(), "gate slot acquired");

        let result = operation().await;

        drop(running);
        drop(permit);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);

        result.map_err(ResilienceError::operation)
    }

    /// Stop admitting work; callers still waiting receive `GateClosed`
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Operations currently running
    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::Acquire)
    }

    /// Operations waiting for a slot
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::Acquire)
    }

    /// Configured concurrency limit
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Snapshot of the gate counters
    pub fn metrics(&self) -> ConcurrencyGateMetrics {
        ConcurrencyGateMetrics {
            max_concurrent: self.max_concurrent,
            running: self.running(),
            queued: self.queued(),
            completed: self.counters.completed.load(Ordering::Acquire),
            peak_running: self.counters.peak_running.load(Ordering::Acquire),
        }
    }
}

/// Increments a counter for as long as it is alive
struct CounterGuard<'a> {
    counter: &'a AtomicUsize,
    value: usize,
}

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let value = counter.fetch_add(1, Ordering::AcqRel) + 1;
        Self { counter, value }
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
