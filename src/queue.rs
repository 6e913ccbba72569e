//! AsyncTaskQueue: bounded-concurrency task serialization with metrics and
//! idle signal.
//!
//! All background work in the system — plan-cache persistence, plan
//! rewrites, field fallbacks, session auto-refresh — flows through an
//! instance of this queue, one per background workload. A simple bounded-
//! concurrency promise queue: no priority tiers, no dependency graph, just
//! `enqueue`/`onIdle`/`metrics`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, Semaphore};

/// Error type returned by a failed task; the queue itself never fails.
pub type TaskError = String;

#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
}

struct QueueState {
    pending: usize,
    in_flight: usize,
}

type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// FIFO, bounded-concurrency task queue. Cloning an `AsyncTaskQueue` shares
/// the same underlying counters/semaphore — it is a handle, not a copy.
#[derive(Clone)]
pub struct AsyncTaskQueue {
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<QueueState>>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    last_duration_ms: Arc<Mutex<Option<u64>>>,
    last_error: Arc<Mutex<Option<String>>>,
    idle_tx: Arc<watch::Sender<bool>>,
    idle_rx: watch::Receiver<bool>,
    on_error: Option<ErrorCallback>,
}

impl AsyncTaskQueue {
    /// `concurrency` must be at least 1; treated as a minimum bound, not a
    /// target, so this clamps rather than panics on `0`.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (idle_tx, idle_rx) = watch::channel(true);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            state: Arc::new(Mutex::new(QueueState { pending: 0, in_flight: 0 })),
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            last_duration_ms: Arc::new(Mutex::new(None)),
            last_error: Arc::new(Mutex::new(None)),
            idle_tx: Arc::new(idle_tx),
            idle_rx,
            on_error: None,
        }
    }

    pub fn with_on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Enqueue a task. Scheduling is FIFO among queued waiters for the
    /// underlying semaphore; at most `concurrency` tasks run concurrently.
    /// The task's own failure is reported to `on_error` and returned as the
    /// `Err` of this call; the queue itself is never corrupted by it.
    pub async fn enqueue<F, Fut, T>(&self, task: F) -> Result<T, TaskError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        self.mark_pending().await;
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("AsyncTaskQueue semaphore is never closed");
        self.mark_started().await;

        let start = Instant::now();
        let result = task().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        drop(permit);

        *self.last_duration_ms.lock().await = Some(elapsed_ms);
        match &result {
            Ok(_) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                *self.last_error.lock().await = Some(e.clone());
                if let Some(cb) = &self.on_error {
                    cb(e);
                }
            }
        }

        self.mark_finished().await;
        result
    }

    async fn mark_pending(&self) {
        let mut state = self.state.lock().await;
        state.pending += 1;
        self.publish_idle(&state);
    }

    async fn mark_started(&self) {
        let mut state = self.state.lock().await;
        state.pending -= 1;
        state.in_flight += 1;
        self.publish_idle(&state);
    }

    async fn mark_finished(&self) {
        let mut state = self.state.lock().await;
        state.in_flight -= 1;
        self.publish_idle(&state);
    }

    fn publish_idle(&self, state: &QueueState) {
        let idle = state.pending == 0 && state.in_flight == 0;
        // `send_if_modified`-style: ignore the (impossible) closed-channel
        // error, there is always at least one receiver held by `self`.
        let _ = self.idle_tx.send_if_modified(|current| {
            if *current != idle {
                *current = idle;
                true
            } else {
                false
            }
        });
    }

    /// Total tasks queued or running right now.
    pub async fn size(&self) -> usize {
        let state = self.state.lock().await;
        state.pending + state.in_flight
    }

    /// Resolves once both `pending` and `in_flight` are zero. Multiple
    /// concurrent callers are each given their own subscription and may
    /// resolve independently and concurrently.
    pub async fn on_idle(&self) {
        let mut rx = self.idle_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn metrics(&self) -> QueueMetrics {
        let state = self.state.lock().await;
        QueueMetrics {
            pending: state.pending,
            in_flight: state.in_flight,
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            last_duration_ms: *self.last_duration_ms.lock().await,
            last_error: self.last_error.lock().await.clone(),
        }
    }
}
