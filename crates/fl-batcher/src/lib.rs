//! Asynchronous write aggregation for log records.
//!
//! All request handlers append to one shared buffer; a single flusher task
//! owns the swap. Two triggers flush: the buffer reaching `batch_size`
//! (signalled through a `Notify`) and a periodic timer. The lock is held
//! only for the O(1) push or swap; the bulk insert runs outside it.
//!
//! Durability is best-effort before the DB commit: a 201 means "accepted for
//! storage". A failing bulk insert is retried twice (100 ms, 400 ms waits)
//! and then dropped, counted and logged. Asynchronous insert failures never
//! propagate to the submitting caller.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use fl_schemas::LogRecord;

/// Waits between bulk-insert attempts; the batch is dropped after the
/// attempt following the last delay.
pub const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(100), Duration::from_millis(400)];

/// Hard buffer ceiling as a multiple of `batch_size`; submits past it fail
/// fast with `QueueFull`.
pub const HARD_CAP_FACTOR: usize = 4;

/// The store seam: one bulk insert per flushed batch.
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    async fn insert_logs(&self, batch: &[LogRecord]) -> anyhow::Result<()>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Buffer is at the hard cap; callers should surface 503 + Retry-After.
    #[error("ingestion buffer full")]
    QueueFull,
    /// `shutdown` has begun; the intake is closed.
    #[error("batcher is shutting down")]
    ShuttingDown,
}

const STATE_RUNNING: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_STOPPED: u8 = 2;

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatcherMetrics {
    pub current_batch_size: usize,
    pub total_processed: u64,
    pub flush_count: u64,
    pub error_count: u64,
    pub uptime_secs: u64,
    pub state: &'static str,
}

pub struct Batcher {
    buffer: Mutex<Vec<LogRecord>>,
    sink: Arc<dyn LogSink>,
    batch_size: usize,
    hard_cap: usize,
    flush_interval: Duration,
    size_trigger: Notify,
    state: AtomicU8,
    total_processed: AtomicU64,
    flush_count: AtomicU64,
    error_count: AtomicU64,
    started: Instant,
}

impl Batcher {
    pub fn new(batch_size: usize, flush_interval: Duration, sink: Arc<dyn LogSink>) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            buffer: Mutex::new(Vec::with_capacity(batch_size.min(1024))),
            sink,
            batch_size,
            hard_cap: batch_size.saturating_mul(HARD_CAP_FACTOR),
            flush_interval,
            size_trigger: Notify::new(),
            state: AtomicU8::new(STATE_RUNNING),
            total_processed: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Enqueue one record for durable persistence (at-least-once once a
    /// flush succeeds). Non-blocking apart from the buffer push.
    pub fn submit(&self, record: LogRecord) -> Result<(), SubmitError> {
        if self.state.load(Ordering::Acquire) != STATE_RUNNING {
            return Err(SubmitError::ShuttingDown);
        }

        let len = {
            let mut buf = self.buffer.lock().expect("batcher buffer poisoned");
            if buf.len() >= self.hard_cap {
                return Err(SubmitError::QueueFull);
            }
            buf.push(record);
            buf.len()
        };

        if len >= self.batch_size {
            self.size_trigger.notify_one();
        }
        Ok(())
    }

    /// Swap the live buffer for a fresh one and bulk-insert the contents.
    /// Safe to call concurrently with the flusher task.
    pub async fn flush(&self) {
        let batch = {
            let mut buf = self.buffer.lock().expect("batcher buffer poisoned");
            if buf.is_empty() {
                return;
            }
            std::mem::replace(&mut *buf, Vec::with_capacity(self.batch_size.min(1024)))
        };
        self.insert_with_retry(batch).await;
    }

    async fn insert_with_retry(&self, batch: Vec<LogRecord>) {
        let mut attempt = 0usize;
        loop {
            match self.sink.insert_logs(&batch).await {
                Ok(()) => {
                    self.total_processed
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    self.flush_count.fetch_add(1, Ordering::Relaxed);
                    debug!(records = batch.len(), "batch flushed");
                    return;
                }
                Err(err) if attempt < RETRY_DELAYS.len() => {
                    debug!(error = %err, attempt, "bulk insert failed; retrying");
                    tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    error!(
                        error = %err,
                        records = batch.len(),
                        "dropping batch after exhausted retries"
                    );
                    return;
                }
            }
        }
    }

    /// Close the intake, drain the buffer through one final flush, stop.
    /// Idempotent; later calls return once the first drain completed.
    pub async fn shutdown(&self) {
        if self
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_DRAINING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        self.flush().await;
        self.state.store(STATE_STOPPED, Ordering::Release);
        info!(
            total_processed = self.total_processed.load(Ordering::Relaxed),
            "batcher stopped"
        );
    }

    pub fn metrics(&self) -> BatcherMetrics {
        let state = match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => "running",
            STATE_DRAINING => "draining",
            _ => "stopped",
        };
        BatcherMetrics {
            current_batch_size: self.buffer.lock().expect("batcher buffer poisoned").len(),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
            state,
        }
    }

    /// Run the flusher: wake on the size trigger or the interval tick until
    /// the shutdown channel flips. The final drain belongs to `shutdown`,
    /// not this task.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(batcher.flush_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => batcher.flush().await,
                    _ = batcher.size_trigger.notified() => batcher.flush().await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}
