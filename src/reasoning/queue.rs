//! Bounded, budget-aware task queue in front of the reasoning service.
//!
//! [`ReasoningTaskQueue`] is the only place the core awaits the external
//! service. Callers [`submit`](ReasoningTaskQueue::submit) a prompt plus a
//! completion handler and get an answer immediately: accepted or rejected.
//! A single worker task drains the queue in FIFO order.
//!
//! # Worker loop
//!
//! ```text
//! submit(prompt, handler) ──try_send──► [ bounded mpsc ] ──recv──► worker
//!        │ rejected                                                  │
//!        └─► handler(None)              gate denies (rate) ◄─────────┤
//!                                       ├─ retries left: requeue     │
//!                                       └─ exhausted: handler(None)  │
//!                                       gate allows ────────────────►│
//!                                       service.generate(prompt)     │
//!                                       ├─ Ok(text): record tokens, handler(Some(text))
//!                                       └─ Err: handler(None)
//! ```
//!
//! Every handler fires exactly once: on rejection (synchronously, inside
//! `submit`), on drop after retry exhaustion, on the terminal call
//! outcome, or when the queue is discarded at shutdown.
//!
//! # Shutdown
//!
//! [`stop`](ReasoningTaskQueue::stop) clears the running flag and pushes a
//! shutdown sentinel to wake the worker. The worker also re-checks the
//! flag every `poll_interval`, so a full queue cannot hide the sentinel.
//! Remaining tasks are discarded with `None`; in-flight service calls are
//! never cancelled. `stop` waits at most `shutdown_timeout` for the worker;
//! past that the worker is detached and finishes its current call on its
//! own. A task dropped without completing (runtime teardown) still gets
//! `None` from its drop guard.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::budget::RateBudgetGate;
use super::traits::ReasoningService;
use crate::telemetry;

/// Completion handler invoked exactly once with the service's text, or
/// `None` when there is no answer.
///
/// Runs on the worker task (or on the submitting thread when the task is
/// rejected), so it must be cheap and must not block.
pub type CompletionHandler = Box<dyn FnOnce(Option<String>) + Send + 'static>;

/// Smoothing factor for the latency EMA.
const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Rough token estimate per whitespace-separated word.
const TOKENS_PER_WORD: f64 = 1.3;

/// Configuration for [`ReasoningTaskQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of pending tasks. Default: 256.
    pub capacity: usize,
    /// Rate-limit requeues allowed per task before it is dropped. Default: 3.
    pub max_retries: u32,
    /// Upper bound on how long the worker waits before re-checking the
    /// running flag. Default: 1s.
    pub poll_interval: Duration,
    /// Pause before requeueing a rate-limited task. Default: 1s.
    pub retry_backoff: Duration,
    /// How long `stop()` waits for the worker to exit. Default: 5s.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_retries: 3,
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(mut self, n: usize) -> Self {
        self.capacity = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// A pending reasoning call.
struct ReasoningTask {
    prompt: String,
    on_complete: Option<CompletionHandler>,
    retry_count: u32,
}

impl ReasoningTask {
    fn new(prompt: String, on_complete: CompletionHandler) -> Self {
        Self {
            prompt,
            on_complete: Some(on_complete),
            retry_count: 0,
        }
    }

    /// Deliver the terminal result, shielding the worker from handler panics.
    fn complete(mut self, result: Option<String>) {
        self.fire(result);
    }

    fn fire(&mut self, result: Option<String>) {
        let Some(handler) = self.on_complete.take() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(move || handler(result))).is_err() {
            error!("reasoning completion handler panicked");
        }
    }
}

impl Drop for ReasoningTask {
    fn drop(&mut self) {
        if self.on_complete.is_some() {
            debug!("reasoning task dropped before completion");
            self.fire(None);
        }
    }
}

enum QueueItem {
    Task(ReasoningTask),
    Shutdown,
}

/// Point-in-time copy of the queue's running statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_rate_limited: u64,
    pub requests_budget_exceeded: u64,
    pub requests_rejected: u64,
    pub requests_dropped: u64,
    pub tokens_total: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub monthly_tokens_used: u64,
    pub last_latency_secs: f64,
    pub latency_ema_secs: f64,
    pub queue_depth: usize,
}

#[derive(Default)]
struct Counters {
    requests_total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rate_limited: AtomicU64,
    budget_exceeded: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    tokens_total: AtomicU64,
    tokens_input: AtomicU64,
    tokens_output: AtomicU64,
    latency: Mutex<LatencyTracker>,
}

#[derive(Default)]
struct LatencyTracker {
    last: f64,
    ema: Option<f64>,
}

impl LatencyTracker {
    fn observe(&mut self, secs: f64) {
        self.last = secs;
        self.ema = Some(match self.ema {
            Some(prev) => prev + LATENCY_EMA_ALPHA * (secs - prev),
            None => secs,
        });
    }
}

fn bump(counter: &AtomicU64, status: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    metrics::counter!(telemetry::REASONING_REQUESTS_TOTAL, "status" => status).increment(1);
}

/// Estimate tokens from word count (≈1.3 tokens per word).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * TOKENS_PER_WORD) as u64
}

/// State shared between the queue handle and its worker task.
struct QueueInner {
    service: Option<Arc<dyn ReasoningService>>,
    gate: Arc<RateBudgetGate>,
    config: QueueConfig,
    tx: mpsc::Sender<QueueItem>,
    running: AtomicBool,
    counters: Counters,
}

impl QueueInner {
    fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn publish_depth(&self) {
        metrics::gauge!(telemetry::REASONING_QUEUE_DEPTH).set(self.depth() as f64);
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<QueueItem>) {
        info!("reasoning worker started");
        loop {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            let item = match tokio::time::timeout(self.config.poll_interval, rx.recv()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => continue,
            };
            self.publish_depth();
            match item {
                QueueItem::Task(task) => self.process(task).await,
                QueueItem::Shutdown => break,
            }
        }

        // Refuse further sends, then discard whatever is still buffered.
        rx.close();
        let mut discarded = 0u64;
        while let Ok(item) = rx.try_recv() {
            if let QueueItem::Task(task) = item {
                bump(&self.counters.dropped, "dropped");
                task.complete(None);
                discarded += 1;
            }
        }
        self.publish_depth();
        info!(discarded, "reasoning worker stopped");
    }

    async fn process(&self, mut task: ReasoningTask) {
        let Some(service) = self.service.as_ref() else {
            bump(&self.counters.failed, "error");
            task.complete(None);
            return;
        };

        if self.gate.is_over_budget() {
            bump(&self.counters.budget_exceeded, "budget_exceeded");
            warn!("monthly token budget exceeded, skipping reasoning task");
            task.complete(None);
            return;
        }

        if self.gate.is_rate_limited() {
            bump(&self.counters.rate_limited, "rate_limited");
            if task.retry_count >= self.config.max_retries {
                bump(&self.counters.dropped, "dropped");
                warn!(
                    retries = task.retry_count,
                    "reasoning task dropped after exhausting rate-limit retries"
                );
                task.complete(None);
                return;
            }
            task.retry_count += 1;
            warn!(
                attempt = task.retry_count,
                max_retries = self.config.max_retries,
                backoff_ms = self.config.retry_backoff.as_millis() as u64,
                "rate limited, requeueing reasoning task"
            );
            tokio::time::sleep(self.config.retry_backoff).await;
            if let Err(e) = self.tx.try_send(QueueItem::Task(task)) {
                bump(&self.counters.dropped, "dropped");
                warn!("queue unavailable for requeue, dropping reasoning task");
                if let QueueItem::Task(task) = e.into_inner() {
                    task.complete(None);
                }
            }
            self.publish_depth();
            return;
        }

        let start = Instant::now();
        let outcome = service.generate(&task.prompt).await;
        let latency = start.elapsed().as_secs_f64();
        self.counters.requests_total.fetch_add(1, Ordering::Relaxed);
        metrics::histogram!(telemetry::REASONING_LATENCY_SECONDS).record(latency);
        self.counters
            .latency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observe(latency);

        match outcome {
            Ok(text) => {
                let input = estimate_tokens(&task.prompt);
                let output = estimate_tokens(&text);
                let total = input + output;
                self.gate.record(total);

                self.counters.tokens_total.fetch_add(total, Ordering::Relaxed);
                self.counters.tokens_input.fetch_add(input, Ordering::Relaxed);
                self.counters.tokens_output.fetch_add(output, Ordering::Relaxed);
                metrics::counter!(telemetry::REASONING_TOKENS_TOTAL, "direction" => "input")
                    .increment(input);
                metrics::counter!(telemetry::REASONING_TOKENS_TOTAL, "direction" => "output")
                    .increment(output);
                bump(&self.counters.succeeded, "ok");
                debug!(
                    service = service.name(),
                    tokens = total,
                    latency_ms = (latency * 1000.0) as u64,
                    "reasoning call completed"
                );
                task.complete(Some(text));
            }
            Err(e) => {
                bump(&self.counters.failed, "error");
                if let Some(retry_after) = e.retry_after() {
                    self.gate.hold_for(retry_after);
                }
                if e.is_transient() {
                    warn!(service = service.name(), error = %e, "reasoning call failed, transient");
                } else {
                    error!(service = service.name(), error = %e, "reasoning call failed");
                }
                task.complete(None);
            }
        }
    }
}

/// Bounded FIFO of reasoning calls drained by one background worker.
///
/// Submission never blocks. See the module docs for the worker loop and
/// shutdown semantics.
pub struct ReasoningTaskQueue {
    inner: Arc<QueueInner>,
    rx: Mutex<Option<mpsc::Receiver<QueueItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReasoningTaskQueue {
    /// Create a queue. `service: None` means the reasoning service is
    /// disabled (no credentials); every submission is then rejected.
    pub fn new(
        service: Option<Arc<dyn ReasoningService>>,
        gate: Arc<RateBudgetGate>,
        config: QueueConfig,
    ) -> Self {
        if service.is_none() {
            warn!("no reasoning service configured, reasoning tasks will be rejected");
        }
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        Self {
            inner: Arc::new(QueueInner {
                service,
                gate,
                config,
                tx,
                running: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker. Subsequent calls (and calls after `stop`) are no-ops.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            warn!("reasoning worker already started or stopped");
            return;
        };
        self.inner.running.store(true, Ordering::Release);
        let handle = tokio::spawn(Arc::clone(&self.inner).run(rx));
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stop the worker and wait (bounded) for it to exit.
    ///
    /// Tasks still queued are completed with `None`. If the worker is still
    /// inside a service call when `shutdown_timeout` elapses it is left to
    /// finish that call and deliver its result; nothing queued behind it is
    /// processed.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        // Best effort: if the queue is full the worker still notices the
        // flag within one poll interval.
        let _ = self.inner.tx.try_send(QueueItem::Shutdown);

        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.inner.config.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "reasoning worker terminated abnormally"),
                Err(_) => {
                    warn!(
                        timeout_ms = self.inner.config.shutdown_timeout.as_millis() as u64,
                        "reasoning worker still busy, detaching"
                    );
                    drop(handle);
                }
            }
        }
    }

    /// Whether the worker is accepting tasks.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Whether a reasoning service is configured.
    pub fn is_enabled(&self) -> bool {
        self.inner.service.is_some()
    }

    /// Enqueue a prompt without blocking.
    ///
    /// Returns `false` and invokes `on_complete(None)` immediately when the
    /// worker is not running, the service is disabled, the monthly budget
    /// is exhausted, or the queue is full.
    pub fn submit<F>(&self, prompt: impl Into<String>, on_complete: F) -> bool
    where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        let task = ReasoningTask::new(prompt.into(), Box::new(on_complete));
        let inner = &self.inner;

        if !self.is_running() {
            debug!("reasoning worker not running, task rejected");
            return self.reject(task);
        }
        if inner.service.is_none() {
            return self.reject(task);
        }
        if inner.gate.is_over_budget() {
            bump(&inner.counters.budget_exceeded, "budget_exceeded");
            warn!("monthly token budget exceeded, task rejected");
            task.complete(None);
            return false;
        }

        match inner.tx.try_send(QueueItem::Task(task)) {
            Ok(()) => {
                inner.publish_depth();
                true
            }
            Err(TrySendError::Full(item)) | Err(TrySendError::Closed(item)) => {
                warn!(capacity = inner.config.capacity, "reasoning queue full or closed, task rejected");
                match item {
                    QueueItem::Task(task) => self.reject(task),
                    QueueItem::Shutdown => false,
                }
            }
        }
    }

    fn reject(&self, task: ReasoningTask) -> bool {
        bump(&self.inner.counters.rejected, "rejected");
        task.complete(None);
        false
    }

    /// Tasks currently waiting (excluding the one being processed).
    pub fn len(&self) -> usize {
        self.inner.depth()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn gate(&self) -> &Arc<RateBudgetGate> {
        &self.inner.gate
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Snapshot the running statistics.
    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        let latency = c.latency.lock().unwrap_or_else(|e| e.into_inner());
        QueueStats {
            requests_total: c.requests_total.load(Ordering::Relaxed),
            requests_succeeded: c.succeeded.load(Ordering::Relaxed),
            requests_failed: c.failed.load(Ordering::Relaxed),
            requests_rate_limited: c.rate_limited.load(Ordering::Relaxed),
            requests_budget_exceeded: c.budget_exceeded.load(Ordering::Relaxed),
            requests_rejected: c.rejected.load(Ordering::Relaxed),
            requests_dropped: c.dropped.load(Ordering::Relaxed),
            tokens_total: c.tokens_total.load(Ordering::Relaxed),
            tokens_input: c.tokens_input.load(Ordering::Relaxed),
            tokens_output: c.tokens_output.load(Ordering::Relaxed),
            monthly_tokens_used: self.inner.gate.monthly_tokens_used(),
            last_latency_secs: latency.last,
            latency_ema_secs: latency.ema.unwrap_or(0.0),
            queue_depth: self.inner.depth(),
        }
    }
}
