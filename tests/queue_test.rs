//! Worker behaviour of `ReasoningTaskQueue`: FIFO processing, rejection,
//! rate-limit retries and shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore, mpsc};

use warmpath::reasoning::{
    BudgetConfig, QueueConfig, RateBudgetGate, ReasoningService, ReasoningTaskQueue,
};
use warmpath::{Result, WarmpathError};

// ============================================================================
// Mock services
// ============================================================================

struct EchoService {
    calls: AtomicUsize,
}

#[async_trait]
impl ReasoningService for EchoService {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("echo {prompt}"))
    }
}

struct FailingService;

#[async_trait]
impl ReasoningService for FailingService {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(WarmpathError::EmptyResponse)
    }
}

/// Blocks every call until a permit is released.
struct GatedService {
    started: Notify,
    release: Semaphore,
}

#[async_trait]
impl ReasoningService for GatedService {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.started.notify_one();
        self.release
            .acquire()
            .await
            .expect("semaphore closed")
            .forget();
        Ok(prompt.to_string())
    }
}

/// Answers after a fixed delay, counting completed calls.
struct SlowService {
    delay: Duration,
    completed: AtomicUsize,
}

impl SlowService {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            completed: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ReasoningService for SlowService {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(prompt.to_string())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_config() -> QueueConfig {
    QueueConfig::new()
        .poll_interval(Duration::from_millis(20))
        .retry_backoff(Duration::from_millis(5))
        .shutdown_timeout(Duration::from_secs(2))
}

fn queue_with(service: Arc<dyn ReasoningService>, config: QueueConfig) -> ReasoningTaskQueue {
    ReasoningTaskQueue::new(Some(service), Arc::new(RateBudgetGate::default()), config)
}

/// Submit `prompt`, forwarding the result into `tx` tagged with the prompt.
fn submit_tagged(
    queue: &ReasoningTaskQueue,
    prompt: &str,
    tx: &mpsc::UnboundedSender<(String, Option<String>)>,
) -> bool {
    let tx = tx.clone();
    let tag = prompt.to_string();
    queue.submit(prompt, move |result| {
        let _ = tx.send((tag, result));
    })
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<(String, Option<String>)>) -> (String, Option<String>) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("handler not called in time")
        .expect("channel closed")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn processes_tasks_in_fifo_order() {
    let service = Arc::new(EchoService {
        calls: AtomicUsize::new(0),
    });
    let queue = queue_with(service.clone(), fast_config());
    queue.start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for prompt in ["a", "b", "c"] {
        assert!(submit_tagged(&queue, prompt, &tx));
    }

    for expected in ["a", "b", "c"] {
        let (tag, result) = recv(&mut rx).await;
        assert_eq!(tag, expected);
        assert_eq!(result.as_deref(), Some(format!("echo {expected}").as_str()));
    }

    assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    let stats = queue.stats();
    assert_eq!(stats.requests_total, 3);
    assert_eq!(stats.requests_succeeded, 3);
    assert!(stats.tokens_total > 0);
    assert_eq!(queue.gate().requests_in_window(), 3);
    queue.stop().await;
}

#[tokio::test]
async fn full_queue_rejects_synchronously() {
    let service = Arc::new(GatedService {
        started: Notify::new(),
        release: Semaphore::new(0),
    });
    let queue = queue_with(service.clone(), fast_config().capacity(2));
    queue.start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(submit_tagged(&queue, "first", &tx));
    // Worker now holds "first" inside the service call.
    service.started.notified().await;

    assert!(submit_tagged(&queue, "second", &tx));
    assert!(submit_tagged(&queue, "third", &tx));
    assert!(!submit_tagged(&queue, "fourth", &tx));

    // The rejected handler already ran, before any accepted one.
    let (tag, result) = recv(&mut rx).await;
    assert_eq!(tag, "fourth");
    assert_eq!(result, None);
    assert_eq!(queue.stats().requests_rejected, 1);
    assert_eq!(queue.len(), 2);

    service.release.add_permits(3);
    for expected in ["first", "second", "third"] {
        let (tag, result) = recv(&mut rx).await;
        assert_eq!(tag, expected);
        assert_eq!(result.as_deref(), Some(expected));
    }
    queue.stop().await;
}

#[tokio::test]
async fn rate_limited_task_is_dropped_after_max_retries() {
    let gate = Arc::new(RateBudgetGate::new(
        BudgetConfig::new().max_requests_per_minute(1),
    ));
    gate.record(1);
    let service = Arc::new(EchoService {
        calls: AtomicUsize::new(0),
    });
    let queue = ReasoningTaskQueue::new(
        Some(service.clone()),
        gate,
        fast_config().max_retries(2),
    );
    queue.start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(submit_tagged(&queue, "limited", &tx));

    let (_, result) = recv(&mut rx).await;
    assert_eq!(result, None);
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);

    let stats = queue.stats();
    // Initial attempt plus two retries.
    assert_eq!(stats.requests_rate_limited, 3);
    assert_eq!(stats.requests_dropped, 1);
    queue.stop().await;
}

#[tokio::test]
async fn service_error_yields_none() {
    let queue = queue_with(Arc::new(FailingService), fast_config());
    queue.start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(submit_tagged(&queue, "boom", &tx));
    let (_, result) = recv(&mut rx).await;
    assert_eq!(result, None);
    assert_eq!(queue.stats().requests_failed, 1);
    assert_eq!(queue.gate().requests_in_window(), 0, "failed calls are not recorded");
    queue.stop().await;
}

#[tokio::test]
async fn over_budget_submission_is_refused() {
    let gate = Arc::new(RateBudgetGate::new(BudgetConfig::new().monthly_token_budget(10)));
    gate.record(10);
    let queue = ReasoningTaskQueue::new(
        Some(Arc::new(FailingService)),
        gate,
        fast_config(),
    );
    queue.start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(!submit_tagged(&queue, "expensive", &tx));
    assert_eq!(recv(&mut rx).await.1, None);
    assert_eq!(queue.stats().requests_budget_exceeded, 1);
    queue.stop().await;
}

#[tokio::test]
async fn disabled_service_rejects_everything() {
    let queue = ReasoningTaskQueue::new(None, Arc::new(RateBudgetGate::default()), fast_config());
    queue.start();
    assert!(!queue.is_enabled());

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(!submit_tagged(&queue, "nobody home", &tx));
    assert_eq!(recv(&mut rx).await.1, None);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_completes_every_pending_handler() {
    let queue = queue_with(SlowService::new(Duration::from_millis(50)), fast_config());
    queue.start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..5 {
        assert!(submit_tagged(&queue, &format!("task {i}"), &tx));
    }
    queue.stop().await;
    assert!(!queue.is_running());

    let mut answered = 0;
    for _ in 0..5 {
        if recv(&mut rx).await.1.is_some() {
            answered += 1;
        }
    }
    assert!(answered <= 1, "at most the in-flight call finishes");
    assert!(rx.try_recv().is_err(), "each handler fires exactly once");

    // Submissions after stop are refused.
    assert!(!submit_tagged(&queue, "late", &tx));
    assert_eq!(recv(&mut rx).await.1, None);
}

#[tokio::test]
async fn stop_timeout_lets_in_flight_call_finish() {
    let service = SlowService::new(Duration::from_millis(500));
    let config = fast_config().shutdown_timeout(Duration::from_millis(100));
    let queue = queue_with(service.clone(), config);
    queue.start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(submit_tagged(&queue, "first", &tx));
    // Wait for the worker to pick up the first task before queueing more.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(submit_tagged(&queue, "second", &tx));
    assert!(submit_tagged(&queue, "third", &tx));

    queue.stop().await;
    assert!(!queue.is_running());

    let mut results = Vec::new();
    for _ in 0..3 {
        results.push(recv(&mut rx).await);
    }
    results.sort();
    assert_eq!(
        results,
        vec![
            ("first".to_string(), Some("first".to_string())),
            ("second".to_string(), None),
            ("third".to_string(), None),
        ]
    );
    assert_eq!(service.completed.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_err(), "each handler fires exactly once");
}

#[tokio::test]
async fn engine_bucket_released_after_timed_out_stop() {
    use warmpath::SystemMetricsSnapshot;
    use warmpath::policy::{PolicyCacheConfig, ReasoningPolicyEngine};

    let config = fast_config().shutdown_timeout(Duration::from_millis(100));
    let queue = Arc::new(queue_with(SlowService::new(Duration::from_millis(300)), config));
    queue.start();
    let engine = ReasoningPolicyEngine::new(Arc::clone(&queue), &PolicyCacheConfig::default());

    engine.compute(&SystemMetricsSnapshot::new(100.0, 0.2, 20.0, 40.0, 5.0));
    engine.compute(&SystemMetricsSnapshot::new(100.0, 0.8, 20.0, 40.0, 5.0));
    assert_eq!(engine.in_flight_len(), 2);

    queue.stop().await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while engine.in_flight_len() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "bucket never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Always answers with a 429 carrying a retry hint.
struct ThrottledService;

#[async_trait]
impl ReasoningService for ThrottledService {
    fn name(&self) -> &str {
        "throttled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(WarmpathError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        })
    }
}

#[tokio::test]
async fn service_retry_hint_holds_the_gate() {
    let gate = Arc::new(RateBudgetGate::default());
    let queue = ReasoningTaskQueue::new(Some(Arc::new(ThrottledService)), Arc::clone(&gate), fast_config());
    queue.start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(submit_tagged(&queue, "first", &tx));
    assert_eq!(recv(&mut rx).await, ("first".to_string(), None));
    assert_eq!(queue.stats().requests_failed, 1);
    assert!(gate.is_rate_limited());
    assert_eq!(gate.requests_in_window(), 0);

    queue.stop().await;
}

#[tokio::test]
async fn start_is_idempotent() {
    let queue = queue_with(
        Arc::new(EchoService {
            calls: AtomicUsize::new(0),
        }),
        fast_config(),
    );
    queue.start();
    queue.start();
    assert!(queue.is_running());

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(submit_tagged(&queue, "once", &tx));
    assert!(recv(&mut rx).await.1.is_some());
    queue.stop().await;
}

#[tokio::test]
async fn panicking_handler_does_not_kill_worker() {
    let queue = queue_with(
        Arc::new(EchoService {
            calls: AtomicUsize::new(0),
        }),
        fast_config(),
    );
    queue.start();

    assert!(queue.submit("explode", |_| panic!("handler bug")));
    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(submit_tagged(&queue, "after", &tx));
    let (tag, result) = recv(&mut rx).await;
    assert_eq!(tag, "after");
    assert!(result.is_some());
    queue.stop().await;
}
