//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter. Async work runs on a
//! current-thread runtime so every task records into the local recorder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use warmpath::advisory::PrefetchDispatcher;
use warmpath::reasoning::{QueueConfig, RateBudgetGate, ReasoningService, ReasoningTaskQueue};
use warmpath::policy::BanditConfig;
use warmpath::sequence::SequenceConfig;
use warmpath::{Orchestrator, Result, SystemMetricsSnapshot, TenantIndexKey, telemetry};

// ============================================================================
// Mock service
// ============================================================================

struct EchoService;

#[async_trait]
impl ReasoningService for EchoService {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(format!("{prompt} answered in four words"))
    }
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Counter value for one `label = value` series.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn gauge_value(snapshot: &SnapshotVec, name: &str) -> Option<f64> {
    snapshot.iter().find_map(|(key, _, _, value)| match value {
        DebugValue::Gauge(v) if key.key().name() == name => Some(v.into_inner()),
        _ => None,
    })
}

fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn report_metrics_records_decision_and_bandit_action() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let orchestrator = Orchestrator::builder()
            .bandit(BanditConfig::new().seed(3))
            .build()
            .unwrap();
        for _ in 0..3 {
            orchestrator.report_metrics("t1", &SystemMetricsSnapshot::new(50.0, 0.2, 10.0, 10.0, 0.0));
        }
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::POLICY_DECISIONS_TOTAL, "source", "heuristic"),
        3
    );
    assert_eq!(counter_total(&snapshot, telemetry::BANDIT_ACTIONS_TOTAL), 3);
}

#[test]
fn worker_records_request_latency_and_tokens() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        current_thread_runtime().block_on(async {
            let queue = ReasoningTaskQueue::new(
                Some(Arc::new(EchoService)),
                Arc::new(RateBudgetGate::default()),
                QueueConfig::new().poll_interval(Duration::from_millis(10)),
            );
            queue.start();
            let (tx, rx) = tokio::sync::oneshot::channel();
            assert!(queue.submit("two words", move |r| {
                let _ = tx.send(r);
            }));
            assert!(rx.await.unwrap().is_some());
            queue.stop().await;
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REASONING_REQUESTS_TOTAL, "status", "ok"),
        1
    );
    assert!(has_histogram(&snapshot, telemetry::REASONING_LATENCY_SECONDS));
    // "two words" → 2 tokens in; 6 words → 7 tokens out.
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REASONING_TOKENS_TOTAL, "direction", "input"),
        2
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REASONING_TOKENS_TOTAL, "direction", "output"),
        7
    );
}

#[test]
fn rejected_submission_is_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let queue = ReasoningTaskQueue::new(
            Some(Arc::new(EchoService)),
            Arc::new(RateBudgetGate::default()),
            QueueConfig::default(),
        );
        assert!(!queue.submit("not started", |_| {}));
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REASONING_REQUESTS_TOTAL, "status", "rejected"),
        1
    );
}

#[test]
fn compaction_publishes_rule_gauge() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let orchestrator = Orchestrator::builder()
            .sequence(SequenceConfig::new().min_support(1))
            .build()
            .unwrap();
        orchestrator.report_cluster_access("t1", "idx", &[1, 2, 3]);
        orchestrator.sequence().compact();
        assert_eq!(orchestrator.sequence().tenant_count(), 1);
        assert_eq!(
            orchestrator
                .sequence()
                .cluster_count(&TenantIndexKey::new("t1", "idx")),
            2
        );
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(gauge_value(&snapshot, telemetry::PREFETCH_RULES), Some(2.0));
}

#[test]
fn advisory_outcomes_are_labelled() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        current_thread_runtime().block_on(async {
            let dispatcher = PrefetchDispatcher::new(None);
            dispatcher.dispatch("t1", "idx", "garbage").await;
            dispatcher
                .dispatch("t1", "idx", r#"{"cluster_id": 1, "confidence": 0.1}"#)
                .await;
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::ADVISORY_TOTAL, "outcome", "parse_error"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::ADVISORY_TOTAL, "outcome", "ignored"),
        1
    );
}

#[test]
fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let orchestrator = Orchestrator::builder().build().unwrap();
    orchestrator.report_metrics("t1", &SystemMetricsSnapshot::default());
}
