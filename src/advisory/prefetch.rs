//! Prefetch predictions → prefetch queue.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{AdvisoryCounters, AdvisoryStats};
use crate::extract::{first_json_object, number_field};

/// Confidence a prediction must exceed to be dispatched.
pub const MIN_PREFETCH_CONFIDENCE: f64 = 0.5;

/// Confidence assumed when a prediction omits it.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Consumer of prefetch jobs (the front end's warm-up queue).
#[async_trait]
pub trait PrefetchSink: Send + Sync {
    /// Fire-and-forget request to warm `cluster_id` for one tenant index.
    async fn enqueue(&self, tenant_id: &str, index_name: &str, cluster_id: i64);
}

/// Parses `{cluster_id, confidence}` predictions and forwards confident
/// ones to a [`PrefetchSink`].
pub struct PrefetchDispatcher {
    sink: Option<Arc<dyn PrefetchSink>>,
    counters: AdvisoryCounters,
}

impl PrefetchDispatcher {
    pub fn new(sink: Option<Arc<dyn PrefetchSink>>) -> Self {
        Self {
            sink,
            counters: AdvisoryCounters::default(),
        }
    }

    /// Dispatch a prediction. Returns whether a prefetch was enqueued.
    pub async fn dispatch(&self, tenant_id: &str, index_name: &str, response: &str) -> bool {
        const KIND: &str = "prefetch";

        let Some(map) = first_json_object(response) else {
            self.counters.parse_error(KIND);
            warn!(tenant_id, index_name, "failed to parse prefetch prediction");
            return false;
        };

        let cluster_id = number_field(&map, "cluster_id").map(|c| c.trunc() as i64);
        let confidence = if map.contains_key("confidence") {
            number_field(&map, "confidence")
        } else {
            Some(DEFAULT_CONFIDENCE)
        };

        let (Some(cluster_id), Some(confidence)) = (cluster_id, confidence) else {
            self.counters.ignored(KIND);
            debug!(tenant_id, index_name, "prefetch prediction without usable cluster_id/confidence");
            return false;
        };
        if confidence <= MIN_PREFETCH_CONFIDENCE {
            self.counters.ignored(KIND);
            debug!(tenant_id, index_name, cluster_id, confidence, "prefetch prediction below confidence threshold");
            return false;
        }
        let Some(sink) = self.sink.as_ref() else {
            self.counters.ignored(KIND);
            warn!("no prefetch sink configured");
            return false;
        };

        sink.enqueue(tenant_id, index_name, cluster_id).await;
        self.counters.applied(KIND);
        info!(tenant_id, index_name, cluster_id, confidence, "prefetch dispatched");
        true
    }

    pub fn stats(&self) -> AdvisoryStats {
        self.counters.snapshot()
    }
}
