//! Running evaluation figures for the model-lifecycle surface.

use serde::Serialize;

use crate::policy::BanditAction;
use crate::types::SystemMetricsSnapshot;

/// Summary returned by
/// [`Orchestrator::evaluations`](super::Orchestrator::evaluations).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Metrics reports seen since start.
    pub reports: u64,
    /// `1 − mean(miss_rate)` over all reports.
    pub observed_hit_rate: Option<f64>,
    /// Relative P99 improvement of the latest report over the first one
    /// (`0.25` = 25% faster).
    pub p99_improvement: Option<f64>,
    pub bandit_epsilon: f64,
    /// Share of reports where the bandit chose the aggressive arm.
    pub aggressive_ratio: f64,
    pub active_version: Option<String>,
    pub canary_version: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct EvaluationTracker {
    reports: u64,
    miss_rate_sum: f64,
    aggressive: u64,
    first_p99: Option<f64>,
    last_p99: Option<f64>,
}

impl EvaluationTracker {
    pub(crate) fn observe(&mut self, metrics: &SystemMetricsSnapshot, action: BanditAction) {
        if !metrics.miss_rate.is_finite() {
            return;
        }
        self.reports += 1;
        self.miss_rate_sum += metrics.miss_rate.clamp(0.0, 1.0);
        if action == BanditAction::Aggressive {
            self.aggressive += 1;
        }
        if metrics.latency_p99_ms.is_finite() && metrics.latency_p99_ms > 0.0 {
            self.first_p99.get_or_insert(metrics.latency_p99_ms);
            self.last_p99 = Some(metrics.latency_p99_ms);
        }
    }

    pub(crate) fn observed_hit_rate(&self) -> Option<f64> {
        (self.reports > 0).then(|| 1.0 - self.miss_rate_sum / self.reports as f64)
    }

    pub(crate) fn p99_improvement(&self) -> Option<f64> {
        match (self.first_p99, self.last_p99) {
            (Some(first), Some(last)) => Some((first - last) / first),
            _ => None,
        }
    }

    pub(crate) fn aggressive_ratio(&self) -> f64 {
        if self.reports == 0 {
            0.0
        } else {
            self.aggressive as f64 / self.reports as f64
        }
    }

    pub(crate) fn reports(&self) -> u64 {
        self.reports
    }
}
