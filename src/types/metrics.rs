//! System metrics reports and their quantized cache key

use std::fmt;

use serde::{Deserialize, Serialize};

/// One system-metrics report from the vector-search front end.
///
/// Immutable once built; every report produces a fresh snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsSnapshot {
    pub qps: f64,
    pub miss_rate: f64,
    pub latency_p99_ms: f64,
    pub cpu_utilization: f64,
    pub gpu_utilization: f64,
}

impl SystemMetricsSnapshot {
    pub fn new(
        qps: f64,
        miss_rate: f64,
        latency_p99_ms: f64,
        cpu_utilization: f64,
        gpu_utilization: f64,
    ) -> Self {
        Self {
            qps,
            miss_rate,
            latency_p99_ms,
            cpu_utilization,
            gpu_utilization,
        }
    }

    /// Coarsen the snapshot into its similarity bucket.
    ///
    /// qps, latency, cpu and gpu are truncated to multiples of 10; miss rate
    /// is rounded to one decimal place.
    pub fn quantize(&self) -> QuantizedMetricsKey {
        QuantizedMetricsKey {
            qps: bucket_of_ten(self.qps),
            miss_rate_tenths: (self.miss_rate * 10.0).round() as i64,
            latency_p99_ms: bucket_of_ten(self.latency_p99_ms),
            cpu_utilization: bucket_of_ten(self.cpu_utilization),
            gpu_utilization: bucket_of_ten(self.gpu_utilization),
        }
    }
}

fn bucket_of_ten(value: f64) -> i64 {
    ((value / 10.0).trunc() as i64).saturating_mul(10)
}

/// Bucketed metrics used as both the decision-cache key and the
/// in-flight deduplication key.
///
/// Two snapshots in the same bucket share a cached decision on purpose:
/// this is a similarity cache, not an exact-match cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuantizedMetricsKey {
    pub qps: i64,
    /// Miss rate in tenths (0.3 → 3).
    pub miss_rate_tenths: i64,
    pub latency_p99_ms: i64,
    pub cpu_utilization: i64,
    pub gpu_utilization: i64,
}

impl fmt::Display for QuantizedMetricsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:.1}:{}:{}:{}",
            self.qps,
            self.miss_rate_tenths as f64 / 10.0,
            self.latency_p99_ms,
            self.cpu_utilization,
            self.gpu_utilization
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_buckets_each_field() {
        let key = SystemMetricsSnapshot::new(123.4, 0.34, 47.9, 81.0, 9.9).quantize();
        assert_eq!(key.qps, 120);
        assert_eq!(key.miss_rate_tenths, 3);
        assert_eq!(key.latency_p99_ms, 40);
        assert_eq!(key.cpu_utilization, 80);
        assert_eq!(key.gpu_utilization, 0);
    }

    #[test]
    fn nearby_snapshots_share_a_bucket() {
        let a = SystemMetricsSnapshot::new(101.0, 0.31, 22.0, 55.0, 10.0);
        let b = SystemMetricsSnapshot::new(109.9, 0.29, 28.5, 59.0, 19.0);
        assert_eq!(a.quantize(), b.quantize());
    }

    #[test]
    fn different_miss_rate_changes_bucket() {
        let a = SystemMetricsSnapshot::new(100.0, 0.2, 20.0, 50.0, 10.0);
        let b = SystemMetricsSnapshot::new(100.0, 0.6, 20.0, 50.0, 10.0);
        assert_ne!(a.quantize(), b.quantize());
    }

    #[test]
    fn display_matches_bucket_layout() {
        let key = SystemMetricsSnapshot::new(123.0, 0.34, 47.0, 81.0, 12.0).quantize();
        assert_eq!(key.to_string(), "120:0.3:40:80:10");
    }
}
