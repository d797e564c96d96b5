//! Adapters that turn reasoning-service advice into side effects.
//!
//! Neither adapter ever fails: malformed or unusable advice is counted
//! and otherwise ignored.

pub mod prefetch;
pub mod ttl;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::telemetry;

pub use prefetch::{MIN_PREFETCH_CONFIDENCE, PrefetchDispatcher, PrefetchSink};
pub use ttl::{TtlAction, TtlAdvisor, TtlUpdateCallback};

/// Point-in-time advisory counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdvisoryStats {
    /// Advice that produced a side effect.
    pub applied: u64,
    /// Well-formed advice that asked for nothing (low confidence, `keep`, ...).
    pub ignored: u64,
    /// Responses with no usable JSON object.
    pub parse_errors: u64,
}

#[derive(Debug, Default)]
struct AdvisoryCounters {
    applied: AtomicU64,
    ignored: AtomicU64,
    parse_errors: AtomicU64,
}

impl AdvisoryCounters {
    fn applied(&self, kind: &'static str) {
        self.applied.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::ADVISORY_TOTAL, "kind" => kind, "outcome" => "applied")
            .increment(1);
    }

    fn ignored(&self, kind: &'static str) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::ADVISORY_TOTAL, "kind" => kind, "outcome" => "ignored")
            .increment(1);
    }

    fn parse_error(&self, kind: &'static str) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::ADVISORY_TOTAL, "kind" => kind, "outcome" => "parse_error")
            .increment(1);
    }

    fn snapshot(&self) -> AdvisoryStats {
        AdvisoryStats {
            applied: self.applied.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}
