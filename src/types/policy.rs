//! Warm-path policy values

use serde::{Deserialize, Serialize};

/// Warm-path cache policy returned for every metrics report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Minimum similarity/confidence required to cache a result, in `[0, 1]`.
    pub admission_threshold: f64,
    /// Time-to-live for cached results.
    pub ttl_seconds: u32,
    /// Eviction tier, `0..=2`.
    pub eviction_priority: u8,
}

impl PolicyDecision {
    /// Default tuple served while the miss rate is healthy.
    pub const DEFAULT: Self = Self {
        admission_threshold: 0.1,
        ttl_seconds: 60,
        eviction_priority: 0,
    };

    /// Aggressive tuple served when the miss rate is high.
    pub const AGGRESSIVE: Self = Self {
        admission_threshold: 0.05,
        ttl_seconds: 300,
        eviction_priority: 1,
    };

    pub const MIN_REASONING_TTL: u32 = 30;
    pub const MAX_REASONING_TTL: u32 = 3600;
    pub const MAX_EVICTION_PRIORITY: u8 = 2;

    /// Floor applied to the TTL by the aggressive bandit override.
    pub const MIN_OVERRIDE_TTL: u32 = 10;

    /// Build a decision from raw reasoning-service numbers, clamping every
    /// field into its declared range.
    pub fn clamped(admission_threshold: f64, ttl_seconds: f64, eviction_priority: f64) -> Self {
        let admission_threshold = if admission_threshold.is_nan() {
            0.0
        } else {
            admission_threshold.clamp(0.0, 1.0)
        };
        let ttl = if ttl_seconds.is_nan() {
            Self::MIN_REASONING_TTL as f64
        } else {
            ttl_seconds.trunc().clamp(
                Self::MIN_REASONING_TTL as f64,
                Self::MAX_REASONING_TTL as f64,
            )
        };
        let eviction = if eviction_priority.is_nan() {
            0.0
        } else {
            eviction_priority
                .trunc()
                .clamp(0.0, Self::MAX_EVICTION_PRIORITY as f64)
        };

        Self {
            admission_threshold,
            ttl_seconds: ttl as u32,
            eviction_priority: eviction as u8,
        }
    }

    /// Apply the bandit's aggressive arm on top of an existing decision:
    /// halve the TTL (floor 10s) and lower admission by 0.1 (floor 0.0).
    pub fn with_aggressive_override(self) -> Self {
        Self {
            admission_threshold: (self.admission_threshold - 0.1).max(0.0),
            ttl_seconds: (self.ttl_seconds / 2).max(Self::MIN_OVERRIDE_TTL),
            eviction_priority: self.eviction_priority,
        }
    }
}

impl Default for PolicyDecision {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which component produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    Heuristic,
    Reasoning,
}

impl PolicySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicySource::Heuristic => "heuristic",
            PolicySource::Reasoning => "reasoning",
        }
    }
}

/// Index build parameters handed to the vector engine, with the model
/// slot the tenant is routed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexPolicy {
    pub pq_m: u32,
    pub pq_construction: u32,
    pub pca_dimension: u32,
    pub model_slot: crate::registry::ModelSlot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_limits_every_field() {
        let d = PolicyDecision::clamped(1.7, 99_999.0, 9.0);
        assert_eq!(d.admission_threshold, 1.0);
        assert_eq!(d.ttl_seconds, 3600);
        assert_eq!(d.eviction_priority, 2);

        let d = PolicyDecision::clamped(-0.3, 1.0, -4.0);
        assert_eq!(d.admission_threshold, 0.0);
        assert_eq!(d.ttl_seconds, 30);
        assert_eq!(d.eviction_priority, 0);
    }

    #[test]
    fn clamped_truncates_fractional_integers() {
        let d = PolicyDecision::clamped(0.25, 120.9, 1.6);
        assert_eq!(d.ttl_seconds, 120);
        assert_eq!(d.eviction_priority, 1);
    }

    #[test]
    fn aggressive_override_halves_ttl_and_lowers_admission() {
        let d = PolicyDecision::AGGRESSIVE.with_aggressive_override();
        assert_eq!(d.ttl_seconds, 150);
        assert_eq!(d.admission_threshold, 0.0);
        assert_eq!(d.eviction_priority, 1);
    }

    #[test]
    fn aggressive_override_respects_floors() {
        let d = PolicyDecision {
            admission_threshold: 0.05,
            ttl_seconds: 12,
            eviction_priority: 0,
        }
        .with_aggressive_override();
        assert_eq!(d.ttl_seconds, 10);
        assert_eq!(d.admission_threshold, 0.0);
    }
}
