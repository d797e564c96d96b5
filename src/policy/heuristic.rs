//! Miss-rate threshold policy, the guaranteed fallback.

use crate::types::PolicyDecision;

/// Miss rate above which the aggressive tuple is served.
pub const AGGRESSIVE_MISS_RATE: f64 = 0.5;

/// Pure, constant-time policy: aggressive above a 50% miss rate,
/// default otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPolicy;

impl HeuristicPolicy {
    pub fn compute(miss_rate: f64) -> PolicyDecision {
        if miss_rate > AGGRESSIVE_MISS_RATE {
            PolicyDecision::AGGRESSIVE
        } else {
            PolicyDecision::DEFAULT
        }
    }
}
