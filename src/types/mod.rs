//! Public types for the Warmpath API.

mod metrics;
mod policy;
mod tenant;

pub use metrics::{QuantizedMetricsKey, SystemMetricsSnapshot};
pub use policy::{IndexPolicy, PolicyDecision, PolicySource};
pub use tenant::TenantIndexKey;
