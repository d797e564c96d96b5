//! TTL advice → per-cluster TTL overrides.
//!
//! Overrides are read by the cache-eviction consumer through
//! [`TtlAdvisor::get_override`]; a value of `0` means evict now.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use super::{AdvisoryCounters, AdvisoryStats};
use crate::extract::{first_json_object, number_field};
use crate::types::TenantIndexKey;

/// Async hook fired whenever an override is written:
/// `(tenant_id, index_name, cluster_id, ttl_seconds)`.
pub type TtlUpdateCallback =
    Arc<dyn Fn(String, String, i64, u32) -> BoxFuture<'static, ()> + Send + Sync>;

/// What the advice asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlAction {
    Keep,
    Shorten,
    Evict,
    Unknown,
}

impl FromStr for TtlAction {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "keep" => TtlAction::Keep,
            "shorten" => TtlAction::Shorten,
            "evict" => TtlAction::Evict,
            _ => TtlAction::Unknown,
        })
    }
}

/// Holds TTL overrides keyed by tenant index, then cluster.
pub struct TtlAdvisor {
    overrides: RwLock<HashMap<TenantIndexKey, HashMap<i64, u32>>>,
    callback: Option<TtlUpdateCallback>,
    counters: AdvisoryCounters,
}

impl TtlAdvisor {
    pub fn new(callback: Option<TtlUpdateCallback>) -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
            callback,
            counters: AdvisoryCounters::default(),
        }
    }

    /// Apply one `{action, cluster_id, ttl_seconds}` advice. Returns the
    /// override written, if any.
    pub async fn apply(&self, tenant_id: &str, index_name: &str, response: &str) -> Option<u32> {
        self.apply_inner(tenant_id, index_name, None, response).await
    }

    /// Apply advice requested for a known cluster; a `cluster_id` in the
    /// response still takes precedence.
    pub async fn apply_for_cluster(
        &self,
        tenant_id: &str,
        index_name: &str,
        cluster_id: i64,
        response: &str,
    ) -> Option<u32> {
        self.apply_inner(tenant_id, index_name, Some(cluster_id), response)
            .await
    }

    async fn apply_inner(
        &self,
        tenant_id: &str,
        index_name: &str,
        requested_cluster: Option<i64>,
        response: &str,
    ) -> Option<u32> {
        const KIND: &str = "ttl";

        let Some(map) = first_json_object(response) else {
            self.counters.parse_error(KIND);
            warn!(tenant_id, index_name, "failed to parse TTL advice");
            return None;
        };

        let action = map
            .get("action")
            .and_then(|v| v.as_str())
            .map(|s| s.parse::<TtlAction>().unwrap_or(TtlAction::Unknown))
            .unwrap_or(TtlAction::Keep);
        let cluster_id = number_field(&map, "cluster_id")
            .map(|c| c.trunc() as i64)
            .or(requested_cluster);

        let (cluster_id, ttl) = match (action, cluster_id) {
            (TtlAction::Shorten, Some(cluster_id)) => match number_field(&map, "ttl_seconds") {
                Some(ttl) if ttl >= 0.0 => (cluster_id, ttl.trunc().min(u32::MAX as f64) as u32),
                _ => {
                    self.counters.ignored(KIND);
                    debug!(tenant_id, index_name, "shorten advice without valid ttl_seconds");
                    return None;
                }
            },
            (TtlAction::Evict, Some(cluster_id)) => (cluster_id, 0),
            _ => {
                self.counters.ignored(KIND);
                debug!(tenant_id, index_name, ?action, "TTL advice requires no change");
                return None;
            }
        };

        let key = TenantIndexKey::new(tenant_id, index_name);
        self.overrides
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .insert(cluster_id, ttl);
        self.counters.applied(KIND);
        info!(tenant_id, index_name, cluster_id, ttl_seconds = ttl, ?action, "TTL override applied");

        if let Some(callback) = &self.callback {
            callback(tenant_id.to_string(), index_name.to_string(), cluster_id, ttl).await;
        }
        Some(ttl)
    }

    /// Pending override for a cluster.
    pub fn get_override(&self, tenant_id: &str, index_name: &str, cluster_id: i64) -> Option<u32> {
        let key = TenantIndexKey::new(tenant_id, index_name);
        self.overrides
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .and_then(|clusters| clusters.get(&cluster_id).copied())
    }

    /// All overrides for one tenant index.
    pub fn overrides_for(&self, tenant_id: &str, index_name: &str) -> HashMap<i64, u32> {
        let key = TenantIndexKey::new(tenant_id, index_name);
        self.overrides
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every override for one tenant index.
    pub fn clear_overrides(&self, tenant_id: &str, index_name: &str) {
        let key = TenantIndexKey::new(tenant_id, index_name);
        self.overrides
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    pub fn stats(&self) -> AdvisoryStats {
        self.counters.snapshot()
    }
}

impl Default for TtlAdvisor {
    fn default() -> Self {
        Self::new(None)
    }
}
