//! Tenant/index addressing

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one index belonging to one tenant.
///
/// Displayed as `tenant:index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantIndexKey {
    pub tenant_id: String,
    pub index_name: String,
}

impl TenantIndexKey {
    pub fn new(tenant_id: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            index_name: index_name.into(),
        }
    }
}

impl fmt::Display for TenantIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.index_name)
    }
}
