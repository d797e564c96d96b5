//! Append-only log of policy decisions for offline training.
//!
//! One JSON object per line:
//!
//! ```json
//! {"timestamp": 1717000000.123, "tenant_id": "t1", "query_features": {},
//!  "system_metrics": {"qps": 120.0, "miss_rate": 0.3, ...},
//!  "decision": {"admission_threshold": 0.1, "ttl_seconds": 60,
//!               "eviction_priority": 0, "bandit_action": 0}}
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::Result;
use crate::types::{PolicyDecision, SystemMetricsSnapshot};

/// A decision as it was served, including the bandit arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoggedDecision {
    pub admission_threshold: f64,
    pub ttl_seconds: u32,
    pub eviction_priority: u8,
    pub bandit_action: u8,
}

impl LoggedDecision {
    pub fn new(decision: &PolicyDecision, bandit_action: u8) -> Self {
        Self {
            admission_threshold: decision.admission_threshold,
            ttl_seconds: decision.ttl_seconds,
            eviction_priority: decision.eviction_priority,
            bandit_action,
        }
    }
}

/// One log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Unix time in seconds.
    pub timestamp: f64,
    pub tenant_id: String,
    #[serde(default)]
    pub query_features: Map<String, Value>,
    pub system_metrics: SystemMetricsSnapshot,
    pub decision: LoggedDecision,
}

impl DecisionRecord {
    pub fn now(
        tenant_id: impl Into<String>,
        system_metrics: SystemMetricsSnapshot,
        decision: LoggedDecision,
    ) -> Self {
        Self {
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            tenant_id: tenant_id.into(),
            query_features: Map::new(),
            system_metrics,
            decision,
        }
    }
}

/// Destination for decision records. Must not fail the caller.
pub trait DecisionSink: Send + Sync {
    fn log(&self, record: &DecisionRecord);
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDecisionSink;

impl DecisionSink for NullDecisionSink {
    fn log(&self, _record: &DecisionRecord) {}
}

/// JSON Lines file sink.
pub struct JsonlDecisionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlDecisionLog {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&self, record: &DecisionRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(&line)?;
        Ok(())
    }
}

impl DecisionSink for JsonlDecisionLog {
    fn log(&self, record: &DecisionRecord) {
        if let Err(e) = self.write_record(record) {
            warn!(path = %self.path.display(), error = %e, "failed to write decision log");
        }
    }
}

/// Read a decision log back, skipping malformed lines.
pub fn read_decision_log(path: &Path) -> Result<Vec<DecisionRecord>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/query_log.jsonl");
        let log = JsonlDecisionLog::open(&path).unwrap();

        let metrics = SystemMetricsSnapshot::new(100.0, 0.2, 30.0, 40.0, 5.0);
        log.log(&DecisionRecord::now(
            "t1",
            metrics,
            LoggedDecision::new(&PolicyDecision::DEFAULT, 0),
        ));
        log.log(&DecisionRecord::now(
            "t2",
            metrics,
            LoggedDecision::new(&PolicyDecision::AGGRESSIVE, 1),
        ));

        let records = read_decision_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tenant_id, "t1");
        assert_eq!(records[1].decision.bandit_action, 1);
        assert_eq!(records[1].decision.ttl_seconds, 300);
        assert_eq!(records[0].system_metrics, metrics);
    }

    #[test]
    fn record_field_names_match_trainer_input() {
        let record = DecisionRecord::now(
            "t1",
            SystemMetricsSnapshot::default(),
            LoggedDecision::new(&PolicyDecision::DEFAULT, 0),
        );
        let value = serde_json::to_value(&record).unwrap();
        for field in ["timestamp", "tenant_id", "query_features", "system_metrics", "decision"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert!(value["system_metrics"].get("latency_p99_ms").is_some());
        assert!(value["decision"].get("bandit_action").is_some());
    }
}
