use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 批次層級的稽核紀錄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLogEntry {
    pub batch_id: Option<i64>,
    pub pipeline_name: String,
    pub orchestration_tool: String,
    pub project: String,
    pub source_name: String,
    pub status: String,
    pub target_system: String,
}

/// 批次步驟（單一端點）的稽核紀錄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStepEntry {
    pub batch_id: i64,
    pub step_name: String,
    pub step_status: String,
    pub source_schema: String,
    pub root_folder_name: String,
    pub target_update_strategy: String,
    pub target_schema: String,
    pub target_object: String,
    pub target_file_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRunQuery {
    pub target_system: String,
    pub folder: String,
    pub endpoint_name: String,
    pub exclude_today: bool,
}

/// History kept by the in-memory audit log, one entry per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditRecord {
    /// `entry.batch_id` is always populated once stored.
    Batch {
        logged_at: DateTime<Utc>,
        entry: BatchLogEntry,
    },
    Step {
        logged_at: DateTime<Utc>,
        entry: BatchStepEntry,
    },
}
