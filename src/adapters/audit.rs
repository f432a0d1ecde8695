use crate::core::AuditLog;
use crate::domain::audit::{AuditRecord, BatchLogEntry, BatchStepEntry, LastRunQuery};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn next_batch_id(records: &[AuditRecord]) -> i64 {
    records
        .iter()
        .filter_map(|r| match r {
            AuditRecord::Batch { entry, .. } => entry.batch_id,
            AuditRecord::Step { .. } => None,
        })
        .max()
        .unwrap_or(0)
        + 1
}

fn last_successful_run(
    records: &[AuditRecord],
    query: &LastRunQuery,
    today: NaiveDate,
) -> Option<NaiveDate> {
    let systems: HashMap<i64, &str> = records
        .iter()
        .filter_map(|r| match r {
            AuditRecord::Batch { entry, .. } => {
                entry.batch_id.map(|id| (id, entry.target_system.as_str()))
            }
            AuditRecord::Step { .. } => None,
        })
        .collect();

    records
        .iter()
        .filter_map(|r| match r {
            AuditRecord::Step { logged_at, entry } => Some((logged_at.date_naive(), entry)),
            AuditRecord::Batch { .. } => None,
        })
        .filter(|(_, step)| {
            step.step_status == "Success"
                && step.target_object == query.endpoint_name
                && step.target_schema == query.folder
                && systems.get(&step.batch_id).copied() == Some(query.target_system.as_str())
        })
        .map(|(date, _)| date)
        .filter(|date| !(query.exclude_today && *date == today))
        .max()
}

fn stamp(entry: &BatchLogEntry, batch_id: i64) -> AuditRecord {
    let mut entry = entry.clone();
    entry.batch_id = Some(batch_id);
    AuditRecord::Batch {
        logged_at: Utc::now(),
        entry,
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS batch_log (
    batch_id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_name TEXT NOT NULL,
    orchestration_tool TEXT NOT NULL,
    project TEXT NOT NULL,
    source_name TEXT NOT NULL,
    status TEXT NOT NULL,
    target_system TEXT NOT NULL,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS batch_step_log (
    step_id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES batch_log(batch_id),
    step_name TEXT NOT NULL,
    step_status TEXT NOT NULL,
    source_schema TEXT NOT NULL,
    root_folder_name TEXT NOT NULL,
    target_update_strategy TEXT NOT NULL,
    target_schema TEXT NOT NULL,
    target_object TEXT NOT NULL,
    target_file_count INTEGER,
    started_at TEXT NOT NULL,
    started_on TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_step_last_run
    ON batch_step_log(target_object, target_schema, step_status);
"#;

const LAST_RUN_SQL: &str = r#"
SELECT MAX(s.started_on)
FROM batch_step_log s
JOIN batch_log b ON b.batch_id = s.batch_id
WHERE s.step_status = 'Success'
  AND s.target_object = ?1
  AND s.target_schema = ?2
  AND b.target_system = ?3
  AND (?4 = 0 OR s.started_on <> ?5)
"#;

/// SQLite 稽核資料庫，batch id 由 AUTOINCREMENT 配發，多個 runner 共用同一檔案也不會重號
pub struct SqliteAuditLog {
    db: Mutex<Connection>,
}

impl SqliteAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // 其他 runner 寫入時等待而不是直接失敗
        conn.busy_timeout(Duration::from_secs(30))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| EtlError::AuditError {
            message: format!("Failed to acquire audit database lock: {}", e),
        })
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn log_batch(&self, entry: &BatchLogEntry) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;

        let batch_id = match entry.batch_id {
            Some(id) => {
                let updated = conn.execute(
                    "UPDATE batch_log SET status = ?1, updated_at = ?2 WHERE batch_id = ?3",
                    params![entry.status, now, id],
                )?;
                if updated == 0 {
                    return Err(EtlError::AuditError {
                        message: format!("batch {} was never opened", id),
                    });
                }
                id
            }
            None => {
                conn.execute(
                    r#"
                    INSERT INTO batch_log (
                        pipeline_name, orchestration_tool, project, source_name,
                        status, target_system, started_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                    "#,
                    params![
                        entry.pipeline_name,
                        entry.orchestration_tool,
                        entry.project,
                        entry.source_name,
                        entry.status,
                        entry.target_system,
                        now,
                    ],
                )?;
                conn.last_insert_rowid()
            }
        };

        tracing::debug!("📝 batch {} -> {}", batch_id, entry.status);
        Ok(batch_id)
    }

    async fn log_batch_step(&self, entry: &BatchStepEntry) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn()?;
        let file_count = entry.target_file_count.map(|n| n as i64);

        // Begin 開新列，其餘狀態更新同一步驟最新的那一列
        let updated = if entry.step_status == "Begin" {
            0
        } else {
            conn.execute(
                r#"
                UPDATE batch_step_log
                SET step_status = ?1, target_file_count = ?2, updated_at = ?3
                WHERE step_id = (
                    SELECT MAX(step_id) FROM batch_step_log
                    WHERE batch_id = ?4 AND step_name = ?5
                )
                "#,
                params![
                    entry.step_status,
                    file_count,
                    now.to_rfc3339(),
                    entry.batch_id,
                    entry.step_name,
                ],
            )?
        };

        if updated == 0 {
            conn.execute(
                r#"
                INSERT INTO batch_step_log (
                    batch_id, step_name, step_status, source_schema, root_folder_name,
                    target_update_strategy, target_schema, target_object, target_file_count,
                    started_at, started_on, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?10)
                "#,
                params![
                    entry.batch_id,
                    entry.step_name,
                    entry.step_status,
                    entry.source_schema,
                    entry.root_folder_name,
                    entry.target_update_strategy,
                    entry.target_schema,
                    entry.target_object,
                    file_count,
                    now.to_rfc3339(),
                    now.date_naive().format(DATE_FORMAT).to_string(),
                ],
            )?;
        }

        tracing::debug!(
            "📝 batch {} step '{}' -> {}",
            entry.batch_id,
            entry.step_name,
            entry.step_status
        );
        Ok(())
    }

    async fn get_last_batch_run(&self, query: &LastRunQuery) -> Result<Option<NaiveDate>> {
        let today = Utc::now().date_naive().format(DATE_FORMAT).to_string();
        let conn = self.conn()?;

        let last: Option<String> = conn
            .query_row(
                LAST_RUN_SQL,
                params![
                    query.endpoint_name,
                    query.folder,
                    query.target_system,
                    query.exclude_today,
                    today,
                ],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();

        last.map(|date| {
            NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| EtlError::AuditError {
                message: format!("bad started_on '{}' in batch_step_log: {}", date, e),
            })
        })
        .transpose()
    }
}

/// 測試用，只存在記憶體
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: tokio::sync::Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    pub async fn batch_statuses(&self) -> Vec<String> {
        self.records
            .lock()
            .await
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Batch { entry, .. } => Some(entry.status.clone()),
                AuditRecord::Step { .. } => None,
            })
            .collect()
    }

    pub async fn steps(&self) -> Vec<BatchStepEntry> {
        self.records
            .lock()
            .await
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Step { entry, .. } => Some(entry.clone()),
                AuditRecord::Batch { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn log_batch(&self, entry: &BatchLogEntry) -> Result<i64> {
        let mut records = self.records.lock().await;
        let batch_id = entry.batch_id.unwrap_or_else(|| next_batch_id(&records));
        records.push(stamp(entry, batch_id));
        Ok(batch_id)
    }

    async fn log_batch_step(&self, entry: &BatchStepEntry) -> Result<()> {
        self.records.lock().await.push(AuditRecord::Step {
            logged_at: Utc::now(),
            entry: entry.clone(),
        });
        Ok(())
    }

    async fn get_last_batch_run(&self, query: &LastRunQuery) -> Result<Option<NaiveDate>> {
        let records = self.records.lock().await;
        Ok(last_successful_run(&records, query, Utc::now().date_naive()))
    }
}
