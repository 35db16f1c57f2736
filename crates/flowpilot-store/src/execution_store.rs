//! Workflow execution records and rolling per-workflow metrics.
//!
//! Structured parts of an execution (trigger snapshot, analysis, executed
//! actions, results, error) are stored as JSON text produced by the engine's
//! own serde types, and timestamps as nanosecond RFC 3339, so a reloaded
//! record is identical to the one that was saved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::{Database, decode_opt_ts, decode_ts, encode_ts};
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A persisted workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredExecution {
    pub id: String,
    pub owner_id: String,
    pub workflow_id: String,
    /// Snake-case status tag (`pending` .. `cancelled`).
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub trigger_data: serde_json::Value,
    pub analysis_data: serde_json::Value,
    pub selected_suggestions: Vec<String>,
    pub executed_actions: serde_json::Value,
    pub result: serde_json::Value,
    pub error: Option<serde_json::Value>,
}

/// Rolling aggregate over every finished execution of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMetrics {
    pub workflow_id: String,
    pub execution_count: i64,
    pub success_count: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub time_saved_minutes: f64,
    pub last_executed: Option<DateTime<Utc>>,
}

// ═══════════════════════════════════════════════════════════════════════
//  ExecutionStore
// ═══════════════════════════════════════════════════════════════════════

const COLUMNS: &str = "id, owner_id, workflow_id, status, started_at, completed_at, trigger_data, \
                       analysis_data, selected_suggestions, executed_actions, result, error";

#[derive(Clone)]
pub struct ExecutionStore {
    db: Database,
}

impl ExecutionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or fully replace an execution record.
    #[instrument(skip(self, execution), fields(execution_id = %execution.id, status = %execution.status))]
    pub async fn save(&self, execution: &StoredExecution) -> StoreResult<()> {
        let e = execution.clone();
        let trigger_data = serde_json::to_string(&e.trigger_data)?;
        let analysis_data = serde_json::to_string(&e.analysis_data)?;
        let selected = serde_json::to_string(&e.selected_suggestions)?;
        let actions = serde_json::to_string(&e.executed_actions)?;
        let result = serde_json::to_string(&e.result)?;
        let error = e.error.as_ref().map(serde_json::to_string).transpose()?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO workflow_executions (id, owner_id, workflow_id, status, started_at, completed_at, \
                     trigger_data, analysis_data, selected_suggestions, executed_actions, result, error) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                     ON CONFLICT(id) DO UPDATE SET status = excluded.status, completed_at = excluded.completed_at, \
                     trigger_data = excluded.trigger_data, analysis_data = excluded.analysis_data, \
                     selected_suggestions = excluded.selected_suggestions, \
                     executed_actions = excluded.executed_actions, result = excluded.result, error = excluded.error \
                     WHERE workflow_executions.status != 'cancelled'",
                    rusqlite::params![
                        e.id,
                        e.owner_id,
                        e.workflow_id,
                        e.status,
                        encode_ts(&e.started_at),
                        e.completed_at.as_ref().map(encode_ts),
                        trigger_data,
                        analysis_data,
                        selected,
                        actions,
                        result,
                        error,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(execution_id = %execution.id, "execution saved");
        Ok(())
    }

    /// Update only the status (and optionally completion time) of a record.
    ///
    /// Cancelled records are frozen: the update is skipped and `false` is
    /// returned.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: &str,
        status: &str,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let id = id.to_string();
        let status = status.to_string();
        let completed = completed_at.as_ref().map(encode_ts);
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflow_executions SET status = ?2, completed_at = COALESCE(?3, completed_at) \
                     WHERE id = ?1 AND status != 'cancelled'",
                    rusqlite::params![id, status, completed],
                )?;
                if updated == 1 {
                    return Ok(true);
                }
                let exists: i64 = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM workflow_executions WHERE id = ?1)",
                    rusqlite::params![id],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Err(StoreError::NotFound {
                        entity: "execution",
                        id,
                    });
                }
                Ok(false)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredExecution>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {COLUMNS} FROM workflow_executions WHERE id = ?1"),
                    rusqlite::params![id],
                    ExecutionRow::from_row,
                );
                match result {
                    Ok(row) => row.into_stored_execution().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Most recent executions of an owner, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_owner(&self, owner_id: &str, limit: i64) -> StoreResult<Vec<StoredExecution>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM workflow_executions WHERE owner_id = ?1 \
                     ORDER BY started_at DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id, limit], ExecutionRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(ExecutionRow::into_stored_execution).collect()
            })
            .await
    }

    /// Executions of one workflow started at or after `since`, oldest first.
    #[instrument(skip(self))]
    pub async fn list_for_workflow_since(
        &self,
        workflow_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredExecution>> {
        let workflow_id = workflow_id.to_string();
        let since = encode_ts(&since);
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM workflow_executions WHERE workflow_id = ?1 AND started_at >= ?2 \
                     ORDER BY started_at ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id, since], ExecutionRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(ExecutionRow::into_stored_execution).collect()
            })
            .await
    }

    /// Count executions per status; used by the `status` command.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self) -> StoreResult<Vec<(String, i64)>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT status, COUNT(*) FROM workflow_executions GROUP BY status ORDER BY status",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    // ── metrics ──────────────────────────────────────────────────────

    /// Fold one finished execution into the workflow's rolling metrics.
    ///
    /// Runs read-modify-write inside a transaction so concurrent executions
    /// of the same workflow do not lose updates.
    #[instrument(skip(self))]
    pub async fn record_metrics(
        &self,
        workflow_id: &str,
        success: bool,
        duration_ms: f64,
        time_saved_minutes: f64,
        executed_at: DateTime<Utc>,
    ) -> StoreResult<StoredMetrics> {
        let workflow_id = workflow_id.to_string();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let previous = read_metrics(&tx, &workflow_id)?;

                let (count, successes, avg, saved) = match &previous {
                    Some(m) => (m.execution_count, m.success_count, m.avg_duration_ms, m.time_saved_minutes),
                    None => (0, 0, 0.0, 0.0),
                };
                let count = count + 1;
                let successes = successes + i64::from(success);
                let metrics = StoredMetrics {
                    workflow_id: workflow_id.clone(),
                    execution_count: count,
                    success_count: successes,
                    success_rate: successes as f64 / count as f64,
                    avg_duration_ms: avg + (duration_ms - avg) / count as f64,
                    time_saved_minutes: saved + time_saved_minutes,
                    last_executed: Some(executed_at),
                };

                tx.execute(
                    "INSERT INTO workflow_metrics (workflow_id, execution_count, success_count, success_rate, \
                     avg_duration_ms, time_saved_minutes, last_executed) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(workflow_id) DO UPDATE SET execution_count = excluded.execution_count, \
                     success_count = excluded.success_count, success_rate = excluded.success_rate, \
                     avg_duration_ms = excluded.avg_duration_ms, time_saved_minutes = excluded.time_saved_minutes, \
                     last_executed = excluded.last_executed",
                    rusqlite::params![
                        metrics.workflow_id,
                        metrics.execution_count,
                        metrics.success_count,
                        metrics.success_rate,
                        metrics.avg_duration_ms,
                        metrics.time_saved_minutes,
                        metrics.last_executed.as_ref().map(encode_ts),
                    ],
                )?;
                tx.commit()?;
                Ok(metrics)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_metrics(&self, workflow_id: &str) -> StoreResult<Option<StoredMetrics>> {
        let workflow_id = workflow_id.to_string();
        self.db.execute(move |conn| read_metrics(conn, &workflow_id)).await
    }
}

fn read_metrics(conn: &rusqlite::Connection, workflow_id: &str) -> StoreResult<Option<StoredMetrics>> {
    let result = conn.query_row(
        "SELECT workflow_id, execution_count, success_count, success_rate, avg_duration_ms, \
         time_saved_minutes, last_executed FROM workflow_metrics WHERE workflow_id = ?1",
        rusqlite::params![workflow_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        },
    );
    match result {
        Ok((workflow_id, execution_count, success_count, success_rate, avg_duration_ms, time_saved_minutes, last)) => {
            Ok(Some(StoredMetrics {
                workflow_id,
                execution_count,
                success_count,
                success_rate,
                avg_duration_ms,
                time_saved_minutes,
                last_executed: decode_opt_ts(last)?,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Sqlite(e)),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

struct ExecutionRow {
    id: String,
    owner_id: String,
    workflow_id: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    trigger_data: String,
    analysis_data: String,
    selected_suggestions: String,
    executed_actions: String,
    result: String,
    error: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            workflow_id: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            trigger_data: row.get(6)?,
            analysis_data: row.get(7)?,
            selected_suggestions: row.get(8)?,
            executed_actions: row.get(9)?,
            result: row.get(10)?,
            error: row.get(11)?,
        })
    }

    fn into_stored_execution(self) -> StoreResult<StoredExecution> {
        Ok(StoredExecution {
            id: self.id,
            owner_id: self.owner_id,
            workflow_id: self.workflow_id,
            status: self.status,
            started_at: decode_ts(&self.started_at)?,
            completed_at: decode_opt_ts(self.completed_at)?,
            trigger_data: serde_json::from_str(&self.trigger_data)?,
            analysis_data: serde_json::from_str(&self.analysis_data)?,
            selected_suggestions: serde_json::from_str(&self.selected_suggestions)?,
            executed_actions: serde_json::from_str(&self.executed_actions)?,
            result: serde_json::from_str(&self.result)?,
            error: self.error.map(|e| serde_json::from_str(&e)).transpose()?,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn setup() -> ExecutionStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        ExecutionStore::new(db)
    }

    fn execution(id: &str, workflow: &str, started_at: DateTime<Utc>) -> StoredExecution {
        StoredExecution {
            id: id.into(),
            owner_id: "o1".into(),
            workflow_id: workflow.into(),
            status: "pending".into(),
            started_at,
            completed_at: None,
            trigger_data: json!({ "type": "manual" }),
            analysis_data: json!({}),
            selected_suggestions: vec![],
            executed_actions: json!([]),
            result: json!([]),
            error: None,
        }
    }

    #[tokio::test]
    async fn save_get_and_replace() {
        let store = setup().await;
        let mut e = execution("e1", "w1", Utc::now());
        store.save(&e).await.unwrap();
        assert_eq!(store.get("e1").await.unwrap().unwrap(), e);

        e.status = "completed".into();
        e.completed_at = Some(Utc::now());
        e.selected_suggestions = vec!["s1".into()];
        e.executed_actions = json!([{ "action_id": "a1", "status": "success" }]);
        e.error = Some(json!({ "code": "x" }));
        store.save(&e).await.unwrap();
        assert_eq!(store.get("e1").await.unwrap().unwrap(), e);
    }

    #[tokio::test]
    async fn update_status_keeps_other_fields() {
        let store = setup().await;
        let e = execution("e1", "w1", Utc::now());
        store.save(&e).await.unwrap();

        assert!(store.update_status("e1", "analyzing", None).await.unwrap());
        let fetched = store.get("e1").await.unwrap().unwrap();
        assert_eq!(fetched.status, "analyzing");
        assert!(fetched.completed_at.is_none());
        assert_eq!(fetched.trigger_data, e.trigger_data);

        assert!(store.update_status("nope", "failed", None).await.is_err());
    }

    #[tokio::test]
    async fn cancelled_records_are_frozen() {
        let store = setup().await;
        let mut e = execution("e1", "w1", Utc::now());
        e.status = "cancelled".into();
        store.save(&e).await.unwrap();

        assert!(!store.update_status("e1", "executing", None).await.unwrap());
        let mut late = e.clone();
        late.status = "completed".into();
        store.save(&late).await.unwrap();
        assert_eq!(store.get("e1").await.unwrap().unwrap().status, "cancelled");
    }

    #[tokio::test]
    async fn window_and_owner_queries() {
        let store = setup().await;
        let now = Utc::now();
        store.save(&execution("old", "w1", now - Duration::days(40))).await.unwrap();
        store.save(&execution("recent", "w1", now - Duration::days(2))).await.unwrap();
        store.save(&execution("other", "w2", now)).await.unwrap();

        let recent = store
            .list_for_workflow_since("w1", now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "recent");

        let latest = store.list_for_owner("o1", 2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].id, "other");

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts, vec![("pending".to_string(), 3)]);
    }

    #[tokio::test]
    async fn metrics_roll_forward() {
        let store = setup().await;
        assert!(store.get_metrics("w1").await.unwrap().is_none());

        let at = Utc::now();
        store.record_metrics("w1", true, 100.0, 15.0, at).await.unwrap();
        let m = store.record_metrics("w1", false, 300.0, 0.0, at).await.unwrap();

        assert_eq!(m.execution_count, 2);
        assert_eq!(m.success_count, 1);
        assert!((m.success_rate - 0.5).abs() < 1e-9);
        assert!((m.avg_duration_ms - 200.0).abs() < 1e-9);
        assert!((m.time_saved_minutes - 15.0).abs() < 1e-9);
        assert_eq!(store.get_metrics("w1").await.unwrap().unwrap(), m);
    }
}
