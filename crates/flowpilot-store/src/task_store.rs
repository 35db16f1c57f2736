//! Tasks and reminders.
//!
//! Besides CRUD, this store answers the workload questions asked during
//! analysis: how many tasks are open, how many are overdue, and which tasks
//! were created recently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::{Database, decode_opt_ts, decode_ts, encode_ts};
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTask {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    /// `todo`, `in_progress`, `blocked`, `completed` or `cancelled`.
    pub status: String,
    /// `low`, `medium`, `high` or `urgent`.
    pub priority: String,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`TaskStore::create`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
}

/// Partial update for [`TaskStore::update`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReminder {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub message: Option<String>,
    pub remind_at: DateTime<Utc>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
//  TaskStore
// ═══════════════════════════════════════════════════════════════════════

const TASK_COLUMNS: &str =
    "id, owner_id, title, description, status, priority, due_date, assignee, created_at, updated_at";

#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, task), fields(owner_id = %task.owner_id))]
    pub async fn create(&self, task: NewTask) -> StoreResult<StoredTask> {
        if task.title.trim().is_empty() {
            return Err(StoreError::InvalidArgument("task title must not be empty".into()));
        }
        let now = Utc::now();
        let stored = StoredTask {
            id: Uuid::now_v7().to_string(),
            owner_id: task.owner_id,
            title: task.title,
            description: task.description,
            status: task.status.unwrap_or_else(|| "todo".into()),
            priority: task.priority.unwrap_or_else(|| "medium".into()),
            due_date: task.due_date,
            assignee: task.assignee,
            created_at: now,
            updated_at: now,
        };

        let t = stored.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, owner_id, title, description, status, priority, due_date, assignee, \
                     created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        t.id,
                        t.owner_id,
                        t.title,
                        t.description,
                        t.status,
                        t.priority,
                        t.due_date.as_ref().map(encode_ts),
                        t.assignee,
                        encode_ts(&t.created_at),
                        encode_ts(&t.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(task_id = %stored.id, "task created");
        Ok(stored)
    }

    /// Apply a partial update and return the updated task.
    #[instrument(skip(self, update))]
    pub async fn update(&self, id: &str, update: TaskUpdate) -> StoreResult<StoredTask> {
        let mut task = self.get(id).await?.ok_or_else(|| StoreError::NotFound {
            entity: "task",
            id: id.to_string(),
        })?;

        if let Some(title) = update.title {
            task.title = title;
        }
        if let Some(description) = update.description {
            task.description = Some(description);
        }
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(due) = update.due_date {
            task.due_date = Some(due);
        }
        if let Some(assignee) = update.assignee {
            task.assignee = Some(assignee);
        }
        task.updated_at = Utc::now();

        let t = task.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE tasks SET title = ?2, description = ?3, status = ?4, priority = ?5, due_date = ?6, \
                     assignee = ?7, updated_at = ?8 WHERE id = ?1",
                    rusqlite::params![
                        t.id,
                        t.title,
                        t.description,
                        t.status,
                        t.priority,
                        t.due_date.as_ref().map(encode_ts),
                        t.assignee,
                        encode_ts(&t.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredTask>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    rusqlite::params![id],
                    TaskRow::from_row,
                );
                match result {
                    Ok(row) => row.into_stored_task().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Number of non-terminal tasks of an owner.
    #[instrument(skip(self))]
    pub async fn count_open(&self, owner_id: &str) -> StoreResult<i64> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM tasks WHERE owner_id = ?1 AND status NOT IN ('completed','cancelled')",
                    rusqlite::params![owner_id],
                    |row| row.get(0),
                )?)
            })
            .await
    }

    /// Number of non-terminal tasks whose due date lies before `now`.
    #[instrument(skip(self))]
    pub async fn count_overdue(&self, owner_id: &str, now: DateTime<Utc>) -> StoreResult<i64> {
        let owner_id = owner_id.to_string();
        let now = encode_ts(&now);
        self.db
            .execute(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM tasks WHERE owner_id = ?1 AND due_date IS NOT NULL AND due_date < ?2 \
                     AND status NOT IN ('completed','cancelled')",
                    rusqlite::params![owner_id, now],
                    |row| row.get(0),
                )?)
            })
            .await
    }

    /// Tasks created at or after `since`, newest first.
    #[instrument(skip(self))]
    pub async fn created_since(&self, owner_id: &str, since: DateTime<Utc>) -> StoreResult<Vec<StoredTask>> {
        let owner_id = owner_id.to_string();
        let since = encode_ts(&since);
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ?1 AND created_at >= ?2 \
                     ORDER BY created_at DESC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id, since], TaskRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(TaskRow::into_stored_task).collect()
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_for_owner(&self, owner_id: &str, limit: i64) -> StoreResult<Vec<StoredTask>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id, limit], TaskRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(TaskRow::into_stored_task).collect()
            })
            .await
    }

    // ── reminders ────────────────────────────────────────────────────

    #[instrument(skip(self, message))]
    pub async fn create_reminder(
        &self,
        owner_id: &str,
        title: &str,
        message: Option<String>,
        remind_at: DateTime<Utc>,
        task_id: Option<String>,
    ) -> StoreResult<StoredReminder> {
        let reminder = StoredReminder {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            message,
            remind_at,
            task_id,
            created_at: Utc::now(),
        };
        let r = reminder.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO reminders (id, owner_id, title, message, remind_at, task_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        r.id,
                        r.owner_id,
                        r.title,
                        r.message,
                        encode_ts(&r.remind_at),
                        r.task_id,
                        encode_ts(&r.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(reminder)
    }

    #[instrument(skip(self))]
    pub async fn list_reminders(&self, owner_id: &str) -> StoreResult<Vec<StoredReminder>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, title, message, remind_at, task_id, created_at FROM reminders \
                     WHERE owner_id = ?1 ORDER BY remind_at ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|(id, owner_id, title, message, remind_at, task_id, created_at)| {
                        Ok(StoredReminder {
                            id,
                            owner_id,
                            title,
                            message,
                            remind_at: decode_ts(&remind_at)?,
                            task_id,
                            created_at: decode_ts(&created_at)?,
                        })
                    })
                    .collect()
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

struct TaskRow {
    id: String,
    owner_id: String,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    due_date: Option<String>,
    assignee: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            due_date: row.get(6)?,
            assignee: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_stored_task(self) -> StoreResult<StoredTask> {
        Ok(StoredTask {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            due_date: decode_opt_ts(self.due_date)?,
            assignee: self.assignee,
            created_at: decode_ts(&self.created_at)?,
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup() -> TaskStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        TaskStore::new(db)
    }

    fn new_task(owner: &str, title: &str) -> NewTask {
        NewTask {
            owner_id: owner.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_defaults_and_get() {
        let store = setup().await;
        let t = store.create(new_task("o1", "Write report")).await.unwrap();
        assert_eq!(t.status, "todo");
        assert_eq!(t.priority, "medium");
        assert_eq!(store.get(&t.id).await.unwrap().unwrap(), t);
    }

    #[tokio::test]
    async fn empty_title_rejected() {
        let store = setup().await;
        assert!(matches!(
            store.create(new_task("o1", "  ")).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn open_and_overdue_counts() {
        let store = setup().await;
        let now = Utc::now();
        store
            .create(NewTask {
                due_date: Some(now - Duration::days(1)),
                ..new_task("o1", "late")
            })
            .await
            .unwrap();
        let done = store
            .create(NewTask {
                due_date: Some(now - Duration::days(1)),
                ..new_task("o1", "late but done")
            })
            .await
            .unwrap();
        store
            .update(
                &done.id,
                TaskUpdate {
                    status: Some("completed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .create(NewTask {
                due_date: Some(now + Duration::days(3)),
                ..new_task("o1", "future")
            })
            .await
            .unwrap();
        store.create(new_task("o2", "other owner")).await.unwrap();

        assert_eq!(store.count_open("o1").await.unwrap(), 2);
        assert_eq!(store.count_overdue("o1", now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_missing_task_fails() {
        let store = setup().await;
        assert!(matches!(
            store.update("nope", TaskUpdate::default()).await,
            Err(StoreError::NotFound { entity: "task", .. })
        ));
    }

    #[tokio::test]
    async fn invalid_status_rejected_by_schema() {
        let store = setup().await;
        let t = store.create(new_task("o1", "x")).await.unwrap();
        let result = store
            .update(
                &t.id,
                TaskUpdate {
                    status: Some("someday".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn created_since_window() {
        let store = setup().await;
        store.create(new_task("o1", "a")).await.unwrap();
        store.create(new_task("o1", "b")).await.unwrap();
        let recent = store
            .created_since("o1", Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert!(
            store
                .created_since("o1", Utc::now() + Duration::days(1))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn reminders_roundtrip() {
        let store = setup().await;
        let at = Utc::now() + Duration::hours(2);
        let r = store
            .create_reminder("o1", "Call back", Some("re: invoice".into()), at, None)
            .await
            .unwrap();
        let list = store.list_reminders("o1").await.unwrap();
        assert_eq!(list, vec![r]);
    }
}
