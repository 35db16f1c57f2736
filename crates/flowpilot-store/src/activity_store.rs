//! Activity log and user notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::db::{Database, decode_ts, encode_ts};
use crate::error::StoreResult;

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// One entry of an owner's activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub owner_id: String,
    /// Short machine tag, e.g. `task_created` or `workflow_completed`.
    pub kind: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNotification {
    pub id: String,
    pub owner_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
//  ActivityStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ActivityStore {
    db: Database,
}

impl ActivityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an entry to the activity log and return its row id.
    #[instrument(skip(self, metadata))]
    pub async fn log(
        &self,
        owner_id: &str,
        kind: &str,
        description: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<i64> {
        let owner_id = owner_id.to_string();
        let kind = kind.to_string();
        let description = description.to_string();
        let metadata = serde_json::to_string(&metadata)?;
        let now = encode_ts(&Utc::now());
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO activity_log (owner_id, kind, description, metadata, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![owner_id, kind, description, metadata, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    /// The `limit` most recent entries, newest first.
    #[instrument(skip(self))]
    pub async fn recent(&self, owner_id: &str, limit: i64) -> StoreResult<Vec<ActivityEntry>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, kind, description, metadata, created_at FROM activity_log \
                     WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id, limit], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|(id, owner_id, kind, description, metadata, created)| {
                        Ok(ActivityEntry {
                            id,
                            owner_id,
                            kind,
                            description,
                            metadata: serde_json::from_str(&metadata)?,
                            created_at: decode_ts(&created)?,
                        })
                    })
                    .collect()
            })
            .await
    }

    // ── notifications ────────────────────────────────────────────────

    #[instrument(skip(self, message, metadata))]
    pub async fn create_notification(
        &self,
        owner_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<StoredNotification> {
        let notification = StoredNotification {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            metadata,
            read: false,
            created_at: Utc::now(),
        };
        let n = notification.clone();
        let metadata = serde_json::to_string(&n.metadata)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO notifications (id, owner_id, kind, title, message, metadata, read, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                    rusqlite::params![
                        n.id,
                        n.owner_id,
                        n.kind,
                        n.title,
                        n.message,
                        metadata,
                        encode_ts(&n.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(notification)
    }

    #[instrument(skip(self))]
    pub async fn list_notifications(
        &self,
        owner_id: &str,
        unread_only: bool,
    ) -> StoreResult<Vec<StoredNotification>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, kind, title, message, metadata, read, created_at FROM notifications \
                     WHERE owner_id = ?1 AND (?2 = 0 OR read = 0) ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id, unread_only], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, bool>(6)?,
                            row.get::<_, String>(7)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|(id, owner_id, kind, title, message, metadata, read, created)| {
                        Ok(StoredNotification {
                            id,
                            owner_id,
                            kind,
                            title,
                            message,
                            metadata: serde_json::from_str(&metadata)?,
                            read,
                            created_at: decode_ts(&created)?,
                        })
                    })
                    .collect()
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn mark_read(&self, notification_id: &str) -> StoreResult<bool> {
        let id = notification_id.to_string();
        self.db
            .execute(move |conn| {
                let n = conn.execute(
                    "UPDATE notifications SET read = 1 WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(n > 0)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
