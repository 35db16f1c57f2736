//! Per-owner account state consulted by action preconditions: granted
//! permission scopes, third-party integrations, and which data categories
//! hold any records.  Also keeps content produced by text generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::{Database, decode_ts, encode_ts};
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIntegration {
    pub owner_id: String,
    pub provider: String,
    /// `connected`, `disconnected` or `error`.
    pub status: String,
    pub active: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredContent {
    pub id: String,
    pub owner_id: String,
    pub content_type: String,
    pub prompt: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Data categories understood by [`AccountStore::data_available`], mapped to
/// the table that backs each one.
const DATA_CATEGORIES: &[(&str, &str)] = &[
    ("tasks", "tasks"),
    ("calendar", "calendar_events"),
    ("emails", "emails"),
    ("activity", "activity_log"),
    ("executions", "workflow_executions"),
];

// ═══════════════════════════════════════════════════════════════════════
//  AccountStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AccountStore {
    db: Database,
}

impl AccountStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ── permissions ──────────────────────────────────────────────────

    /// Grant a scope.  Granting twice is a no-op.
    #[instrument(skip(self))]
    pub async fn grant_permission(&self, owner_id: &str, scope: &str) -> StoreResult<()> {
        let owner_id = owner_id.to_string();
        let scope = scope.to_string();
        let now = encode_ts(&Utc::now());
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO permissions (owner_id, scope, granted_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![owner_id, scope, now],
                )?;
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn revoke_permission(&self, owner_id: &str, scope: &str) -> StoreResult<bool> {
        let owner_id = owner_id.to_string();
        let scope = scope.to_string();
        self.db
            .execute(move |conn| {
                let n = conn.execute(
                    "DELETE FROM permissions WHERE owner_id = ?1 AND scope = ?2",
                    rusqlite::params![owner_id, scope],
                )?;
                Ok(n > 0)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn has_permission(&self, owner_id: &str, scope: &str) -> StoreResult<bool> {
        let owner_id = owner_id.to_string();
        let scope = scope.to_string();
        self.db
            .execute(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM permissions WHERE owner_id = ?1 AND scope = ?2",
                    rusqlite::params![owner_id, scope],
                    |row| row.get(0),
                )?;
                Ok(n > 0)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_permissions(&self, owner_id: &str) -> StoreResult<Vec<String>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT scope FROM permissions WHERE owner_id = ?1 ORDER BY scope")?;
                let scopes = stmt
                    .query_map(rusqlite::params![owner_id], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(scopes)
            })
            .await
    }

    // ── integrations ─────────────────────────────────────────────────

    /// Insert or replace the state of an integration.
    #[instrument(skip(self))]
    pub async fn upsert_integration(
        &self,
        owner_id: &str,
        provider: &str,
        status: &str,
        active: bool,
        last_error: Option<String>,
    ) -> StoreResult<StoredIntegration> {
        let integration = StoredIntegration {
            owner_id: owner_id.to_string(),
            provider: provider.to_string(),
            status: status.to_string(),
            active,
            last_error,
            updated_at: Utc::now(),
        };
        let i = integration.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO integrations (owner_id, provider, status, active, last_error, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT(owner_id, provider) DO UPDATE SET status = excluded.status, \
                     active = excluded.active, last_error = excluded.last_error, updated_at = excluded.updated_at",
                    rusqlite::params![
                        i.owner_id,
                        i.provider,
                        i.status,
                        i.active,
                        i.last_error,
                        encode_ts(&i.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        debug!(owner_id = %owner_id, provider = %provider, status = %status, "integration state saved");
        Ok(integration)
    }

    /// Every integration row, used to warm the in-memory registry.
    #[instrument(skip(self))]
    pub async fn list_integrations(&self) -> StoreResult<Vec<StoredIntegration>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT owner_id, provider, status, active, last_error, updated_at FROM integrations \
                     ORDER BY owner_id, provider",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, bool>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|(owner_id, provider, status, active, last_error, updated)| {
                        Ok(StoredIntegration {
                            owner_id,
                            provider,
                            status,
                            active,
                            last_error,
                            updated_at: decode_ts(&updated)?,
                        })
                    })
                    .collect()
            })
            .await
    }

    // ── data availability ────────────────────────────────────────────

    /// Whether the owner has at least one record in a data category.
    ///
    /// Unknown categories are rejected rather than reported as unavailable.
    #[instrument(skip(self))]
    pub async fn data_available(&self, owner_id: &str, category: &str) -> StoreResult<bool> {
        let table = DATA_CATEGORIES
            .iter()
            .find(|(name, _)| *name == category)
            .map(|(_, table)| *table)
            .ok_or_else(|| StoreError::InvalidArgument(format!("unknown data category `{category}`")))?;

        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let exists: i64 = conn.query_row(
                    &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE owner_id = ?1)"),
                    rusqlite::params![owner_id],
                    |row| row.get(0),
                )?;
                Ok(exists == 1)
            })
            .await
    }

    // ── generated content ────────────────────────────────────────────

    #[instrument(skip(self, prompt, content))]
    pub async fn save_content(
        &self,
        owner_id: &str,
        content_type: &str,
        prompt: &str,
        content: &str,
    ) -> StoreResult<StoredContent> {
        let stored = StoredContent {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            content_type: content_type.to_string(),
            prompt: prompt.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let c = stored.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO generated_content (id, owner_id, content_type, prompt, content, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        c.id,
                        c.owner_id,
                        c.content_type,
                        c.prompt,
                        c.content,
                        encode_ts(&c.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(stored)
    }
}

// ── tests ────────────────────────────────────────────────────────────
