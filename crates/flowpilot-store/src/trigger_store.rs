//! Trigger persistence.
//!
//! A trigger row keeps its condition list inside a JSON `config` object
//! (`{"conditions": [...]}`) and its type-specific settings in a JSON
//! `metadata` object.  The `active` column mirrors whether the trigger should
//! have a live detection mechanism; the registry re-activates every active
//! row at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::{Database, decode_ts, encode_ts};
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A persisted trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrigger {
    pub id: String,
    pub owner_id: String,
    /// Snake-case trigger type tag (`time_based`, `email_received`, ...).
    pub trigger_type: String,
    /// `{"conditions": [...]}`.
    pub config: serde_json::Value,
    pub metadata: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
//  TriggerStore
// ═══════════════════════════════════════════════════════════════════════

const COLUMNS: &str = "id, owner_id, trigger_type, config, metadata, active, created_at, updated_at";

/// CRUD operations on trigger definitions.
#[derive(Clone)]
pub struct TriggerStore {
    db: Database,
}

impl TriggerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new trigger row.  The id must be unique.
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    pub async fn insert(&self, trigger: &StoredTrigger) -> StoreResult<()> {
        let t = trigger.clone();
        let config = serde_json::to_string(&t.config)?;
        let metadata = serde_json::to_string(&t.metadata)?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO triggers (id, owner_id, trigger_type, config, metadata, active, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        t.id,
                        t.owner_id,
                        t.trigger_type,
                        config,
                        metadata,
                        t.active,
                        encode_ts(&t.created_at),
                        encode_ts(&t.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(trigger_id = %trigger.id, trigger_type = %trigger.trigger_type, "trigger persisted");
        Ok(())
    }

    /// Fetch a trigger by id, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredTrigger>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {COLUMNS} FROM triggers WHERE id = ?1"),
                    rusqlite::params![id],
                    TriggerRow::from_row,
                );
                match result {
                    Ok(row) => row.into_stored_trigger().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// All triggers whose `active` flag is set, oldest first.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> StoreResult<Vec<StoredTrigger>> {
        self.query(
            format!("SELECT {COLUMNS} FROM triggers WHERE active = 1 ORDER BY created_at ASC"),
            Vec::new(),
        )
        .await
    }

    /// Triggers of one owner, optionally restricted to one type tag.
    #[instrument(skip(self))]
    pub async fn list_for_owner(
        &self,
        owner_id: &str,
        trigger_type: Option<&str>,
    ) -> StoreResult<Vec<StoredTrigger>> {
        match trigger_type {
            Some(t) => {
                self.query(
                    format!(
                        "SELECT {COLUMNS} FROM triggers WHERE owner_id = ?1 AND trigger_type = ?2 \
                         ORDER BY created_at ASC"
                    ),
                    vec![owner_id.to_string(), t.to_string()],
                )
                .await
            }
            None => {
                self.query(
                    format!("SELECT {COLUMNS} FROM triggers WHERE owner_id = ?1 ORDER BY created_at ASC"),
                    vec![owner_id.to_string()],
                )
                .await
            }
        }
    }

    /// Every trigger, for administration listings.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> StoreResult<Vec<StoredTrigger>> {
        self.query(
            format!("SELECT {COLUMNS} FROM triggers ORDER BY created_at ASC"),
            Vec::new(),
        )
        .await
    }

    /// Flip the `active` flag.
    #[instrument(skip(self))]
    pub async fn set_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let id = id.to_string();
        let now = encode_ts(&Utc::now());
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE triggers SET active = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, active, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "trigger",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Delete a trigger by id.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute("DELETE FROM triggers WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "trigger",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM triggers", [], |row| row.get(0))?))
            .await
    }

    async fn query(&self, sql: String, params: Vec<String>) -> StoreResult<Vec<StoredTrigger>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), TriggerRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(TriggerRow::into_stored_trigger).collect()
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

/// Raw column values; JSON and timestamp decoding happens in a second step
/// so errors surface as `StoreError` rather than `rusqlite::Error`.
struct TriggerRow {
    id: String,
    owner_id: String,
    trigger_type: String,
    config: String,
    metadata: String,
    active: bool,
    created_at: String,
    updated_at: String,
}

impl TriggerRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            trigger_type: row.get(2)?,
            config: row.get(3)?,
            metadata: row.get(4)?,
            active: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_stored_trigger(self) -> StoreResult<StoredTrigger> {
        Ok(StoredTrigger {
            id: self.id,
            owner_id: self.owner_id,
            trigger_type: self.trigger_type,
            config: serde_json::from_str(&self.config)?,
            metadata: serde_json::from_str(&self.metadata)?,
            active: self.active,
            created_at: decode_ts(&self.created_at)?,
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup() -> TriggerStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        TriggerStore::new(db)
    }

    fn trigger(id: &str, owner: &str, ty: &str, active: bool) -> StoredTrigger {
        let now = Utc::now();
        StoredTrigger {
            id: id.into(),
            owner_id: owner.into(),
            trigger_type: ty.into(),
            config: json!({ "conditions": [{ "field": "priority", "operator": "equals", "value": "high" }] }),
            metadata: json!({ "cron": "0 9 * * *" }),
            active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let store = setup().await;
        let t = trigger("t1", "o1", "time_based", true);
        store.insert(&t).await.unwrap();

        let fetched = store.get("t1").await.unwrap().unwrap();
        assert_eq!(fetched, t);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = setup().await;
        let t = trigger("t1", "o1", "manual", false);
        store.insert(&t).await.unwrap();
        assert!(store.insert(&t).await.is_err());
    }

    #[tokio::test]
    async fn list_filters() {
        let store = setup().await;
        store.insert(&trigger("a", "o1", "manual", true)).await.unwrap();
        store.insert(&trigger("b", "o1", "email_received", false)).await.unwrap();
        store.insert(&trigger("c", "o2", "manual", true)).await.unwrap();

        assert_eq!(store.list_active().await.unwrap().len(), 2);
        assert_eq!(store.list_for_owner("o1", None).await.unwrap().len(), 2);
        let manual = store.list_for_owner("o1", Some("manual")).await.unwrap();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].id, "a");
        assert_eq!(store.list_all().await.unwrap().len(), 3);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn set_active_and_delete() {
        let store = setup().await;
        store.insert(&trigger("t", "o1", "manual", true)).await.unwrap();

        store.set_active("t", false).await.unwrap();
        assert!(!store.get("t").await.unwrap().unwrap().active);
        assert!(store.list_active().await.unwrap().is_empty());

        store.delete("t").await.unwrap();
        assert!(matches!(
            store.delete("t").await,
            Err(StoreError::NotFound { entity: "trigger", .. })
        ));
        assert!(store.set_active("t", true).await.is_err());
    }
}
