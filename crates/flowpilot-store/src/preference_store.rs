//! Per-owner workflow approval preferences with a moka cache in front.
//!
//! Preferences are read on every execution's approval step, so lookups go
//! through [`CacheLayer`]; writes invalidate the cached entry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::cache::{CacheLayer, CacheStats};
use crate::db::{Database, decode_ts, encode_ts};
use crate::error::{StoreError, StoreResult};

/// Persisted approval policy of one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPreferences {
    pub owner_id: String,
    pub auto_approve: bool,
    pub confidence_threshold: f64,
    pub min_priority: i64,
    pub max_auto_actions: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PreferenceStore {
    db: Database,
    // Caches misses too (`None`) so owners without preferences do not hit
    // SQLite on every execution.
    cache: CacheLayer<Option<StoredPreferences>>,
}

impl PreferenceStore {
    pub fn new(db: Database) -> Self {
        Self::with_cache(db, 10_000, Duration::from_secs(300))
    }

    pub fn with_cache(db: Database, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            db,
            cache: CacheLayer::new("workflow_preferences", max_capacity, ttl),
        }
    }

    /// The owner's preferences, or `None` when never set.
    #[instrument(skip(self))]
    pub async fn get(&self, owner_id: &str) -> StoreResult<Option<StoredPreferences>> {
        let db = self.db.clone();
        let owner = owner_id.to_string();
        self.cache
            .get_or_try_load(owner_id, move || async move { load(&db, owner).await })
            .await
    }

    /// Insert or replace the owner's preferences.
    #[instrument(skip(self, prefs), fields(owner_id = %prefs.owner_id))]
    pub async fn set(&self, prefs: &StoredPreferences) -> StoreResult<()> {
        if !(0.0..=1.0).contains(&prefs.confidence_threshold) {
            return Err(StoreError::InvalidArgument(format!(
                "confidence threshold {} outside [0, 1]",
                prefs.confidence_threshold
            )));
        }
        if prefs.max_auto_actions < 0 {
            return Err(StoreError::InvalidArgument("max_auto_actions must not be negative".into()));
        }

        let p = prefs.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO workflow_preferences (owner_id, auto_approve, confidence_threshold, min_priority, \
                     max_auto_actions, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT(owner_id) DO UPDATE SET auto_approve = excluded.auto_approve, \
                     confidence_threshold = excluded.confidence_threshold, min_priority = excluded.min_priority, \
                     max_auto_actions = excluded.max_auto_actions, updated_at = excluded.updated_at",
                    rusqlite::params![
                        p.owner_id,
                        p.auto_approve,
                        p.confidence_threshold,
                        p.min_priority,
                        p.max_auto_actions,
                        encode_ts(&p.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;

        self.cache.invalidate(&prefs.owner_id).await;
        debug!(owner_id = %prefs.owner_id, "workflow preferences saved");
        Ok(())
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }
}

async fn load(db: &Database, owner_id: String) -> StoreResult<Option<StoredPreferences>> {
    db.execute(move |conn| {
        let result = conn.query_row(
            "SELECT owner_id, auto_approve, confidence_threshold, min_priority, max_auto_actions, updated_at \
             FROM workflow_preferences WHERE owner_id = ?1",
            rusqlite::params![owner_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        );
        match result {
            Ok((owner_id, auto_approve, confidence_threshold, min_priority, max_auto_actions, updated)) => {
                Ok(Some(StoredPreferences {
                    owner_id,
                    auto_approve,
                    confidence_threshold,
                    min_priority,
                    max_auto_actions,
                    updated_at: decode_ts(&updated)?,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    })
    .await
}

// ── tests ────────────────────────────────────────────────────────────
