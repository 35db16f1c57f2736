//! Calendar events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::{Database, decode_ts, encode_ts};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`CalendarStore::create`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEvent {
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
}

const COLUMNS: &str =
    "id, owner_id, title, description, start_time, end_time, location, attendees, created_at";

#[derive(Clone)]
pub struct CalendarStore {
    db: Database,
}

impl CalendarStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an event.  The end must not precede the start.
    #[instrument(skip(self, event), fields(owner_id = %event.owner_id))]
    pub async fn create(&self, event: NewEvent) -> StoreResult<StoredEvent> {
        if event.end_time < event.start_time {
            return Err(StoreError::InvalidArgument(
                "event end time precedes its start time".into(),
            ));
        }
        let stored = StoredEvent {
            id: Uuid::now_v7().to_string(),
            owner_id: event.owner_id,
            title: event.title,
            description: event.description,
            start_time: event.start_time,
            end_time: event.end_time,
            location: event.location,
            attendees: event.attendees,
            created_at: Utc::now(),
        };
        let e = stored.clone();
        let attendees = serde_json::to_string(&e.attendees)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO calendar_events (id, owner_id, title, description, start_time, end_time, \
                     location, attendees, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        e.id,
                        e.owner_id,
                        e.title,
                        e.description,
                        encode_ts(&e.start_time),
                        encode_ts(&e.end_time),
                        e.location,
                        attendees,
                        encode_ts(&e.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        debug!(event_id = %stored.id, "calendar event created");
        Ok(stored)
    }

    /// Events starting inside `[from, to)`, ordered by start time.
    #[instrument(skip(self))]
    pub async fn events_between(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredEvent>> {
        let owner_id = owner_id.to_string();
        let (from, to) = (encode_ts(&from), encode_ts(&to));
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM calendar_events WHERE owner_id = ?1 AND start_time >= ?2 \
                     AND start_time < ?3 ORDER BY start_time ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id, from, to], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, String>(7)?,
                            row.get::<_, String>(8)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(
                        |(id, owner_id, title, description, start, end, location, attendees, created)| {
                            Ok(StoredEvent {
                                id,
                                owner_id,
                                title,
                                description,
                                start_time: decode_ts(&start)?,
                                end_time: decode_ts(&end)?,
                                location,
                                attendees: serde_json::from_str(&attendees)?,
                                created_at: decode_ts(&created)?,
                            })
                        },
                    )
                    .collect()
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup() -> CalendarStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        CalendarStore::new(db)
    }

    fn event(owner: &str, start: DateTime<Utc>, hours: i64) -> NewEvent {
        NewEvent {
            owner_id: owner.into(),
            title: "Sync".into(),
            start_time: start,
            end_time: start + Duration::hours(hours),
            attendees: vec!["a@example.com".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn window_query_orders_by_start() {
        let store = setup().await;
        let now = Utc::now();
        let later = store.create(event("o1", now + Duration::days(2), 1)).await.unwrap();
        let sooner = store.create(event("o1", now + Duration::hours(3), 1)).await.unwrap();
        store.create(event("o1", now + Duration::days(10), 1)).await.unwrap();
        store.create(event("o2", now + Duration::hours(1), 1)).await.unwrap();

        let events = store
            .events_between("o1", now, now + Duration::days(7))
            .await
            .unwrap();
        assert_eq!(events, vec![sooner, later]);
    }

    #[tokio::test]
    async fn inverted_window_rejected() {
        let store = setup().await;
        let now = Utc::now();
        let mut bad = event("o1", now, 1);
        bad.end_time = now - Duration::hours(1);
        assert!(store.create(bad).await.is_err());
    }
}
