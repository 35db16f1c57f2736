//! Email records.  Outbound mail is queued here for a delivery worker;
//! inbound mail is recorded when an `email.received` event is ingested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::{Database, decode_ts, encode_ts};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmail {
    pub id: String,
    pub owner_id: String,
    /// `inbound` or `outbound`.
    pub direction: String,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    /// `queued`, `sent` or `received`.
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EmailStore {
    db: Database,
}

impl EmailStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Queue an outbound message.
    #[instrument(skip(self, body))]
    pub async fn queue_outbound(
        &self,
        owner_id: &str,
        recipients: Vec<String>,
        subject: &str,
        body: &str,
    ) -> StoreResult<StoredEmail> {
        if recipients.is_empty() {
            return Err(StoreError::InvalidArgument("email needs at least one recipient".into()));
        }
        let email = StoredEmail {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            direction: "outbound".into(),
            sender: None,
            recipients,
            subject: subject.to_string(),
            body: body.to_string(),
            status: "queued".into(),
            created_at: Utc::now(),
        };
        self.insert(&email).await?;
        debug!(email_id = %email.id, "outbound email queued");
        Ok(email)
    }

    /// Record a message received from a provider.
    #[instrument(skip(self, body))]
    pub async fn record_inbound(
        &self,
        owner_id: &str,
        sender: &str,
        subject: &str,
        body: &str,
    ) -> StoreResult<StoredEmail> {
        let email = StoredEmail {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            direction: "inbound".into(),
            sender: Some(sender.to_string()),
            recipients: Vec::new(),
            subject: subject.to_string(),
            body: body.to_string(),
            status: "received".into(),
            created_at: Utc::now(),
        };
        self.insert(&email).await?;
        Ok(email)
    }

    /// Most recent messages of an owner, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_owner(&self, owner_id: &str, limit: i64) -> StoreResult<Vec<StoredEmail>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, direction, sender, recipients, subject, body, status, created_at \
                     FROM emails WHERE owner_id = ?1 ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![owner_id, limit], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, String>(7)?,
                            row.get::<_, String>(8)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(
                        |(id, owner_id, direction, sender, recipients, subject, body, status, created)| {
                            Ok(StoredEmail {
                                id,
                                owner_id,
                                direction,
                                sender,
                                recipients: serde_json::from_str(&recipients)?,
                                subject,
                                body,
                                status,
                                created_at: decode_ts(&created)?,
                            })
                        },
                    )
                    .collect()
            })
            .await
    }

    async fn insert(&self, email: &StoredEmail) -> StoreResult<()> {
        let e = email.clone();
        let recipients = serde_json::to_string(&e.recipients)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO emails (id, owner_id, direction, sender, recipients, subject, body, status, \
                     created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        e.id,
                        e.owner_id,
                        e.direction,
                        e.sender,
                        recipients,
                        e.subject,
                        e.body,
                        e.status,
                        encode_ts(&e.created_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_and_list() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = EmailStore::new(db);

        let out = store
            .queue_outbound("o1", vec!["x@example.com".into()], "Hi", "Body")
            .await
            .unwrap();
        let inbound = store
            .record_inbound("o1", "boss@example.com", "Urgent", "Call me")
            .await
            .unwrap();

        let list = store.list_for_owner("o1", 10).await.unwrap();
        assert_eq!(list, vec![inbound, out]);
        assert!(
            store
                .queue_outbound("o1", vec![], "Hi", "Body")
                .await
                .is_err()
        );
    }
}
