//! Owner notifications.

use flowpilot_kernel::{EventBus, topics};
use flowpilot_store::{ActivityStore, StoredNotification};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Persists a notification row and announces it on the bus.
#[derive(Clone)]
pub struct Notifier {
    activity: ActivityStore,
    bus: EventBus,
}

impl Notifier {
    pub fn new(activity: ActivityStore, bus: EventBus) -> Self {
        Self { activity, bus }
    }

    pub async fn send_to_user(&self, owner_id: &str, message: NotificationMessage) -> Result<StoredNotification> {
        let notification = self
            .activity
            .create_notification(
                owner_id,
                &message.notification_type,
                &message.title,
                &message.message,
                message.metadata,
            )
            .await?;

        self.bus.emit(
            topics::NOTIFICATION_SENT,
            Some(owner_id),
            json!({
                "notification_id": notification.id,
                "type": notification.kind,
                "title": notification.title,
            }),
        )?;
        info!(owner_id = %owner_id, notification_id = %notification.id, "notification sent");
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_store::Stores;

    #[tokio::test]
    async fn persists_and_emits() {
        let stores = Stores::in_memory().await.unwrap();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let notifier = Notifier::new(stores.activity.clone(), bus);

        let sent = notifier
            .send_to_user(
                "o1",
                NotificationMessage {
                    notification_type: "workflow".into(),
                    title: "Done".into(),
                    message: "All actions ran".into(),
                    metadata: json!({ "execution_id": "e1" }),
                },
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, topics::NOTIFICATION_SENT);
        assert!(event.is_for_owner("o1"));
        assert_eq!(event.payload["notification_id"], sent.id);

        let stored = stores.activity.list_notifications("o1", true).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].metadata["execution_id"], "e1");
    }
}
