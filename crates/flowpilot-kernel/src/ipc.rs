//! Named-topic event bus.
//!
//! The event bus provides a lightweight publish/subscribe mechanism built on
//! top of [`tokio::sync::broadcast`].  Domain events (an email arrived, a
//! task changed status) and workflow lifecycle events (an execution changed
//! status) all flow through it as [`BusEvent`]s addressed by topic name.
//!
//! Events are wrapped in [`Arc`] so that broadcasting to multiple subscribers
//! does not require cloning the payload.
//!
//! Listeners registered with [`EventBus::on`] receive only events for their
//! topic and are torn down when the returned [`SubscriptionHandle`] is
//! disposed or dropped.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use flowpilot_kernel::ipc::{EventBus, topics};
//! # async fn example() {
//! let bus = EventBus::new(256);
//! let handle = bus.on(topics::EMAIL_RECEIVED, |event| {
//!     println!("email for {:?}", event.owner_id);
//! });
//!
//! bus.emit(topics::EMAIL_RECEIVED, Some("owner-1"), serde_json::json!({}))
//!     .unwrap();
//! handle.dispose();
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Well-known topic names.
pub mod topics {
    // -- Domain events consumed by triggers ---------------------------------
    /// A new email arrived for an owner.
    pub const EMAIL_RECEIVED: &str = "email.received";
    /// A calendar event was created, updated, cancelled or is starting.
    pub const CALENDAR_EVENT: &str = "calendar.event";
    /// A task moved to a new status.
    pub const TASK_STATUS_CHANGED: &str = "task.status_changed";
    /// An upstream analyzer published an insight.
    pub const AI_INSIGHT: &str = "ai.insight";

    // -- Workflow lifecycle events ------------------------------------------
    /// A trigger passed its conditions and a workflow job was enqueued.
    pub const WORKFLOW_TRIGGERED: &str = "workflow.triggered";
    /// An execution moved to a new status.
    pub const WORKFLOW_STATUS_CHANGED: &str = "workflow.status_changed";
    /// An execution reached `completed`.
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    /// An execution reached `failed`.
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    /// An execution was cancelled.
    pub const WORKFLOW_CANCELLED: &str = "workflow.cancelled";

    /// A notification was delivered to an owner.
    pub const NOTIFICATION_SENT: &str = "notification.sent";
}

// ---------------------------------------------------------------------------
// Event type
// ---------------------------------------------------------------------------

/// An event that flows through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Unique identifier of this event.
    pub id: Uuid,
    /// Topic name, see [`topics`].
    pub topic: String,
    /// The owner this event concerns, if it is owner-scoped.
    pub owner_id: Option<String>,
    /// Topic-specific JSON payload.
    pub payload: serde_json::Value,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    /// Build a new event stamped with the current time.
    pub fn new(
        topic: impl Into<String>,
        owner_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic: topic.into(),
            owner_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event belongs to `owner_id`.
    pub fn is_for_owner(&self, owner_id: &str) -> bool {
        self.owner_id.as_deref() == Some(owner_id)
    }
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// Publish/subscribe event bus backed by [`tokio::sync::broadcast`].
///
/// The bus is cheaply cloneable (`Arc`-backed) and `Send + Sync`.  Subscribers
/// receive [`Arc<BusEvent>`] references, avoiding per-subscriber cloning of the
/// event payload.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    sender: broadcast::Sender<Arc<BusEvent>>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// If a subscriber falls behind by more than `capacity` events, it will
    /// receive a [`broadcast::error::RecvError::Lagged`] error indicating how
    /// many events were missed.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventBusInner { sender }),
        }
    }

    /// Emit a payload on `topic`, optionally scoped to an owner.
    ///
    /// Returns the number of receivers that will observe the event.
    pub fn emit(
        &self,
        topic: &str,
        owner_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<usize> {
        if topic.trim().is_empty() {
            return Err(KernelError::InvalidTopic {
                topic: topic.to_string(),
            });
        }
        Ok(self.publish(BusEvent::new(
            topic,
            owner_id.map(str::to_string),
            payload,
        )))
    }

    /// Publish a pre-built event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped (this
    /// is not considered an error during startup and shutdown).
    pub fn publish(&self, event: BusEvent) -> usize {
        let topic = event.topic.clone();
        match self.inner.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(topic = %topic, receivers = n, "event published");
                n
            }
            Err(_) => {
                tracing::trace!(topic = %topic, "event published but no active receivers");
                0
            }
        }
    }

    /// Create a raw subscriber that receives every future event, all topics.
    ///
    /// Events published *before* this call are **not** replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BusEvent>> {
        self.inner.sender.subscribe()
    }

    /// Register `handler` for every future event on `topic`.
    ///
    /// The receiver is attached before this method returns, so any event
    /// emitted afterwards is delivered.  The handler runs on a dedicated
    /// listener task; it must not block.  Must be called from within a
    /// tokio runtime.
    pub fn on<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(Arc<BusEvent>) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut rx = self.inner.sender.subscribe();
        let listen_topic = topic.clone();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.topic == listen_topic {
                            handler(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(topic = %listen_topic, missed, "event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        tracing::debug!(topic = %topic, "event listener registered");
        SubscriptionHandle { topic, task }
    }

    /// Return the current number of active subscribers, listeners included.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// A live topic listener.  Dropping the handle stops the listener.
#[derive(Debug)]
pub struct SubscriptionHandle {
    topic: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// The topic this listener is attached to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the listener task is still running.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the listener.  Equivalent to dropping the handle.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!(topic = %self.topic, "event listener disposed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn emit_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let receivers = bus
            .emit(topics::TASK_STATUS_CHANGED, Some("owner-1"), serde_json::json!({"newStatus": "done"}))
            .expect("emit should succeed");
        assert_eq!(receivers, 1);

        let received = rx.recv().await.expect("should receive event");
        assert_eq!(received.topic, topics::TASK_STATUS_CHANGED);
        assert!(received.is_for_owner("owner-1"));
        assert_eq!(received.payload["newStatus"], "done");
    }

    #[tokio::test]
    async fn multiple_subscribers_share_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit("system.tick", None, serde_json::Value::Null)
            .expect("emit");

        let e1 = rx1.recv().await.expect("rx1");
        let e2 = rx2.recv().await.expect("rx2");
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_is_ok() {
        let bus = EventBus::new(16);
        let result = bus.emit("lonely", None, serde_json::Value::Null);
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn empty_topic_rejected() {
        let bus = EventBus::new(4);
        assert!(matches!(
            bus.emit("  ", None, serde_json::Value::Null),
            Err(KernelError::InvalidTopic { .. })
        ));
    }

    #[tokio::test]
    async fn listener_only_sees_its_topic() {
        let bus = EventBus::new(16);
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let _handle = bus.on(topics::EMAIL_RECEIVED, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(topics::EMAIL_RECEIVED, Some("a"), serde_json::Value::Null)
            .unwrap();
        bus.emit(topics::CALENDAR_EVENT, Some("a"), serde_json::Value::Null)
            .unwrap();
        bus.emit(topics::EMAIL_RECEIVED, Some("b"), serde_json::Value::Null)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disposed_listener_stops_receiving() {
        let bus = EventBus::new(16);
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let handle = bus.on("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(handle.topic(), "ping");

        bus.emit("ping", None, serde_json::Value::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        handle.dispose();
        tokio::time::sleep(Duration::from_millis(30)).await;
        bus.emit("ping", None, serde_json::Value::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_receivers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
