//! Integration tests for the flowpilot-kernel crate.
//!
//! These tests exercise the job queue, event bus, and integration registry
//! as integrated subsystems.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flowpilot_kernel::{
    EventBus, IntegrationRegistry, IntegrationStatus, JobHandler, JobId, JobQueue, JobStatus,
    topics,
};

struct CountingHandler {
    counter: Arc<AtomicU32>,
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(
        &self,
        _job_id: JobId,
        payload: serde_json::Value,
    ) -> std::result::Result<(), String> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        if payload["fail"].as_bool().unwrap_or(false) {
            return Err("requested failure".into());
        }
        Ok(())
    }
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Job queue integration
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn queue_processes_multiple_jobs() {
    let queue = JobQueue::new();
    let counter = Arc::new(AtomicU32::new(0));
    queue.register_handler(
        "workflow.execute",
        Arc::new(CountingHandler {
            counter: Arc::clone(&counter),
        }),
    );
    let handle = queue.start().unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            queue
                .enqueue("workflow.execute", serde_json::json!({ "n": i }))
                .unwrap(),
        );
    }

    wait_until(|| counter.load(Ordering::SeqCst) == 5).await;
    wait_until(|| {
        ids.iter()
            .all(|id| queue.status(*id).unwrap().status == JobStatus::Completed)
    })
    .await;

    for id in &ids {
        let info = queue.status(*id).unwrap();
        assert_eq!(info.status, JobStatus::Completed);
        assert!(info.started_at.is_some());
        assert!(info.completed_at.is_some());
    }
    assert_eq!(queue.jobs_of_type("workflow.execute").len(), 5);

    queue.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn queue_failed_job_preserves_error() {
    let queue = JobQueue::new();
    let counter = Arc::new(AtomicU32::new(0));
    queue.register_handler("work", Arc::new(CountingHandler { counter }));
    let handle = queue.start().unwrap();

    let id = queue
        .enqueue("work", serde_json::json!({ "fail": true }))
        .unwrap();
    wait_until(|| queue.status(id).unwrap().status == JobStatus::Failed).await;

    let info = queue.status(id).unwrap();
    assert_eq!(info.status, JobStatus::Failed);
    assert_eq!(info.error.as_deref(), Some("requested failure"));

    queue.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn queue_jobs_wait_for_worker_start() {
    let queue = JobQueue::new();
    let counter = Arc::new(AtomicU32::new(0));
    queue.register_handler(
        "work",
        Arc::new(CountingHandler {
            counter: Arc::clone(&counter),
        }),
    );

    let id = queue.enqueue("work", serde_json::json!({})).unwrap();
    assert_eq!(queue.status(id).unwrap().status, JobStatus::Queued);
    assert_eq!(queue.pending_count(), 1);

    let handle = queue.start().unwrap();
    wait_until(|| queue.status(id).unwrap().status == JobStatus::Completed).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    queue.shutdown();
    handle.await.unwrap();
    assert!(queue.enqueue("work", serde_json::json!({})).is_err());
}

// ═══════════════════════════════════════════════════════════════════════
//  Event bus integration
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn bus_listeners_only_see_their_topic() {
    let bus = EventBus::new(64);
    let emails = Arc::new(AtomicU32::new(0));
    let tasks = Arc::new(AtomicU32::new(0));

    let e = Arc::clone(&emails);
    let _email_sub = bus.on(topics::EMAIL_RECEIVED, move |_| {
        e.fetch_add(1, Ordering::SeqCst);
    });
    let t = Arc::clone(&tasks);
    let _task_sub = bus.on(topics::TASK_STATUS_CHANGED, move |event| {
        if event.is_for_owner("o1") {
            t.fetch_add(1, Ordering::SeqCst);
        }
    });

    bus.emit(topics::EMAIL_RECEIVED, Some("o1"), serde_json::json!({}))
        .unwrap();
    bus.emit(topics::EMAIL_RECEIVED, Some("o2"), serde_json::json!({}))
        .unwrap();
    bus.emit(
        topics::TASK_STATUS_CHANGED,
        Some("o1"),
        serde_json::json!({ "status": "done" }),
    )
    .unwrap();
    bus.emit(topics::TASK_STATUS_CHANGED, Some("o2"), serde_json::json!({}))
        .unwrap();

    wait_until(|| emails.load(Ordering::SeqCst) == 2 && tasks.load(Ordering::SeqCst) == 1).await;
    assert_eq!(emails.load(Ordering::SeqCst), 2);
    assert_eq!(tasks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bus_disposed_listener_stops_receiving() {
    let bus = EventBus::new(16);
    let hits = Arc::new(AtomicU32::new(0));

    let h = Arc::clone(&hits);
    let sub = bus.on(topics::AI_INSIGHT, move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    bus.emit(topics::AI_INSIGHT, None, serde_json::json!({})).unwrap();
    wait_until(|| hits.load(Ordering::SeqCst) == 1).await;

    sub.dispose();
    // Give the aborted task a moment to drop its receiver.
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.emit(topics::AI_INSIGHT, None, serde_json::json!({})).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn bus_raw_subscriber_sees_every_topic() {
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    bus.emit(topics::WORKFLOW_TRIGGERED, Some("o1"), serde_json::json!({ "a": 1 }))
        .unwrap();
    bus.emit(topics::WORKFLOW_COMPLETED, Some("o1"), serde_json::json!({ "a": 2 }))
        .unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.topic, topics::WORKFLOW_TRIGGERED);
    assert_eq!(second.topic, topics::WORKFLOW_COMPLETED);
    assert_eq!(second.payload["a"], 2);
}

#[test]
fn bus_rejects_empty_topic() {
    let bus = EventBus::new(4);
    assert!(bus.emit("  ", None, serde_json::json!({})).is_err());
}

// ═══════════════════════════════════════════════════════════════════════
//  Integration registry
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn integration_registry_full_lifecycle() {
    let registry = IntegrationRegistry::new();
    registry.register("o1", "email", IntegrationStatus::Connected, true);
    registry.register("o1", "slack", IntegrationStatus::Disconnected, true);

    assert!(registry.is_connected("o1", "email"));
    assert!(!registry.is_connected("o1", "slack"));

    registry
        .set_status("o1", "slack", IntegrationStatus::Connected)
        .unwrap();
    assert!(registry.is_connected("o1", "slack"));

    registry.set_error("o1", "email", "imap timeout").unwrap();
    assert!(!registry.is_connected("o1", "email"));

    let list = registry.list_for_owner("o1");
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].status, IntegrationStatus::Error);

    registry.unregister("o1", "email");
    assert!(registry.get("o1", "email").is_err());
    assert!(registry.set_status("o1", "email", IntegrationStatus::Connected).is_err());
}
