//! Trigger registry and scheduler.
//!
//! Owns the table of live triggers and binds each one to exactly one
//! detection mechanism:
//!
//! - **Timer** -- time-based triggers sleep until the next cron occurrence.
//! - **Subscription** -- event, email, calendar, task-status and insight
//!   triggers listen on the [`EventBus`], filtered to their owner.
//! - **Poller** -- context-polling triggers take a context snapshot on a
//!   fixed interval and fire with it.
//! - **Manual** -- no detection; fired only through [`TriggerRegistry::fire`].
//!
//! Firing never runs the workflow inline.  A trigger whose conditions pass
//! enqueues a `workflow.execute` job and emits `workflow.triggered`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use flowpilot_kernel::{BusEvent, EventBus, JobId, JobQueue, SubscriptionHandle, topics};
use flowpilot_store::{StoreError, Stores};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::condition;
use crate::context::ContextProvider;
use crate::error::{EngineError, Result};
use crate::schedule::{next_run_after, parse_schedule};
use crate::trigger::{MIN_POLL_INTERVAL, Trigger, TriggerMetadata, TriggerSpec, TriggerType};

/// Queue job type carrying one workflow execution request.
pub const WORKFLOW_JOB_TYPE: &str = "workflow.execute";

// ---------------------------------------------------------------------------
// Live table entries
// ---------------------------------------------------------------------------

/// The detection mechanism bound to a live trigger.  Dropping it stops
/// detection.
#[derive(Debug)]
enum Detection {
    Timer(JoinHandle<()>),
    Subscription(SubscriptionHandle),
    Poller(JoinHandle<()>),
    Manual,
}

impl Detection {
    fn kind(&self) -> &'static str {
        match self {
            Self::Timer(_) => "timer",
            Self::Subscription(_) => "subscription",
            Self::Poller(_) => "poller",
            Self::Manual => "manual",
        }
    }
}

impl Drop for Detection {
    fn drop(&mut self) {
        match self {
            Self::Timer(handle) | Self::Poller(handle) => handle.abort(),
            // SubscriptionHandle aborts its listener on drop.
            Self::Subscription(_) | Self::Manual => {}
        }
    }
}

struct LiveTrigger {
    trigger: Trigger,
    detection: Detection,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry of triggers and their live detection mechanisms.
///
/// Cheaply cloneable (`Arc`-backed).  Detection tasks hold only a weak
/// reference, so dropping every clone stops them.
#[derive(Clone)]
pub struct TriggerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    stores: Stores,
    bus: EventBus,
    queue: JobQueue,
    context: ContextProvider,
    job_type: String,
    live: DashMap<String, LiveTrigger>,
}

impl TriggerRegistry {
    pub fn new(stores: Stores, bus: EventBus, queue: JobQueue) -> Self {
        Self::with_job_type(stores, bus, queue, WORKFLOW_JOB_TYPE)
    }

    /// Like [`TriggerRegistry::new`] but enqueueing under `job_type`.
    pub fn with_job_type(stores: Stores, bus: EventBus, queue: JobQueue, job_type: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                context: ContextProvider::new(stores.clone()),
                stores,
                bus,
                queue,
                job_type: job_type.into(),
                live: DashMap::new(),
            }),
        }
    }

    /// Assign an id, persist, and activate if the trigger is enabled.
    ///
    /// Invalid metadata is rejected before anything is persisted.  If
    /// activation fails the record is kept but marked inactive.
    pub async fn register(&self, owner_id: &str, spec: TriggerSpec) -> Result<Trigger> {
        validate_metadata(&spec.metadata)?;
        let trigger = Trigger::new(owner_id, spec);
        self.inner.stores.triggers.insert(&trigger.to_stored()?).await?;

        if trigger.enabled
            && let Err(e) = self.activate(&trigger)
        {
            self.inner.stores.triggers.set_active(&trigger.id, false).await?;
            return Err(e);
        }

        info!(
            trigger_id = %trigger.id,
            owner_id = %owner_id,
            trigger_type = %trigger.trigger_type(),
            enabled = trigger.enabled,
            "trigger registered"
        );
        Ok(trigger)
    }

    /// Bind a detection mechanism to `trigger` and add it to the live table,
    /// replacing any previous binding.  Does not touch the persisted record.
    pub fn activate(&self, trigger: &Trigger) -> Result<()> {
        validate_metadata(&trigger.metadata)?;
        let detection = self.detect(trigger)?;
        debug!(trigger_id = %trigger.id, detection = detection.kind(), "trigger activated");

        let mut live = trigger.clone();
        live.enabled = true;
        self.inner.live.insert(
            trigger.id.clone(),
            LiveTrigger {
                trigger: live,
                detection,
            },
        );
        Ok(())
    }

    /// Tear down detection and clear the persisted enabled flag.
    ///
    /// Idempotent; only an unknown trigger id is an error.
    pub async fn deactivate(&self, trigger_id: &str) -> Result<()> {
        let was_live = self.inner.live.remove(trigger_id).is_some();
        self.inner
            .stores
            .triggers
            .set_active(trigger_id, false)
            .await
            .map_err(|e| not_found_as_trigger(e, trigger_id))?;
        if was_live {
            info!(trigger_id = %trigger_id, "trigger deactivated");
        }
        Ok(())
    }

    /// Persist the enabled flag and (de)activate accordingly.
    pub async fn set_enabled(&self, trigger_id: &str, enabled: bool) -> Result<Trigger> {
        if !enabled {
            self.deactivate(trigger_id).await?;
            return self.load_trigger(trigger_id).await;
        }

        let mut trigger = self.load_trigger(trigger_id).await?;
        self.activate(&trigger)?;
        if let Err(e) = self.inner.stores.triggers.set_active(trigger_id, true).await {
            self.inner.live.remove(trigger_id);
            return Err(not_found_as_trigger(e, trigger_id));
        }
        trigger.enabled = true;
        info!(trigger_id = %trigger_id, "trigger enabled");
        Ok(trigger)
    }

    /// Deactivate and remove the persisted record.
    pub async fn delete(&self, trigger_id: &str) -> Result<()> {
        self.inner.live.remove(trigger_id);
        self.inner
            .stores
            .triggers
            .delete(trigger_id)
            .await
            .map_err(|e| not_found_as_trigger(e, trigger_id))?;
        info!(trigger_id = %trigger_id, "trigger deleted");
        Ok(())
    }

    /// Evaluate the trigger's conditions against `data` and, if they pass,
    /// enqueue a workflow job.  Returns `None` when the conditions fail.
    pub fn fire(&self, trigger_id: &str, data: Value) -> Result<Option<JobId>> {
        self.inner.fire(trigger_id, data)
    }

    /// A live trigger by id.
    pub fn get_trigger(&self, trigger_id: &str) -> Option<Trigger> {
        self.inner.live.get(trigger_id).map(|entry| entry.trigger.clone())
    }

    /// A persisted trigger by id, live or not.
    pub async fn load_trigger(&self, trigger_id: &str) -> Result<Trigger> {
        let stored = self
            .inner
            .stores
            .triggers
            .get(trigger_id)
            .await?
            .ok_or_else(|| EngineError::TriggerNotFound {
                trigger_id: trigger_id.to_string(),
            })?;
        Trigger::from_stored(&stored)
    }

    /// Persisted triggers of one owner, optionally of one type.
    pub async fn get_triggers_for_owner(
        &self,
        owner_id: &str,
        trigger_type: Option<TriggerType>,
    ) -> Result<Vec<Trigger>> {
        let stored = self
            .inner
            .stores
            .triggers
            .list_for_owner(owner_id, trigger_type.map(|t| t.as_str()))
            .await?;
        stored.iter().map(Trigger::from_stored).collect()
    }

    /// Re-activate every trigger persisted as active.
    ///
    /// A trigger that fails to load or activate is logged, marked inactive
    /// and skipped.  Returns the number activated.
    pub async fn reload_active(&self) -> Result<usize> {
        let stored = self.inner.stores.triggers.list_active().await?;
        let mut activated = 0;

        for record in &stored {
            let outcome = Trigger::from_stored(record).and_then(|t| self.activate(&t));
            match outcome {
                Ok(()) => activated += 1,
                Err(e) => {
                    warn!(trigger_id = %record.id, error = %e, "trigger activation failed during reload");
                    if let Err(e) = self.inner.stores.triggers.set_active(&record.id, false).await {
                        warn!(trigger_id = %record.id, error = %e, "could not mark trigger inactive");
                    }
                }
            }
        }

        info!(activated, total = stored.len(), "active triggers reloaded");
        Ok(activated)
    }

    /// Tear down every live detection.  Persisted records are untouched.
    pub fn shutdown(&self) {
        let count = self.inner.live.len();
        self.inner.live.clear();
        info!(count, "trigger detections torn down");
    }

    pub fn is_live(&self, trigger_id: &str) -> bool {
        self.inner.live.contains_key(trigger_id)
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Detection kind of a live trigger (`timer`, `subscription`, ...).
    pub fn detection_kind(&self, trigger_id: &str) -> Option<&'static str> {
        self.inner.live.get(trigger_id).map(|entry| entry.detection.kind())
    }

    // -- Detection ----------------------------------------------------------

    fn detect(&self, trigger: &Trigger) -> Result<Detection> {
        let weak = Arc::downgrade(&self.inner);
        let id = trigger.id.clone();

        let detection = match &trigger.metadata {
            TriggerMetadata::TimeBased { cron } => Detection::Timer(spawn_timer(weak, id, parse_schedule(cron)?)),
            TriggerMetadata::ContextPolling { interval } => {
                Detection::Poller(spawn_poller(weak, id, trigger.owner_id.clone(), *interval))
            }
            TriggerMetadata::Manual => Detection::Manual,
            metadata => {
                let topic = event_topic(metadata);
                let owner_id = trigger.owner_id.clone();
                let filter = metadata.clone();
                Detection::Subscription(self.inner.bus.on(topic, move |event: Arc<BusEvent>| {
                    if !matches_event(&filter, &owner_id, &event) {
                        return;
                    }
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = inner.fire(&id, event.payload.clone()) {
                        warn!(trigger_id = %id, error = %e, "event-driven fire failed");
                    }
                }))
            }
        };
        Ok(detection)
    }
}

impl RegistryInner {
    fn fire(&self, trigger_id: &str, data: Value) -> Result<Option<JobId>> {
        let trigger = self
            .live
            .get(trigger_id)
            .map(|entry| entry.trigger.clone())
            .ok_or_else(|| EngineError::TriggerNotFound {
                trigger_id: trigger_id.to_string(),
            })?;

        if !condition::evaluate(&trigger.conditions, &data) {
            debug!(trigger_id = %trigger_id, "trigger conditions not met");
            return Ok(None);
        }

        let trigger_type = trigger.trigger_type();
        let job_id = self.queue.enqueue(
            &self.job_type,
            json!({
                "owner_id": trigger.owner_id,
                "trigger_id": trigger.id,
                "trigger_type": trigger_type,
                "data": data,
            }),
        )?;
        self.bus.emit(
            topics::WORKFLOW_TRIGGERED,
            Some(&trigger.owner_id),
            json!({
                "trigger_id": trigger.id,
                "trigger_type": trigger_type,
                "job_id": job_id.to_string(),
            }),
        )?;
        info!(trigger_id = %trigger_id, owner_id = %trigger.owner_id, %job_id, "trigger fired");
        Ok(Some(job_id))
    }
}

/// Checks that cannot be expressed in the metadata type itself.
fn validate_metadata(metadata: &TriggerMetadata) -> Result<()> {
    match metadata {
        TriggerMetadata::TimeBased { cron } => {
            parse_schedule(cron)?;
        }
        TriggerMetadata::ContextPolling { interval } if *interval < MIN_POLL_INTERVAL => {
            return Err(EngineError::InvalidTriggerMetadata {
                trigger_type: TriggerType::ContextPolling.to_string(),
                reason: format!("polling interval must be at least {}s", MIN_POLL_INTERVAL.as_secs()),
            });
        }
        TriggerMetadata::EventBased { event_name } if event_name.trim().is_empty() => {
            return Err(EngineError::MissingTriggerMetadata {
                trigger_type: TriggerType::EventBased.to_string(),
                field: "event_name".into(),
            });
        }
        _ => {}
    }
    Ok(())
}

fn not_found_as_trigger(err: StoreError, trigger_id: &str) -> EngineError {
    match err {
        StoreError::NotFound { .. } => EngineError::TriggerNotFound {
            trigger_id: trigger_id.to_string(),
        },
        other => other.into(),
    }
}

// ---------------------------------------------------------------------------
// Event matching
// ---------------------------------------------------------------------------

fn event_topic(metadata: &TriggerMetadata) -> String {
    match metadata {
        TriggerMetadata::EventBased { event_name } => event_name.clone(),
        TriggerMetadata::EmailReceived { .. } => topics::EMAIL_RECEIVED.to_string(),
        TriggerMetadata::CalendarEvent { .. } => topics::CALENDAR_EVENT.to_string(),
        TriggerMetadata::TaskStatusChange { .. } => topics::TASK_STATUS_CHANGED.to_string(),
        TriggerMetadata::AiInsight { .. } => topics::AI_INSIGHT.to_string(),
        // not subscription-based
        TriggerMetadata::TimeBased { .. } | TriggerMetadata::ContextPolling { .. } | TriggerMetadata::Manual => {
            String::new()
        }
    }
}

fn allow_listed(list: &[String], payload: &Value, field: &str) -> bool {
    list.is_empty()
        || payload
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|v| list.iter().any(|allowed| allowed == v))
}

/// Whether `event` concerns `owner_id` and passes the type-specific filter.
fn matches_event(metadata: &TriggerMetadata, owner_id: &str, event: &BusEvent) -> bool {
    if !event.is_for_owner(owner_id) {
        return false;
    }
    let payload = &event.payload;
    match metadata {
        TriggerMetadata::EmailReceived { from } => match from {
            None => true,
            Some(wanted) => payload
                .get("from")
                .and_then(Value::as_str)
                .is_some_and(|sender| sender.to_lowercase().contains(&wanted.to_lowercase())),
        },
        TriggerMetadata::CalendarEvent { event_types } => allow_listed(event_types, payload, "event_type"),
        TriggerMetadata::TaskStatusChange { target_statuses } => allow_listed(target_statuses, payload, "status"),
        TriggerMetadata::AiInsight { insight_types } => allow_listed(insight_types, payload, "insight_type"),
        TriggerMetadata::EventBased { .. } => true,
        TriggerMetadata::TimeBased { .. } | TriggerMetadata::ContextPolling { .. } | TriggerMetadata::Manual => false,
    }
}

// ---------------------------------------------------------------------------
// Timer and poller tasks
// ---------------------------------------------------------------------------

fn spawn_timer(weak: Weak<RegistryInner>, trigger_id: String, schedule: cron::Schedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        // never fire one occurrence twice when the sleep wakes a little early
        let mut last_fired = Utc::now();
        loop {
            let now = Utc::now();
            let Some(next) = next_run_after(&schedule, now.max(last_fired)) else {
                debug!(trigger_id = %trigger_id, "schedule has no further occurrences");
                break;
            };
            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;
            last_fired = next;

            let Some(inner) = weak.upgrade() else {
                break;
            };
            let data = json!({ "scheduled_at": next, "fired_at": Utc::now() });
            if let Err(e) = inner.fire(&trigger_id, data) {
                warn!(trigger_id = %trigger_id, error = %e, "scheduled fire failed");
            }
        }
    })
}

fn spawn_poller(weak: Weak<RegistryInner>, trigger_id: String, owner_id: String, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let snapshot = match inner.context.snapshot(&owner_id, &Value::Null).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(trigger_id = %trigger_id, error = %e, "context snapshot failed");
                    continue;
                }
            };
            if let Err(e) = inner.fire(&trigger_id, snapshot.to_value()) {
                warn!(trigger_id = %trigger_id, error = %e, "polling fire failed");
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, ConditionOperator};
    use flowpilot_store::StoredTrigger;

    async fn registry() -> (TriggerRegistry, Stores, JobQueue, EventBus) {
        let stores = Stores::in_memory().await.unwrap();
        let bus = EventBus::new(64);
        let queue = JobQueue::new();
        (
            TriggerRegistry::new(stores.clone(), bus.clone(), queue.clone()),
            stores,
            queue,
            bus,
        )
    }

    fn manual_with_threshold() -> TriggerSpec {
        TriggerSpec::new(TriggerMetadata::Manual).with_conditions(vec![Condition::new(
            "open_tasks",
            ConditionOperator::GreaterThan,
            json!(10),
        )])
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected_and_not_persisted() {
        let (reg, stores, _, _) = registry().await;
        let spec = TriggerSpec::new(TriggerMetadata::TimeBased {
            cron: "not a cron".into(),
        });
        let err = reg.register("o1", spec).await.unwrap_err();
        assert_eq!(err.code(), "invalid_cron_expression");
        assert_eq!(stores.triggers.count().await.unwrap(), 0);
        assert_eq!(reg.live_count(), 0);
    }

    #[tokio::test]
    async fn fire_respects_conditions() {
        let (reg, _, queue, _) = registry().await;
        let trigger = reg.register("o1", manual_with_threshold()).await.unwrap();
        assert_eq!(reg.detection_kind(&trigger.id), Some("manual"));

        assert_eq!(reg.fire(&trigger.id, json!({ "open_tasks": 3 })).unwrap(), None);
        assert!(queue.all_jobs().is_empty());

        let job_id = reg.fire(&trigger.id, json!({ "open_tasks": 25 })).unwrap().unwrap();
        let job = queue.status(job_id).unwrap();
        assert_eq!(job.job_type, WORKFLOW_JOB_TYPE);
        assert_eq!(job.payload["trigger_id"], trigger.id.as_str());
        assert_eq!(job.payload["trigger_type"], "manual");
        assert_eq!(job.payload["data"]["open_tasks"], 25);
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let (reg, stores, _, _) = registry().await;
        let trigger = reg.register("o1", manual_with_threshold()).await.unwrap();
        assert!(reg.is_live(&trigger.id));

        reg.deactivate(&trigger.id).await.unwrap();
        reg.deactivate(&trigger.id).await.unwrap();
        assert!(!reg.is_live(&trigger.id));
        assert!(!stores.triggers.get(&trigger.id).await.unwrap().unwrap().active);

        let err = reg.fire(&trigger.id, json!({ "open_tasks": 50 })).unwrap_err();
        assert_eq!(err.code(), "trigger_not_found");

        let err = reg.deactivate("trg_unknown").await.unwrap_err();
        assert_eq!(err.code(), "trigger_not_found");
    }

    #[tokio::test]
    async fn enable_disable_cycle_and_delete() {
        let (reg, stores, _, _) = registry().await;
        let trigger = reg
            .register("o1", TriggerSpec::new(TriggerMetadata::Manual).disabled())
            .await
            .unwrap();
        assert!(!reg.is_live(&trigger.id));

        let enabled = reg.set_enabled(&trigger.id, true).await.unwrap();
        assert!(enabled.enabled);
        assert!(reg.is_live(&trigger.id));
        assert!(stores.triggers.get(&trigger.id).await.unwrap().unwrap().active);

        let disabled = reg.set_enabled(&trigger.id, false).await.unwrap();
        assert!(!disabled.enabled);
        assert!(!reg.is_live(&trigger.id));

        reg.delete(&trigger.id).await.unwrap();
        assert!(stores.triggers.get(&trigger.id).await.unwrap().is_none());
        assert_eq!(reg.delete(&trigger.id).await.unwrap_err().code(), "trigger_not_found");
    }

    #[tokio::test]
    async fn event_trigger_fires_for_its_owner_only() {
        let (reg, _, queue, bus) = registry().await;
        let trigger = reg
            .register(
                "o1",
                TriggerSpec::new(TriggerMetadata::TaskStatusChange {
                    target_statuses: vec!["completed".into()],
                }),
            )
            .await
            .unwrap();
        assert_eq!(reg.detection_kind(&trigger.id), Some("subscription"));

        bus.emit(topics::TASK_STATUS_CHANGED, Some("o2"), json!({ "status": "completed" }))
            .unwrap();
        bus.emit(topics::TASK_STATUS_CHANGED, Some("o1"), json!({ "status": "blocked" }))
            .unwrap();
        bus.emit(topics::TASK_STATUS_CHANGED, Some("o1"), json!({ "status": "completed" }))
            .unwrap();

        let mut jobs = Vec::new();
        for _ in 0..100 {
            jobs = queue.jobs_of_type(WORKFLOW_JOB_TYPE);
            if !jobs.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // give stray deliveries a chance to show up
        tokio::time::sleep(Duration::from_millis(50)).await;
        let jobs_after = queue.jobs_of_type(WORKFLOW_JOB_TYPE);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs_after.len(), 1);
        assert_eq!(jobs_after[0].payload["owner_id"], "o1");
    }

    #[test]
    fn event_filters() {
        let event = |owner: &str, payload: Value| BusEvent::new("x", Some(owner.to_string()), payload);

        let email = TriggerMetadata::EmailReceived {
            from: Some("boss@".into()),
        };
        assert!(matches_event(&email, "o1", &event("o1", json!({ "from": "Boss@corp.com" }))));
        assert!(!matches_event(&email, "o1", &event("o1", json!({ "from": "news@corp.com" }))));
        assert!(!matches_event(&email, "o1", &event("o2", json!({ "from": "boss@corp.com" }))));

        let calendar = TriggerMetadata::CalendarEvent { event_types: vec![] };
        assert!(matches_event(&calendar, "o1", &event("o1", json!({}))));

        let insight = TriggerMetadata::AiInsight {
            insight_types: vec!["risk".into()],
        };
        assert!(matches_event(&insight, "o1", &event("o1", json!({ "insight_type": "risk" }))));
        assert!(!matches_event(&insight, "o1", &event("o1", json!({ "insight_type": "pattern" }))));
    }

    #[tokio::test]
    async fn reload_skips_broken_triggers() {
        let (reg, stores, _, _) = registry().await;
        let good = reg.register("o1", manual_with_threshold()).await.unwrap();
        reg.shutdown();
        assert_eq!(reg.live_count(), 0);

        let now = Utc::now();
        stores
            .triggers
            .insert(&StoredTrigger {
                id: "trg_broken".into(),
                owner_id: "o1".into(),
                trigger_type: "time_based".into(),
                config: json!({ "conditions": [] }),
                metadata: json!({ "cron": "every tuesday-ish" }),
                active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        assert_eq!(reg.reload_active().await.unwrap(), 1);
        assert!(reg.is_live(&good.id));
        assert!(!stores.triggers.get("trg_broken").await.unwrap().unwrap().active);
    }

    async fn wait_for_jobs(queue: &JobQueue, job_type: &str) -> Vec<flowpilot_kernel::JobInfo> {
        for _ in 0..200 {
            let jobs = queue.jobs_of_type(job_type);
            if !jobs.is_empty() {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Vec::new()
    }

    #[tokio::test(start_paused = true)]
    async fn poller_enqueues_context_snapshot() {
        let stores = Stores::in_memory().await.unwrap();
        let queue = JobQueue::new();
        let reg = TriggerRegistry::with_job_type(stores, EventBus::new(64), queue.clone(), "custom.execute");
        let trigger = reg
            .register(
                "o1",
                TriggerSpec::new(TriggerMetadata::ContextPolling {
                    interval: Duration::from_secs(10),
                }),
            )
            .await
            .unwrap();

        // nothing fires before the first interval has elapsed
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.jobs_of_type("custom.execute").is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let jobs = wait_for_jobs(&queue, "custom.execute").await;
        assert!(!jobs.is_empty());
        assert!(queue.jobs_of_type(WORKFLOW_JOB_TYPE).is_empty());
        let payload = &jobs[0].payload;
        assert_eq!(payload["owner_id"], "o1");
        assert_eq!(payload["trigger_id"], trigger.id.as_str());
        assert_eq!(payload["trigger_type"], "context_polling");
        assert_eq!(payload["data"]["owner_id"], "o1");
        assert_eq!(payload["data"]["open_tasks"], 0);

        reg.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_enqueues_each_occurrence_once() {
        let (reg, _, queue, _) = registry().await;
        let trigger = reg
            .register(
                "o1",
                TriggerSpec::new(TriggerMetadata::TimeBased {
                    cron: "* * * * * *".into(),
                }),
            )
            .await
            .unwrap();

        let jobs = wait_for_jobs(&queue, WORKFLOW_JOB_TYPE).await;
        assert!(!jobs.is_empty());
        let payload = &jobs[0].payload;
        assert_eq!(payload["owner_id"], "o1");
        assert_eq!(payload["trigger_id"], trigger.id.as_str());
        assert_eq!(payload["trigger_type"], "time_based");
        assert!(payload["data"]["scheduled_at"].is_string());

        reg.deactivate(&trigger.id).await.unwrap();
        let jobs = queue.jobs_of_type(WORKFLOW_JOB_TYPE);
        let mut scheduled: Vec<&str> = jobs
            .iter()
            .map(|j| j.payload["data"]["scheduled_at"].as_str().unwrap())
            .collect();
        let fired = scheduled.len();
        scheduled.sort_unstable();
        scheduled.dedup();
        assert_eq!(scheduled.len(), fired);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.jobs_of_type(WORKFLOW_JOB_TYPE).len(), fired);
    }

    #[tokio::test]
    async fn timer_and_poller_bindings() {
        let (reg, _, _, _) = registry().await;
        let timer = reg
            .register(
                "o1",
                TriggerSpec::new(TriggerMetadata::TimeBased {
                    cron: "0 9 * * *".into(),
                }),
            )
            .await
            .unwrap();
        let poller = reg
            .register(
                "o1",
                TriggerSpec::new(TriggerMetadata::ContextPolling {
                    interval: Duration::from_secs(60),
                }),
            )
            .await
            .unwrap();
        assert_eq!(reg.detection_kind(&timer.id), Some("timer"));
        assert_eq!(reg.detection_kind(&poller.id), Some("poller"));

        let too_fast = TriggerSpec::new(TriggerMetadata::ContextPolling {
            interval: Duration::from_secs(1),
        });
        assert_eq!(reg.register("o1", too_fast).await.unwrap_err().code(), "invalid_trigger_metadata");

        let listed = reg.get_triggers_for_owner("o1", Some(TriggerType::TimeBased)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, timer.id);
    }
}
