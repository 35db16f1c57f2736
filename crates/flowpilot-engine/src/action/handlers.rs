//! Built-in action handlers, one per [`ActionType`].
//!
//! Handlers receive parameters that already passed validation, so the
//! accessors below only fail on a schema/handler mismatch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use flowpilot_agent::TextGenerator;
use flowpilot_kernel::{EventBus, JobQueue, topics};
use flowpilot_store::{NewEvent, NewTask, Stores, TaskUpdate};
use serde_json::{Map, Value, json};
use tracing::info;

use super::executor::{ActionExecutor, ActionHandler};
use super::validation::parse_date;
use super::ActionType;
use crate::error::{EngineError, Result};
use crate::notifier::{NotificationMessage, Notifier};
use crate::registry::TriggerRegistry;

/// Queue job type used for third-party integration calls.
pub const INTEGRATION_JOB_TYPE: &str = "integration.execute";

/// Upper bound on rows scanned by `analyze_data`.
const ANALYZE_SCAN_LIMIT: i64 = 1000;

// ---------------------------------------------------------------------------
// Parameter accessors
// ---------------------------------------------------------------------------

fn req_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Internal(format!("parameter `{key}` missing after validation")))
}

fn opt_str(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn opt_date(params: &Map<String, Value>, key: &str) -> Option<chrono::DateTime<Utc>> {
    params.get(key).and_then(Value::as_str).and_then(parse_date)
}

fn req_date(params: &Map<String, Value>, key: &str) -> Result<chrono::DateTime<Utc>> {
    opt_date(params, key).ok_or_else(|| EngineError::Internal(format!("parameter `{key}` is not a date")))
}

fn string_list(params: &Map<String, Value>, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tasks and reminders
// ---------------------------------------------------------------------------

struct CreateTask {
    stores: Stores,
}

#[async_trait]
impl ActionHandler for CreateTask {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let task = self
            .stores
            .tasks
            .create(NewTask {
                owner_id: owner_id.to_string(),
                title: req_str(params, "title")?.to_string(),
                description: opt_str(params, "description"),
                status: None,
                priority: opt_str(params, "priority"),
                due_date: opt_date(params, "due_date"),
                assignee: opt_str(params, "assignee"),
            })
            .await?;
        Ok(json!({ "task_id": task.id, "title": task.title }))
    }
}

struct UpdateTask {
    stores: Stores,
    bus: EventBus,
}

#[async_trait]
impl ActionHandler for UpdateTask {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let task_id = req_str(params, "task_id")?;
        let existing = self
            .stores
            .tasks
            .get(task_id)
            .await?
            .filter(|t| t.owner_id == owner_id)
            .ok_or_else(|| EngineError::Internal(format!("task {task_id} not found for owner")))?;

        let updated = self
            .stores
            .tasks
            .update(
                task_id,
                TaskUpdate {
                    title: opt_str(params, "title"),
                    description: None,
                    status: opt_str(params, "status"),
                    priority: opt_str(params, "priority"),
                    due_date: opt_date(params, "due_date"),
                    assignee: opt_str(params, "assignee"),
                },
            )
            .await?;

        if updated.status != existing.status {
            self.bus.emit(
                topics::TASK_STATUS_CHANGED,
                Some(owner_id),
                json!({
                    "task_id": updated.id,
                    "status": updated.status,
                    "previous_status": existing.status,
                }),
            )?;
        }
        Ok(json!({ "task_id": updated.id, "status": updated.status }))
    }
}

struct CreateReminder {
    stores: Stores,
}

#[async_trait]
impl ActionHandler for CreateReminder {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let reminder = self
            .stores
            .tasks
            .create_reminder(
                owner_id,
                req_str(params, "title")?,
                opt_str(params, "message"),
                req_date(params, "remind_at")?,
                opt_str(params, "task_id"),
            )
            .await?;
        Ok(json!({ "reminder_id": reminder.id, "remind_at": reminder.remind_at }))
    }
}

// ---------------------------------------------------------------------------
// Email and calendar
// ---------------------------------------------------------------------------

struct SendEmail {
    stores: Stores,
}

#[async_trait]
impl ActionHandler for SendEmail {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let email = self
            .stores
            .emails
            .queue_outbound(
                owner_id,
                string_list(params, "to"),
                req_str(params, "subject")?,
                req_str(params, "body")?,
            )
            .await?;
        Ok(json!({ "email_id": email.id, "status": email.status, "recipients": email.recipients }))
    }
}

struct ScheduleEvent {
    stores: Stores,
}

#[async_trait]
impl ActionHandler for ScheduleEvent {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let event = self
            .stores
            .calendar
            .create(NewEvent {
                owner_id: owner_id.to_string(),
                title: req_str(params, "title")?.to_string(),
                description: opt_str(params, "description"),
                start_time: req_date(params, "start_time")?,
                end_time: req_date(params, "end_time")?,
                location: opt_str(params, "location"),
                attendees: string_list(params, "attendees"),
            })
            .await?;
        Ok(json!({ "event_id": event.id, "start_time": event.start_time, "end_time": event.end_time }))
    }
}

// ---------------------------------------------------------------------------
// Integrations and nested workflows
// ---------------------------------------------------------------------------

struct ExecuteIntegration {
    queue: JobQueue,
}

#[async_trait]
impl ActionHandler for ExecuteIntegration {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let provider = req_str(params, "provider")?;
        let operation = req_str(params, "operation")?;
        let job_id = self.queue.enqueue(
            INTEGRATION_JOB_TYPE,
            json!({
                "owner_id": owner_id,
                "provider": provider,
                "operation": operation,
                "payload": params.get("payload").cloned().unwrap_or_else(|| json!({})),
            }),
        )?;
        info!(owner_id = %owner_id, %provider, %operation, %job_id, "integration job enqueued");
        Ok(json!({ "job_id": job_id.to_string() }))
    }
}

struct TriggerWorkflow {
    triggers: TriggerRegistry,
}

#[async_trait]
impl ActionHandler for TriggerWorkflow {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let trigger_id = req_str(params, "trigger_id")?;
        match self.triggers.get_trigger(trigger_id) {
            Some(trigger) if trigger.owner_id == owner_id => {}
            _ => {
                return Err(EngineError::TriggerNotFound {
                    trigger_id: trigger_id.to_string(),
                });
            }
        }
        let data = params.get("data").cloned().unwrap_or_else(|| json!({}));
        let job_id = self.triggers.fire(trigger_id, data)?;
        Ok(json!({
            "trigger_id": trigger_id,
            "fired": job_id.is_some(),
            "job_id": job_id.map(|id| id.to_string()),
        }))
    }
}

// ---------------------------------------------------------------------------
// Generation, analysis, notification
// ---------------------------------------------------------------------------

struct GenerateContent {
    stores: Stores,
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl ActionHandler for GenerateContent {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let content_type = req_str(params, "content_type")?;
        let prompt = req_str(params, "prompt")?;
        let content = self.generator.complete(prompt).await?;
        let stored = self
            .stores
            .accounts
            .save_content(owner_id, content_type, prompt, &content)
            .await?;
        Ok(json!({
            "content_id": stored.id,
            "content_type": stored.content_type,
            "length": stored.content.chars().count(),
        }))
    }
}

struct AnalyzeData {
    stores: Stores,
}

#[async_trait]
impl ActionHandler for AnalyzeData {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let data_type = req_str(params, "data_type")?;
        let days = params
            .get("time_range_days")
            .and_then(Value::as_f64)
            .unwrap_or(7.0)
            .round() as i64;
        let now = Utc::now();
        let since = now - Duration::days(days);

        let summary = match data_type {
            "tasks" => {
                let created = self.stores.tasks.created_since(owner_id, since).await?;
                let completed = created.iter().filter(|t| t.status == "completed").count();
                json!({
                    "count": created.len(),
                    "completed": completed,
                    "open": self.stores.tasks.count_open(owner_id).await?,
                    "overdue": self.stores.tasks.count_overdue(owner_id, now).await?,
                })
            }
            "calendar" => {
                let events = self
                    .stores
                    .calendar
                    .events_between(owner_id, since, now + Duration::days(days))
                    .await?;
                let minutes: i64 = events.iter().map(|e| (e.end_time - e.start_time).num_minutes()).sum();
                json!({ "count": events.len(), "scheduled_minutes": minutes })
            }
            "emails" => {
                let emails = self.stores.emails.list_for_owner(owner_id, ANALYZE_SCAN_LIMIT).await?;
                let recent: Vec<_> = emails.iter().filter(|e| e.created_at >= since).collect();
                let inbound = recent.iter().filter(|e| e.direction == "inbound").count();
                json!({ "count": recent.len(), "inbound": inbound, "outbound": recent.len() - inbound })
            }
            "activity" => {
                let entries = self.stores.activity.recent(owner_id, ANALYZE_SCAN_LIMIT).await?;
                let count = entries.iter().filter(|e| e.created_at >= since).count();
                json!({ "count": count })
            }
            "executions" => {
                let executions = self
                    .stores
                    .executions
                    .list_for_owner(owner_id, ANALYZE_SCAN_LIMIT)
                    .await?;
                let recent: Vec<_> = executions.iter().filter(|e| e.started_at >= since).collect();
                let completed = recent.iter().filter(|e| e.status == "completed").count();
                json!({ "count": recent.len(), "completed": completed })
            }
            other => return Err(EngineError::Internal(format!("unsupported data type `{other}`"))),
        };

        Ok(json!({
            "data_type": data_type,
            "time_range_days": days,
            "summary": summary,
        }))
    }
}

struct NotifyUser {
    notifier: Notifier,
}

#[async_trait]
impl ActionHandler for NotifyUser {
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let notification = self
            .notifier
            .send_to_user(
                owner_id,
                NotificationMessage {
                    notification_type: opt_str(params, "notification_type").unwrap_or_else(|| "workflow".into()),
                    title: req_str(params, "title")?.to_string(),
                    message: req_str(params, "message")?.to_string(),
                    metadata: params.get("metadata").cloned().unwrap_or(Value::Null),
                },
            )
            .await?;
        Ok(json!({ "notification_id": notification.id }))
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// What the built-in handlers act on.
#[derive(Clone)]
pub struct HandlerDeps {
    pub stores: Stores,
    pub bus: EventBus,
    pub queue: JobQueue,
    pub triggers: TriggerRegistry,
    pub generator: Arc<dyn TextGenerator>,
    pub notifier: Notifier,
}

/// Register a handler for every [`ActionType`].
pub fn register_builtin(executor: &ActionExecutor, deps: HandlerDeps) {
    let HandlerDeps {
        stores,
        bus,
        queue,
        triggers,
        generator,
        notifier,
    } = deps;

    executor.register_handler(ActionType::CreateTask, Arc::new(CreateTask { stores: stores.clone() }));
    executor.register_handler(
        ActionType::UpdateTask,
        Arc::new(UpdateTask {
            stores: stores.clone(),
            bus,
        }),
    );
    executor.register_handler(ActionType::SendEmail, Arc::new(SendEmail { stores: stores.clone() }));
    executor.register_handler(ActionType::ScheduleEvent, Arc::new(ScheduleEvent { stores: stores.clone() }));
    executor.register_handler(ActionType::CreateReminder, Arc::new(CreateReminder { stores: stores.clone() }));
    executor.register_handler(ActionType::ExecuteIntegration, Arc::new(ExecuteIntegration { queue }));
    executor.register_handler(ActionType::TriggerWorkflow, Arc::new(TriggerWorkflow { triggers }));
    executor.register_handler(
        ActionType::GenerateContent,
        Arc::new(GenerateContent {
            stores: stores.clone(),
            generator,
        }),
    );
    executor.register_handler(ActionType::AnalyzeData, Arc::new(AnalyzeData { stores }));
    executor.register_handler(ActionType::NotifyUser, Arc::new(NotifyUser { notifier }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionStatus, WorkflowAction};
    use flowpilot_agent::DisabledGenerator;
    use flowpilot_kernel::{IntegrationRegistry, IntegrationStatus};

    struct Fixture {
        stores: Stores,
        bus: EventBus,
        integrations: IntegrationRegistry,
        executor: ActionExecutor,
    }

    async fn fixture() -> Fixture {
        let stores = Stores::in_memory().await.unwrap();
        let bus = EventBus::new(64);
        let queue = JobQueue::new();
        let integrations = IntegrationRegistry::new();
        let triggers = TriggerRegistry::new(stores.clone(), bus.clone(), queue.clone());
        let executor = ActionExecutor::new(stores.accounts.clone(), integrations.clone());
        register_builtin(
            &executor,
            HandlerDeps {
                stores: stores.clone(),
                bus: bus.clone(),
                queue,
                triggers,
                generator: Arc::new(DisabledGenerator),
                notifier: Notifier::new(stores.activity.clone(), bus.clone()),
            },
        );
        Fixture {
            stores,
            bus,
            integrations,
            executor,
        }
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn every_type_has_a_handler() {
        let f = fixture().await;
        for t in ActionType::ALL {
            assert!(f.executor.has_handler(t), "{t}");
        }
    }

    #[tokio::test]
    async fn create_then_update_task_emits_status_change() {
        let f = fixture().await;
        let mut rx = f.bus.subscribe();

        let created = f
            .executor
            .execute(
                "o1",
                &WorkflowAction::new(ActionType::CreateTask, "create"),
                params(json!({ "title": "Write report", "priority": "high" })),
            )
            .await;
        assert!(created.succeeded());
        let task_id = created.output.unwrap()["task_id"].as_str().unwrap().to_string();

        let updated = f
            .executor
            .execute(
                "o1",
                &WorkflowAction::new(ActionType::UpdateTask, "update"),
                params(json!({ "task_id": task_id, "status": "completed" })),
            )
            .await;
        assert!(updated.succeeded(), "{:?}", updated.error);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, topics::TASK_STATUS_CHANGED);
        assert_eq!(event.payload["status"], "completed");
        assert_eq!(event.payload["previous_status"], "todo");
    }

    #[tokio::test]
    async fn schedule_event_needs_calendar() {
        let f = fixture().await;
        let action = WorkflowAction::new(ActionType::ScheduleEvent, "focus");
        let p = params(json!({
            "title": "Focus",
            "start_time": "2025-03-11T09:00:00Z",
            "end_time": "2025-03-11T11:00:00Z",
        }));
        let record = f.executor.execute("o1", &action, p.clone()).await;
        assert_eq!(record.status, ActionStatus::Failed);

        f.integrations.register("o1", "calendar", IntegrationStatus::Connected, true);
        let record = f.executor.execute("o1", &action, p).await;
        assert!(record.succeeded(), "{:?}", record.error);
    }

    #[tokio::test]
    async fn analyze_tasks_summary() {
        let f = fixture().await;
        for title in ["a", "b"] {
            f.stores
                .tasks
                .create(NewTask {
                    owner_id: "o1".into(),
                    title: title.into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let record = f
            .executor
            .execute(
                "o1",
                &WorkflowAction::new(ActionType::AnalyzeData, "analyze"),
                params(json!({ "data_type": "tasks", "time_range_days": 7 })),
            )
            .await;
        let output = record.output.unwrap();
        assert_eq!(output["summary"]["count"], 2);
        assert_eq!(output["summary"]["open"], 2);
    }

    #[tokio::test]
    async fn generate_content_surfaces_backend_failure() {
        let f = fixture().await;
        f.stores.accounts.grant_permission("o1", "ai:generate").await.unwrap();
        let record = f
            .executor
            .execute(
                "o1",
                &WorkflowAction::new(ActionType::GenerateContent, "draft"),
                params(json!({ "content_type": "email_template", "prompt": "hi" })),
            )
            .await;
        assert_eq!(record.error_code.as_deref(), Some("handler_failed"));
    }

    #[tokio::test]
    async fn trigger_workflow_rejects_unknown_trigger() {
        let f = fixture().await;
        let record = f
            .executor
            .execute(
                "o1",
                &WorkflowAction::new(ActionType::TriggerWorkflow, "nested"),
                params(json!({ "trigger_id": "trg_missing" })),
            )
            .await;
        assert_eq!(record.error_code.as_deref(), Some("handler_failed"));
        assert!(record.error.unwrap().contains("trg_missing"));
    }
}
