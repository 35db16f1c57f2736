//! Action executor.
//!
//! One call to [`ActionExecutor::execute`] walks four steps:
//!
//! 1. validate parameters against the catalog schema
//! 2. check every declared requirement for the owner
//! 3. dispatch to the handler registered for the action type
//! 4. record timing, status and output or error
//!
//! Nothing raised along the way escapes; every outcome is an
//! [`ExecutedAction`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use flowpilot_kernel::IntegrationRegistry;
use flowpilot_store::AccountStore;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::catalog::ActionRequirement;
use super::validation::validate;
use super::{ActionStatus, ActionType, ExecutedAction, WorkflowAction};
use crate::error::{ActionError, PreconditionError};

/// Performs the side effect of one action type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run with already validated parameters and return the output payload.
    async fn handle(&self, owner_id: &str, params: &Map<String, Value>) -> crate::Result<Value>;
}

/// Validates, checks and dispatches actions.
///
/// Cheaply cloneable; handlers may be registered after construction.
#[derive(Clone)]
pub struct ActionExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    handlers: DashMap<ActionType, Arc<dyn ActionHandler>>,
    accounts: AccountStore,
    integrations: IntegrationRegistry,
}

impl ActionExecutor {
    /// An executor with no handlers.  See [`super::handlers::register_builtin`].
    pub fn new(accounts: AccountStore, integrations: IntegrationRegistry) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                handlers: DashMap::new(),
                accounts,
                integrations,
            }),
        }
    }

    /// Register the handler for `action_type`, replacing any previous one.
    pub fn register_handler(&self, action_type: ActionType, handler: Arc<dyn ActionHandler>) {
        debug!(%action_type, "action handler registered");
        self.inner.handlers.insert(action_type, handler);
    }

    pub fn has_handler(&self, action_type: ActionType) -> bool {
        self.inner.handlers.contains_key(&action_type)
    }

    /// Execute one action with the given concrete parameters.
    pub async fn execute(&self, owner_id: &str, action: &WorkflowAction, params: Map<String, Value>) -> ExecutedAction {
        let executed_at = Utc::now();
        let started = Instant::now();
        let outcome = self.run(owner_id, action.action_type, &params).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                debug!(
                    owner_id = %owner_id,
                    action_id = %action.id,
                    action_type = %action.action_type,
                    duration_ms,
                    "action succeeded"
                );
                ExecutedAction {
                    action_id: action.id.clone(),
                    action_type: action.action_type,
                    executed_at,
                    duration_ms,
                    status: ActionStatus::Success,
                    parameters: params,
                    output: Some(output),
                    error: None,
                    error_code: None,
                    optional: action.optional,
                }
            }
            Err(e) => {
                warn!(
                    owner_id = %owner_id,
                    action_id = %action.id,
                    action_type = %action.action_type,
                    code = e.code(),
                    error = %e,
                    "action failed"
                );
                ExecutedAction {
                    action_id: action.id.clone(),
                    action_type: action.action_type,
                    executed_at,
                    duration_ms,
                    status: ActionStatus::Failed,
                    parameters: params,
                    output: None,
                    error: Some(e.to_string()),
                    error_code: Some(e.code().to_string()),
                    optional: action.optional,
                }
            }
        }
    }

    /// Execute in order.  After a failed non-optional action, the rest are
    /// recorded as skipped without running.
    pub async fn execute_many(
        &self,
        owner_id: &str,
        actions: Vec<(WorkflowAction, Map<String, Value>)>,
    ) -> Vec<ExecutedAction> {
        let mut executed = Vec::with_capacity(actions.len());
        let mut halted_by: Option<String> = None;

        for (action, params) in actions {
            if let Some(failed_id) = &halted_by {
                executed.push(ExecutedAction::skipped(
                    &action,
                    params,
                    &format!("batch halted after action {failed_id} failed"),
                ));
                continue;
            }
            let record = self.execute(owner_id, &action, params).await;
            if record.failed() && !action.optional {
                halted_by = Some(action.id.clone());
            }
            executed.push(record);
        }

        executed
    }

    async fn run(&self, owner_id: &str, action_type: ActionType, params: &Map<String, Value>) -> Result<Value, ActionError> {
        let definition = action_type.definition();
        validate(definition, params)?;
        for requirement in definition.requirements {
            self.check_requirement(owner_id, requirement, params).await?;
        }

        let handler = self
            .inner
            .handlers
            .get(&action_type)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| ActionError::UnknownHandler {
                action_type: action_type.to_string(),
            })?;

        handler
            .handle(owner_id, params)
            .await
            .map_err(|e| ActionError::Handler { message: e.to_string() })
    }

    async fn check_requirement(
        &self,
        owner_id: &str,
        requirement: &ActionRequirement,
        params: &Map<String, Value>,
    ) -> Result<(), PreconditionError> {
        match requirement {
            ActionRequirement::Permission(scope) => {
                let granted = self
                    .inner
                    .accounts
                    .has_permission(owner_id, scope)
                    .await
                    .map_err(|e| PreconditionError::CheckFailed { reason: e.to_string() })?;
                if !granted {
                    return Err(PreconditionError::PermissionDenied {
                        scope: scope.to_string(),
                    });
                }
            }
            ActionRequirement::Integration(provider) => {
                if !self.inner.integrations.is_connected(owner_id, provider) {
                    return Err(PreconditionError::IntegrationNotConnected {
                        provider: provider.to_string(),
                    });
                }
            }
            ActionRequirement::IntegrationParam(param) => {
                // validation already guarantees a string for required params
                let provider = params.get(*param).and_then(Value::as_str).unwrap_or_default();
                if !self.inner.integrations.is_connected(owner_id, provider) {
                    return Err(PreconditionError::IntegrationNotConnected {
                        provider: provider.to_string(),
                    });
                }
            }
            ActionRequirement::Data(category) => {
                let available = self
                    .inner
                    .accounts
                    .data_available(owner_id, category)
                    .await
                    .map_err(|e| PreconditionError::CheckFailed { reason: e.to_string() })?;
                if !available {
                    return Err(PreconditionError::DataUnavailable {
                        category: category.to_string(),
                    });
                }
            }
            // No human-in-the-loop mechanism exists yet.
            ActionRequirement::Confirmation => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_kernel::IntegrationStatus;
    use flowpilot_store::Stores;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl ActionHandler for Counting {
        async fn handle(&self, _owner_id: &str, params: &Map<String, Value>) -> crate::Result<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "echo": params }))
        }
    }

    struct Failing;

    #[async_trait]
    impl ActionHandler for Failing {
        async fn handle(&self, _owner_id: &str, _params: &Map<String, Value>) -> crate::Result<Value> {
            Err(crate::EngineError::Internal("boom".into()))
        }
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    async fn executor() -> (ActionExecutor, Stores, IntegrationRegistry) {
        let stores = Stores::in_memory().await.unwrap();
        let integrations = IntegrationRegistry::new();
        (
            ActionExecutor::new(stores.accounts.clone(), integrations.clone()),
            stores,
            integrations,
        )
    }

    #[tokio::test]
    async fn validation_failure_skips_handler() {
        let (exec, _stores, _) = executor().await;
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        exec.register_handler(ActionType::CreateTask, counting.clone());

        let action = WorkflowAction::new(ActionType::CreateTask, "create");
        let record = exec.execute("o1", &action, Map::new()).await;
        assert_eq!(record.status, ActionStatus::Failed);
        assert_eq!(record.error_code.as_deref(), Some("missing_parameter"));
        assert!(record.error.unwrap().contains("title"));
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn requirements_are_checked() {
        let (exec, stores, integrations) = executor().await;
        exec.register_handler(ActionType::SendEmail, Arc::new(Counting(AtomicUsize::new(0))));
        let action = WorkflowAction::new(ActionType::SendEmail, "mail");
        let p = params(json!({ "to": ["a@example.com"], "subject": "s", "body": "b" }));

        let record = exec.execute("o1", &action, p.clone()).await;
        assert_eq!(record.error_code.as_deref(), Some("integration_not_connected"));

        integrations.register("o1", "email", IntegrationStatus::Connected, true);
        let record = exec.execute("o1", &action, p.clone()).await;
        assert_eq!(record.error_code.as_deref(), Some("permission_denied"));

        stores.accounts.grant_permission("o1", "email:send").await.unwrap();
        let record = exec.execute("o1", &action, p).await;
        assert!(record.succeeded());
        assert!(record.output.is_some());
    }

    #[tokio::test]
    async fn integration_named_in_params_must_be_connected() {
        let (exec, stores, integrations) = executor().await;
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        exec.register_handler(ActionType::ExecuteIntegration, counting.clone());
        stores.accounts.grant_permission("o1", "integrations:execute").await.unwrap();
        let action = WorkflowAction::new(ActionType::ExecuteIntegration, "post");
        let p = params(json!({ "provider": "slack", "operation": "post_message" }));

        let record = exec.execute("o1", &action, p.clone()).await;
        assert_eq!(record.status, ActionStatus::Failed);
        assert_eq!(record.error_code.as_deref(), Some("integration_not_connected"));
        assert!(record.error.unwrap().contains("slack"));
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);

        // another provider being connected does not count
        integrations.register("o1", "github", IntegrationStatus::Connected, true);
        let record = exec.execute("o1", &action, p.clone()).await;
        assert_eq!(record.error_code.as_deref(), Some("integration_not_connected"));

        integrations.register("o1", "slack", IntegrationStatus::Connected, true);
        let record = exec.execute("o1", &action, p).await;
        assert!(record.succeeded());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn data_requirement_and_unknown_handler() {
        let (exec, _stores, _) = executor().await;
        let action = WorkflowAction::new(ActionType::UpdateTask, "update");
        let record = exec.execute("o1", &action, params(json!({ "task_id": "t1" }))).await;
        assert_eq!(record.error_code.as_deref(), Some("data_unavailable"));

        let action = WorkflowAction::new(ActionType::AnalyzeData, "analyze");
        let record = exec.execute("o1", &action, params(json!({ "data_type": "tasks" }))).await;
        assert_eq!(record.error_code.as_deref(), Some("unknown_handler"));
    }

    #[tokio::test]
    async fn handler_errors_are_captured() {
        let (exec, _stores, _) = executor().await;
        exec.register_handler(ActionType::NotifyUser, Arc::new(Failing));
        let action = WorkflowAction::new(ActionType::NotifyUser, "notify");
        let record = exec
            .execute("o1", &action, params(json!({ "title": "t", "message": "m" })))
            .await;
        assert_eq!(record.error_code.as_deref(), Some("handler_failed"));
        assert!(record.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn batch_halts_on_required_failure_only() {
        let (exec, _stores, _) = executor().await;
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        exec.register_handler(ActionType::NotifyUser, counting.clone());
        exec.register_handler(ActionType::AnalyzeData, Arc::new(Failing));

        let notify = || {
            (
                WorkflowAction::new(ActionType::NotifyUser, "notify"),
                params(json!({ "title": "t", "message": "m" })),
            )
        };
        let analyze = |optional: bool| {
            let mut action = WorkflowAction::new(ActionType::AnalyzeData, "analyze");
            action.optional = optional;
            (action, params(json!({ "data_type": "tasks" })))
        };

        let records = exec.execute_many("o1", vec![notify(), analyze(true), notify()]).await;
        let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![ActionStatus::Success, ActionStatus::Failed, ActionStatus::Success]);

        let records = exec.execute_many("o1", vec![notify(), analyze(false), notify()]).await;
        let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![ActionStatus::Success, ActionStatus::Failed, ActionStatus::Skipped]);
        assert_eq!(counting.0.load(Ordering::SeqCst), 3);
    }
}
