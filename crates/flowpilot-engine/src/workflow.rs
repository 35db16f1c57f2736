//! Orchestration loop.
//!
//! One execution walks `pending -> analyzing -> suggesting -> executing ->
//! completed`.  Every transition is persisted and announced on the bus
//! before the next phase starts.  `failed` is reachable from any phase,
//! `cancelled` from any non-terminal state through [`WorkflowEngine::cancel`].
//!
//! In-flight executions live in a process-local table owned by the engine.
//! Cancellation only removes the entry from that table; a phase that
//! finishes afterwards sees the entry gone and stops without recording
//! further progress.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use flowpilot_agent::TextGenerator;
use flowpilot_kernel::{EventBus, IntegrationRegistry, IntegrationStatus, topics};
use flowpilot_store::{StoredExecution, StoredMetrics, StoredPreferences, Stores};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::action::catalog::ParamType;
use crate::action::{ActionExecutor, ExecutedAction, WorkflowAction};
use crate::analysis::{AnalysisEngine, AnalysisRequest, WorkflowAnalysis};
use crate::condition::Condition;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::registry::TriggerRegistry;
use crate::suggestion::{SuggestionGenerator, WorkflowSuggestion};
use crate::trigger::TriggerType;

/// Confidence a suggestion needs when auto-approve is off.
pub const MANUAL_MIN_CONFIDENCE: f64 = 0.7;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Analyzing,
    Suggesting,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Suggesting => "suggesting",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "analyzing" => Some(Self::Analyzing),
            "suggesting" => Some(Self::Suggesting),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Phases advance one step at a time; any live state may fail or be
    /// cancelled.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed | Cancelled) => true,
            (Pending, Analyzing) | (Analyzing, Suggesting) | (Suggesting, Executing) | (Executing, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Execution record
// ---------------------------------------------------------------------------

/// What the trigger looked like when it fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSnapshot {
    pub trigger_id: String,
    pub trigger_type: TriggerType,
    pub data: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Outcome of one selected suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub suggestion_id: String,
    pub success: bool,
    pub actions_executed: usize,
    pub actions_failed: usize,
    /// Minutes.
    pub time_saved: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
    pub recoverable: bool,
}

impl From<&EngineError> for WorkflowError {
    fn from(err: &EngineError) -> Self {
        let details = match err {
            EngineError::TriggerNotFound { trigger_id } => json!({ "trigger_id": trigger_id }),
            EngineError::ExecutionNotFound { execution_id } => json!({ "execution_id": execution_id }),
            _ => Value::Null,
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details,
            recoverable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub owner_id: String,
    /// Id of the trigger that started this execution.
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub trigger: TriggerSnapshot,
    pub analysis: Option<WorkflowAnalysis>,
    pub selected_suggestions: Vec<String>,
    pub executed_actions: Vec<ExecutedAction>,
    pub results: Vec<ExecutionResult>,
    pub error: Option<WorkflowError>,
}

impl WorkflowExecution {
    pub fn new(owner_id: &str, trigger: TriggerSnapshot) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            workflow_id: trigger.trigger_id.clone(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            trigger,
            analysis: None,
            selected_suggestions: Vec::new(),
            executed_actions: Vec::new(),
            results: Vec::new(),
            error: None,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64
    }

    pub fn to_stored(&self) -> Result<StoredExecution> {
        Ok(StoredExecution {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            workflow_id: self.workflow_id.clone(),
            status: self.status.as_str().to_string(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            trigger_data: serde_json::to_value(&self.trigger)?,
            analysis_data: match &self.analysis {
                Some(analysis) => serde_json::to_value(analysis)?,
                None => Value::Null,
            },
            selected_suggestions: self.selected_suggestions.clone(),
            executed_actions: serde_json::to_value(&self.executed_actions)?,
            result: serde_json::to_value(&self.results)?,
            error: self.error.as_ref().map(serde_json::to_value).transpose()?,
        })
    }

    pub fn from_stored(stored: &StoredExecution) -> Result<Self> {
        let status = ExecutionStatus::parse(&stored.status)
            .ok_or_else(|| EngineError::Internal(format!("unknown execution status `{}`", stored.status)))?;
        let analysis = match &stored.analysis_data {
            Value::Null => None,
            v => Some(serde_json::from_value(v.clone())?),
        };
        Ok(Self {
            id: stored.id.clone(),
            owner_id: stored.owner_id.clone(),
            workflow_id: stored.workflow_id.clone(),
            status,
            started_at: stored.started_at,
            completed_at: stored.completed_at,
            trigger: serde_json::from_value(stored.trigger_data.clone())?,
            analysis,
            selected_suggestions: stored.selected_suggestions.clone(),
            executed_actions: serde_json::from_value(stored.executed_actions.clone())?,
            results: serde_json::from_value(stored.result.clone())?,
            error: stored.error.clone().map(serde_json::from_value).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Approval policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPreferences {
    pub auto_approve: bool,
    pub confidence_threshold: f64,
    pub min_priority: u8,
    pub max_auto_actions: usize,
}

impl Default for WorkflowPreferences {
    fn default() -> Self {
        Self {
            auto_approve: false,
            confidence_threshold: 0.8,
            min_priority: 5,
            max_auto_actions: 3,
        }
    }
}

impl WorkflowPreferences {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(EngineError::InvalidPreferences {
                reason: format!("confidence threshold {} is outside 0..=1", self.confidence_threshold),
            });
        }
        if self.min_priority > 10 {
            return Err(EngineError::InvalidPreferences {
                reason: format!("minimum priority {} is above 10", self.min_priority),
            });
        }
        Ok(())
    }

    pub fn from_stored(stored: &StoredPreferences) -> Self {
        Self {
            auto_approve: stored.auto_approve,
            confidence_threshold: stored.confidence_threshold,
            min_priority: stored.min_priority.clamp(0, i64::from(u8::MAX)) as u8,
            max_auto_actions: stored.max_auto_actions.max(0) as usize,
        }
    }

    pub fn to_stored(&self, owner_id: &str) -> StoredPreferences {
        StoredPreferences {
            owner_id: owner_id.to_string(),
            auto_approve: self.auto_approve,
            confidence_threshold: self.confidence_threshold,
            min_priority: i64::from(self.min_priority),
            max_auto_actions: i64::try_from(self.max_auto_actions).unwrap_or(i64::MAX),
            updated_at: Utc::now(),
        }
    }
}

/// Pick the suggestions that run without manual confirmation, keeping
/// their rank order.
///
/// With auto-approve on, every suggestion clearing both the confidence
/// threshold and the minimum priority is kept.  Otherwise suggestions at
/// [`MANUAL_MIN_CONFIDENCE`] or above are kept, at most `max_auto_actions`.
pub fn select_suggestions(suggestions: &[WorkflowSuggestion], prefs: &WorkflowPreferences) -> Vec<WorkflowSuggestion> {
    if prefs.auto_approve {
        suggestions
            .iter()
            .filter(|s| s.confidence >= prefs.confidence_threshold && s.priority >= prefs.min_priority)
            .cloned()
            .collect()
    } else {
        suggestions
            .iter()
            .filter(|s| s.confidence >= MANUAL_MIN_CONFIDENCE)
            .take(prefs.max_auto_actions)
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Parameter resolution
// ---------------------------------------------------------------------------

/// Concrete parameters for one action.
///
/// For every declared parameter the first available source wins: the value
/// the suggestion proposed, the trigger payload field of the same name, the
/// catalog default, and for required parameters a type-driven placeholder.
/// Strings are never synthesised.  Proposed values for undeclared keys are
/// passed through.
pub fn resolve_parameters(action: &WorkflowAction, trigger_data: &Value, now: DateTime<Utc>) -> Map<String, Value> {
    let mut params = action.parameters.clone();
    for def in action.definition().parameters {
        if params.get(def.name).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let value = trigger_data
            .get(def.name)
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| def.default.map(|d| d.to_value()))
            .or_else(|| {
                if !def.required {
                    return None;
                }
                match def.param_type {
                    ParamType::Date => Some(Value::String((now + Duration::hours(24)).to_rfc3339())),
                    ParamType::Number => Some(json!(def.min.unwrap_or(0.0))),
                    ParamType::Boolean => Some(Value::Bool(false)),
                    ParamType::Array => Some(Value::Array(Vec::new())),
                    ParamType::Object => Some(Value::Object(Map::new())),
                    ParamType::String => None,
                }
            });
        if let Some(value) = value {
            params.insert(def.name.to_string(), value);
        }
    }
    params
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Work item for one execution, as carried by a queue job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub owner_id: String,
    pub trigger_id: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub data: Value,
}

pub struct EngineDeps {
    pub stores: Stores,
    pub bus: EventBus,
    pub triggers: TriggerRegistry,
    pub integrations: IntegrationRegistry,
    pub executor: ActionExecutor,
    pub generator: Arc<dyn TextGenerator>,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    stores: Stores,
    bus: EventBus,
    triggers: TriggerRegistry,
    integrations: IntegrationRegistry,
    executor: ActionExecutor,
    analysis: AnalysisEngine,
    suggestions: SuggestionGenerator,
    default_preferences: WorkflowPreferences,
    live: DashMap<String, WorkflowExecution>,
}

/// How the phases of one execution ended without an error.
enum Outcome {
    Completed,
    Cancelled,
}

impl WorkflowEngine {
    pub fn new(deps: EngineDeps, config: &EngineConfig) -> Self {
        let EngineDeps {
            stores,
            bus,
            triggers,
            integrations,
            executor,
            generator,
        } = deps;
        Self {
            inner: Arc::new(EngineInner {
                analysis: AnalysisEngine::new(stores.clone(), Arc::clone(&generator)),
                suggestions: SuggestionGenerator::new(generator).with_limit(config.suggestion_limit),
                default_preferences: config.preferences.clone(),
                live: DashMap::new(),
                stores,
                bus,
                triggers,
                integrations,
                executor,
            }),
        }
    }

    /// Run one execution to a terminal state.
    ///
    /// Orchestration failures mark the execution failed and are returned.
    /// A cancelled execution is returned as `Ok` with status `cancelled`.
    pub async fn run(&self, request: ExecutionRequest) -> Result<WorkflowExecution> {
        let mut execution = WorkflowExecution::new(
            &request.owner_id,
            TriggerSnapshot {
                trigger_id: request.trigger_id,
                trigger_type: request.trigger_type,
                data: request.data,
                metadata: Value::Null,
                conditions: Vec::new(),
            },
        );

        self.inner.stores.executions.save(&execution.to_stored()?).await?;
        self.inner.live.insert(execution.id.clone(), execution.clone());
        self.emit_status(&execution, None)?;
        info!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            owner_id = %execution.owner_id,
            "execution started"
        );

        match self.drive(&mut execution).await {
            Ok(Outcome::Completed) => Ok(execution),
            Ok(Outcome::Cancelled) => {
                debug!(execution_id = %execution.id, "execution cancelled mid-flight");
                execution.status = ExecutionStatus::Cancelled;
                Ok(execution)
            }
            Err(e) => Err(self.fail(execution, e).await),
        }
    }

    async fn drive(&self, execution: &mut WorkflowExecution) -> Result<Outcome> {
        // -- analyzing ------------------------------------------------------
        if !self.transition(execution, ExecutionStatus::Analyzing).await? {
            return Ok(Outcome::Cancelled);
        }
        let trigger = self.inner.triggers.load_trigger(&execution.workflow_id).await?;
        if trigger.owner_id != execution.owner_id {
            return Err(EngineError::TriggerNotFound {
                trigger_id: trigger.id,
            });
        }
        execution.trigger.trigger_type = trigger.trigger_type();
        execution.trigger.metadata = trigger.metadata.to_value();
        execution.trigger.conditions = trigger.conditions.clone();

        let analysis = self
            .inner
            .analysis
            .analyze(AnalysisRequest {
                owner_id: &execution.owner_id,
                trigger_id: &execution.workflow_id,
                trigger_type: execution.trigger.trigger_type,
                data: &execution.trigger.data,
            })
            .await
            .map_err(|e| match e {
                EngineError::AnalysisFailed { .. } => e,
                other => EngineError::AnalysisFailed {
                    reason: other.to_string(),
                },
            })?;
        execution.analysis = Some(analysis);

        // -- suggesting -----------------------------------------------------
        if !self.transition(execution, ExecutionStatus::Suggesting).await? {
            return Ok(Outcome::Cancelled);
        }
        let Some(analysis) = execution.analysis.as_mut() else {
            return Err(EngineError::Internal("analysis missing after analyzing phase".into()));
        };
        analysis.suggestions = self.inner.suggestions.generate(analysis).await;

        let prefs = self.get_preferences(&execution.owner_id).await?;
        let selected = select_suggestions(&analysis.suggestions, &prefs);
        execution.selected_suggestions = selected.iter().map(|s| s.id.clone()).collect();
        debug!(
            execution_id = %execution.id,
            generated = analysis.suggestions.len(),
            selected = selected.len(),
            auto_approve = prefs.auto_approve,
            "suggestions selected"
        );

        // -- executing ------------------------------------------------------
        if !self.transition(execution, ExecutionStatus::Executing).await? {
            return Ok(Outcome::Cancelled);
        }
        let now = Utc::now();
        let batch: Vec<(WorkflowAction, Map<String, Value>)> = selected
            .iter()
            .flat_map(|s| s.actions.iter())
            .map(|action| {
                let params = resolve_parameters(action, &execution.trigger.data, now);
                (action.clone(), params)
            })
            .collect();
        execution.executed_actions = self.inner.executor.execute_many(&execution.owner_id, batch).await;
        execution.results = summarize(&selected, &execution.executed_actions);

        // -- completed ------------------------------------------------------
        self.complete(execution, &selected).await
    }

    /// Persist and announce a non-terminal phase change.  Returns `false`
    /// if the execution was cancelled in the meantime.
    async fn transition(&self, execution: &mut WorkflowExecution, next: ExecutionStatus) -> Result<bool> {
        let previous = execution.status;
        if !previous.can_transition_to(next) {
            return Err(EngineError::Internal(format!(
                "illegal execution transition {previous} -> {next}"
            )));
        }
        execution.status = next;

        match self.inner.live.get_mut(&execution.id) {
            Some(mut entry) => *entry = execution.clone(),
            None => return Ok(false),
        }
        if !self
            .inner
            .stores
            .executions
            .update_status(&execution.id, next.as_str(), None)
            .await?
        {
            return Ok(false);
        }

        self.emit_status(execution, Some(previous))?;
        info!(execution_id = %execution.id, from = %previous, to = %next, "execution status changed");
        Ok(true)
    }

    async fn complete(&self, execution: &mut WorkflowExecution, selected: &[WorkflowSuggestion]) -> Result<Outcome> {
        let previous = execution.status;
        let Some((_, claimed)) = self.inner.live.remove(&execution.id) else {
            return Ok(Outcome::Cancelled);
        };
        execution.status = ExecutionStatus::Completed;
        let completed_at = Utc::now();
        execution.completed_at = Some(completed_at);
        let saved: Result<()> = match execution.to_stored() {
            Ok(stored) => self.inner.stores.executions.save(&stored).await.map_err(EngineError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            // still executing until the terminal record is stored
            execution.status = previous;
            execution.completed_at = None;
            self.inner.live.insert(claimed.id.clone(), claimed);
            return Err(e);
        }

        // The completed record is final; bookkeeping below must not undo it.
        if let Err(e) = self.emit_status(execution, Some(previous)) {
            warn!(execution_id = %execution.id, error = %e, "could not announce completion");
        }

        let success = !execution.executed_actions.iter().any(ExecutedAction::failed);
        let time_saved: f64 = selected.iter().map(WorkflowSuggestion::time_saved).sum();
        if let Err(e) = self
            .inner
            .stores
            .executions
            .record_metrics(
                &execution.workflow_id,
                success,
                execution.duration_ms(),
                time_saved,
                completed_at,
            )
            .await
        {
            warn!(workflow_id = %execution.workflow_id, error = %e, "could not record workflow metrics");
        }

        let failed = execution.executed_actions.iter().filter(|a| a.failed()).count();
        if let Err(e) = self
            .inner
            .stores
            .activity
            .log(
                &execution.owner_id,
                "workflow_completed",
                &format!(
                    "Workflow {} ran {} action(s), {} failed",
                    execution.workflow_id,
                    execution.executed_actions.len(),
                    failed
                ),
                json!({ "execution_id": execution.id, "workflow_id": execution.workflow_id }),
            )
            .await
        {
            warn!(execution_id = %execution.id, error = %e, "could not log workflow activity");
        }

        if let Err(e) = self.inner.bus.emit(
            topics::WORKFLOW_COMPLETED,
            Some(&execution.owner_id),
            json!({
                "execution_id": execution.id,
                "workflow_id": execution.workflow_id,
                "selected_suggestions": execution.selected_suggestions,
                "actions_executed": execution.executed_actions.len(),
                "actions_failed": failed,
                "time_saved": time_saved,
            }),
        ) {
            warn!(execution_id = %execution.id, error = %e, "could not emit completion event");
        }
        info!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            actions = execution.executed_actions.len(),
            failed,
            "execution completed"
        );
        Ok(Outcome::Completed)
    }

    /// Record `err` on the execution and hand it back to the caller.
    async fn fail(&self, mut execution: WorkflowExecution, err: EngineError) -> EngineError {
        if !execution.status.can_transition_to(ExecutionStatus::Failed) {
            debug!(execution_id = %execution.id, status = %execution.status, error = %err, "error after terminal state ignored");
            return err;
        }
        if self.inner.live.remove(&execution.id).is_none() {
            // cancelled while the failing phase ran
            debug!(execution_id = %execution.id, error = %err, "error after cancellation ignored");
            return err;
        }

        let previous = execution.status;
        execution.status = ExecutionStatus::Failed;
        let failed_at = Utc::now();
        execution.completed_at = Some(failed_at);
        execution.error = Some(WorkflowError::from(&err));
        error!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            code = err.code(),
            error = %err,
            "execution failed"
        );

        if let Err(e) = self.record_failure(&execution, previous, failed_at).await {
            warn!(execution_id = %execution.id, error = %e, "could not record execution failure");
        }
        err
    }

    async fn record_failure(
        &self,
        execution: &WorkflowExecution,
        previous: ExecutionStatus,
        failed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.stores.executions.save(&execution.to_stored()?).await?;
        self.inner
            .stores
            .executions
            .record_metrics(&execution.workflow_id, false, execution.duration_ms(), 0.0, failed_at)
            .await?;
        self.emit_status(execution, Some(previous))?;
        self.inner.bus.emit(
            topics::WORKFLOW_FAILED,
            Some(&execution.owner_id),
            json!({
                "execution_id": execution.id,
                "workflow_id": execution.workflow_id,
                "error": execution.error,
            }),
        )?;
        Ok(())
    }

    fn emit_status(&self, execution: &WorkflowExecution, previous: Option<ExecutionStatus>) -> Result<()> {
        self.inner.bus.emit(
            topics::WORKFLOW_STATUS_CHANGED,
            Some(&execution.owner_id),
            json!({
                "execution_id": execution.id,
                "workflow_id": execution.workflow_id,
                "status": execution.status,
                "previous_status": previous,
            }),
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cancellation and queries
    // -----------------------------------------------------------------------

    /// Cancel an in-flight execution.
    ///
    /// Terminal and unknown executions yield
    /// [`EngineError::ExecutionNotFound`].
    pub async fn cancel(&self, execution_id: &str) -> Result<WorkflowExecution> {
        let Some((_, mut execution)) = self.inner.live.remove(execution_id) else {
            return Err(EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            });
        };

        let previous = execution.status;
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        self.inner.stores.executions.save(&execution.to_stored()?).await?;
        self.emit_status(&execution, Some(previous))?;
        self.inner.bus.emit(
            topics::WORKFLOW_CANCELLED,
            Some(&execution.owner_id),
            json!({
                "execution_id": execution.id,
                "workflow_id": execution.workflow_id,
                "previous_status": previous,
            }),
        )?;
        info!(execution_id = %execution.id, from = %previous, "execution cancelled");
        Ok(execution)
    }

    /// Live table first, then the persisted record.
    pub async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution> {
        if let Some(live) = self.inner.live.get(execution_id) {
            return Ok(live.clone());
        }
        match self.inner.stores.executions.get(execution_id).await? {
            Some(stored) => WorkflowExecution::from_stored(&stored),
            None => Err(EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            }),
        }
    }

    /// Most recent first.
    pub async fn list_executions(&self, owner_id: &str, limit: i64) -> Result<Vec<WorkflowExecution>> {
        self.inner
            .stores
            .executions
            .list_for_owner(owner_id, limit)
            .await?
            .iter()
            .map(WorkflowExecution::from_stored)
            .collect()
    }

    pub fn live_executions(&self) -> Vec<WorkflowExecution> {
        self.inner.live.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn get_metrics(&self, workflow_id: &str) -> Result<Option<StoredMetrics>> {
        Ok(self.inner.stores.executions.get_metrics(workflow_id).await?)
    }

    /// Stored preferences, or the configured defaults.
    pub async fn get_preferences(&self, owner_id: &str) -> Result<WorkflowPreferences> {
        Ok(self
            .inner
            .stores
            .preferences
            .get(owner_id)
            .await?
            .map(|p| WorkflowPreferences::from_stored(&p))
            .unwrap_or_else(|| self.inner.default_preferences.clone()))
    }

    pub async fn set_preferences(&self, owner_id: &str, prefs: &WorkflowPreferences) -> Result<()> {
        prefs.validate()?;
        self.inner.stores.preferences.set(&prefs.to_stored(owner_id)).await?;
        info!(owner_id = %owner_id, auto_approve = prefs.auto_approve, "workflow preferences updated");
        Ok(())
    }

    /// Seed the integration registry from the persisted integration rows.
    pub async fn load_integrations(&self) -> Result<usize> {
        let rows = self.inner.stores.accounts.list_integrations().await?;
        for row in &rows {
            self.inner.integrations.register(
                row.owner_id.clone(),
                row.provider.clone(),
                IntegrationStatus::parse(&row.status),
                row.active,
            );
        }
        debug!(count = rows.len(), "integrations loaded");
        Ok(rows.len())
    }

    /// Executions by status as persisted.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        Ok(self.inner.stores.executions.count_by_status().await?)
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        &self.inner.triggers
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.inner.executor
    }
}

fn summarize(selected: &[WorkflowSuggestion], executed: &[ExecutedAction]) -> Vec<ExecutionResult> {
    let mut results = Vec::with_capacity(selected.len());
    let mut offset = 0;
    for suggestion in selected {
        let end = (offset + suggestion.actions.len()).min(executed.len());
        let records = &executed[offset..end];
        offset = end;

        let actions_failed = records.iter().filter(|a| a.failed()).count();
        results.push(ExecutionResult {
            suggestion_id: suggestion.id.clone(),
            success: records.iter().all(ExecutedAction::succeeded),
            actions_executed: records.iter().filter(|a| a.succeeded()).count(),
            actions_failed,
            time_saved: suggestion.time_saved(),
        });
    }
    results
}
