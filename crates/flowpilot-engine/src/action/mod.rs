//! Actions: typed, schema-validated units of work.
//!
//! - [`catalog`] -- the fixed per-type table of parameters, requirements
//!   and effects.
//! - [`validation`] -- parameter checks against the catalog schema.
//! - [`executor`] -- validation, precondition checks and handler dispatch.
//! - [`handlers`] -- the built-in handler for every [`ActionType`].

pub mod catalog;
pub mod executor;
pub mod handlers;
pub mod validation;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use catalog::{ActionDefinition, ActionEffect, ActionRequirement, ParamType, ParameterDef};
pub use executor::{ActionExecutor, ActionHandler};

/// Every kind of action the engine can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateTask,
    UpdateTask,
    SendEmail,
    ScheduleEvent,
    CreateReminder,
    ExecuteIntegration,
    TriggerWorkflow,
    GenerateContent,
    AnalyzeData,
    NotifyUser,
}

impl ActionType {
    pub const ALL: [ActionType; 10] = [
        Self::CreateTask,
        Self::UpdateTask,
        Self::SendEmail,
        Self::ScheduleEvent,
        Self::CreateReminder,
        Self::ExecuteIntegration,
        Self::TriggerWorkflow,
        Self::GenerateContent,
        Self::AnalyzeData,
        Self::NotifyUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::UpdateTask => "update_task",
            Self::SendEmail => "send_email",
            Self::ScheduleEvent => "schedule_event",
            Self::CreateReminder => "create_reminder",
            Self::ExecuteIntegration => "execute_integration",
            Self::TriggerWorkflow => "trigger_workflow",
            Self::GenerateContent => "generate_content",
            Self::AnalyzeData => "analyze_data",
            Self::NotifyUser => "notify_user",
        }
    }

    /// The static definition of this type.
    pub fn definition(&self) -> &'static ActionDefinition {
        catalog::definition(*self)
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown action type `{s}`"))
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete action proposed by a suggestion.
///
/// Schema, requirements, effects and reversibility come from the catalog
/// entry of `action_type`; `parameters` holds the values the suggestion
/// proposes, which take precedence during parameter resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAction {
    pub id: String,
    pub action_type: ActionType,
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// A failure of an optional action does not halt the batch.
    #[serde(default)]
    pub optional: bool,
}

impl WorkflowAction {
    pub fn new(action_type: ActionType, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            action_type,
            name: name.into(),
            parameters: Map::new(),
            optional: false,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn definition(&self) -> &'static ActionDefinition {
        self.action_type.definition()
    }

    pub fn is_reversible(&self) -> bool {
        self.definition().reversible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

/// Record of one action attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub action_id: String,
    pub action_type: ActionType,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: ActionStatus,
    /// The parameters the handler was (or would have been) called with.
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable code of the failure, e.g. `missing_parameter`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl ExecutedAction {
    pub fn succeeded(&self) -> bool {
        self.status == ActionStatus::Success
    }

    pub fn failed(&self) -> bool {
        self.status == ActionStatus::Failed
    }

    /// Placeholder for an action that never ran because the batch halted.
    pub fn skipped(action: &WorkflowAction, parameters: Map<String, Value>, reason: &str) -> Self {
        Self {
            action_id: action.id.clone(),
            action_type: action.action_type,
            executed_at: Utc::now(),
            duration_ms: 0,
            status: ActionStatus::Skipped,
            parameters,
            output: None,
            error: Some(reason.to_string()),
            error_code: Some("skipped".into()),
            optional: action.optional,
        }
    }
}
