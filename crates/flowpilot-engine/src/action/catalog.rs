//! The fixed action catalog.
//!
//! One [`ActionDefinition`] per [`ActionType`], compiled in.  Suggestions
//! build actions against it, the executor validates and checks
//! requirements against it, and the CLI lists it.

use serde::Serialize;
use serde_json::Value;

use super::ActionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    /// RFC 3339 timestamp string.
    Date,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A schema default that can live in a `static`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Str(&'static str),
    Num(f64),
    Bool(bool),
}

impl DefaultValue {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Str(s) => Value::from(*s),
            Self::Num(n) => Value::from(*n),
            Self::Bool(b) => Value::from(*b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterDef {
    pub name: &'static str,
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ParameterDef {
    const fn new(name: &'static str, param_type: ParamType, required: bool) -> Self {
        Self {
            name,
            param_type,
            required,
            default: None,
            pattern: None,
            min: None,
            max: None,
        }
    }

    const fn required(name: &'static str, param_type: ParamType) -> Self {
        Self::new(name, param_type, true)
    }

    const fn optional(name: &'static str, param_type: ParamType) -> Self {
        Self::new(name, param_type, false)
    }

    const fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    const fn with_pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }

    const fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

/// What must hold for the owner before an action may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ActionRequirement {
    /// A granted permission scope such as `email:send`.
    Permission(&'static str),
    /// A connected and active integration for this provider.
    Integration(&'static str),
    /// A connected and active integration for the provider named by this
    /// parameter.
    IntegrationParam(&'static str),
    /// At least one record in a data category.
    Data(&'static str),
    /// Human confirmation; currently always passes.
    Confirmation,
}

/// Documentary description of a state change an action causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionEffect {
    pub kind: EffectKind,
    pub target: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Creates,
    Updates,
    Sends,
    Enqueues,
    Reads,
}

const fn effect(kind: EffectKind, target: &'static str) -> ActionEffect {
    ActionEffect { kind, target }
}

#[derive(Debug, Serialize)]
pub struct ActionDefinition {
    pub action_type: ActionType,
    pub description: &'static str,
    pub parameters: &'static [ParameterDef],
    pub requirements: &'static [ActionRequirement],
    pub effects: &'static [ActionEffect],
    pub reversible: bool,
}

impl ActionDefinition {
    pub fn parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

use DefaultValue::{Num, Str};
use EffectKind::*;
use ParamType as T;

const TASK_PRIORITY: &str = "^(low|medium|high|urgent)$";
const TASK_STATUS: &str = "^(todo|in_progress|blocked|completed|cancelled)$";

static CREATE_TASK: ActionDefinition = ActionDefinition {
    action_type: ActionType::CreateTask,
    description: "Create a task for the owner",
    parameters: &[
        ParameterDef::required("title", T::String),
        ParameterDef::optional("description", T::String),
        ParameterDef::optional("priority", T::String)
            .with_default(Str("medium"))
            .with_pattern(TASK_PRIORITY),
        ParameterDef::optional("due_date", T::Date),
        ParameterDef::optional("assignee", T::String),
    ],
    requirements: &[],
    effects: &[effect(Creates, "task")],
    reversible: true,
};

static UPDATE_TASK: ActionDefinition = ActionDefinition {
    action_type: ActionType::UpdateTask,
    description: "Change fields of an existing task",
    parameters: &[
        ParameterDef::required("task_id", T::String),
        ParameterDef::optional("title", T::String),
        ParameterDef::optional("status", T::String).with_pattern(TASK_STATUS),
        ParameterDef::optional("priority", T::String).with_pattern(TASK_PRIORITY),
        ParameterDef::optional("due_date", T::Date),
        ParameterDef::optional("assignee", T::String),
    ],
    requirements: &[ActionRequirement::Data("tasks")],
    effects: &[effect(Updates, "task")],
    reversible: true,
};

static SEND_EMAIL: ActionDefinition = ActionDefinition {
    action_type: ActionType::SendEmail,
    description: "Queue an outbound email through the connected mail provider",
    parameters: &[
        ParameterDef::required("to", T::Array),
        ParameterDef::required("subject", T::String),
        ParameterDef::required("body", T::String),
    ],
    requirements: &[
        ActionRequirement::Integration("email"),
        ActionRequirement::Permission("email:send"),
    ],
    effects: &[effect(Sends, "email")],
    reversible: false,
};

static SCHEDULE_EVENT: ActionDefinition = ActionDefinition {
    action_type: ActionType::ScheduleEvent,
    description: "Add an event to the owner's calendar",
    parameters: &[
        ParameterDef::required("title", T::String),
        ParameterDef::required("start_time", T::Date),
        ParameterDef::required("end_time", T::Date),
        ParameterDef::optional("description", T::String),
        ParameterDef::optional("location", T::String),
        ParameterDef::optional("attendees", T::Array),
    ],
    requirements: &[ActionRequirement::Integration("calendar")],
    effects: &[effect(Creates, "calendar_event")],
    reversible: true,
};

static CREATE_REMINDER: ActionDefinition = ActionDefinition {
    action_type: ActionType::CreateReminder,
    description: "Remind the owner at a given time",
    parameters: &[
        ParameterDef::required("title", T::String),
        ParameterDef::required("remind_at", T::Date),
        ParameterDef::optional("message", T::String),
        ParameterDef::optional("task_id", T::String),
    ],
    requirements: &[],
    effects: &[effect(Creates, "reminder")],
    reversible: true,
};

static EXECUTE_INTEGRATION: ActionDefinition = ActionDefinition {
    action_type: ActionType::ExecuteIntegration,
    description: "Enqueue an operation against a third-party integration",
    parameters: &[
        ParameterDef::required("provider", T::String).with_pattern("^[a-z][a-z0-9_-]*$"),
        ParameterDef::required("operation", T::String),
        ParameterDef::optional("payload", T::Object),
    ],
    requirements: &[
        ActionRequirement::Permission("integrations:execute"),
        ActionRequirement::IntegrationParam("provider"),
    ],
    effects: &[effect(Enqueues, "integration_job")],
    reversible: false,
};

static TRIGGER_WORKFLOW: ActionDefinition = ActionDefinition {
    action_type: ActionType::TriggerWorkflow,
    description: "Fire another trigger, starting a nested workflow",
    parameters: &[
        ParameterDef::required("trigger_id", T::String),
        ParameterDef::optional("data", T::Object),
    ],
    requirements: &[ActionRequirement::Confirmation],
    effects: &[effect(Enqueues, "workflow_job")],
    reversible: false,
};

static GENERATE_CONTENT: ActionDefinition = ActionDefinition {
    action_type: ActionType::GenerateContent,
    description: "Generate text with the language model and store it",
    parameters: &[
        ParameterDef::required("content_type", T::String),
        ParameterDef::required("prompt", T::String),
    ],
    requirements: &[ActionRequirement::Permission("ai:generate")],
    effects: &[effect(Creates, "generated_content")],
    reversible: true,
};

static ANALYZE_DATA: ActionDefinition = ActionDefinition {
    action_type: ActionType::AnalyzeData,
    description: "Summarise one data category over a recent time range",
    parameters: &[
        ParameterDef::required("data_type", T::String).with_pattern("^(tasks|calendar|emails|activity|executions)$"),
        ParameterDef::optional("time_range_days", T::Number)
            .with_default(Num(7.0))
            .with_range(1.0, 90.0),
    ],
    requirements: &[],
    effects: &[effect(Reads, "owner_data")],
    reversible: true,
};

static NOTIFY_USER: ActionDefinition = ActionDefinition {
    action_type: ActionType::NotifyUser,
    description: "Create and deliver a notification to the owner",
    parameters: &[
        ParameterDef::required("title", T::String),
        ParameterDef::required("message", T::String),
        ParameterDef::optional("notification_type", T::String).with_default(Str("workflow")),
        ParameterDef::optional("metadata", T::Object),
    ],
    requirements: &[],
    effects: &[effect(Creates, "notification")],
    reversible: false,
};

/// The catalog entry for `action_type`.
pub fn definition(action_type: ActionType) -> &'static ActionDefinition {
    match action_type {
        ActionType::CreateTask => &CREATE_TASK,
        ActionType::UpdateTask => &UPDATE_TASK,
        ActionType::SendEmail => &SEND_EMAIL,
        ActionType::ScheduleEvent => &SCHEDULE_EVENT,
        ActionType::CreateReminder => &CREATE_REMINDER,
        ActionType::ExecuteIntegration => &EXECUTE_INTEGRATION,
        ActionType::TriggerWorkflow => &TRIGGER_WORKFLOW,
        ActionType::GenerateContent => &GENERATE_CONTENT,
        ActionType::AnalyzeData => &ANALYZE_DATA,
        ActionType::NotifyUser => &NOTIFY_USER,
    }
}

/// Every definition, in [`ActionType::ALL`] order.
pub fn all() -> impl Iterator<Item = &'static ActionDefinition> {
    ActionType::ALL.into_iter().map(definition)
}
