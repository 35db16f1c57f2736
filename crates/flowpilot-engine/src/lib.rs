//! Workflow automation engine for flowpilot.
//!
//! Each execution runs the Trigger, Analysis, Suggestion, Action cycle:
//!
//! - **Triggers**: typed trigger definitions ([`trigger`]), condition lists
//!   ([`condition`]) and the [`registry::TriggerRegistry`] that binds each
//!   enabled trigger to a timer, event subscription or poller and enqueues
//!   a job when it fires.
//! - **Analysis**: context snapshots ([`context`]) and insight detection
//!   via [`analysis::AnalysisEngine`].
//! - **Suggestions**: ranked, confidence-scored action sets from
//!   [`suggestion::SuggestionGenerator`].
//! - **Actions**: the fixed action catalog, parameter validation and the
//!   [`action::ActionExecutor`] with its built-in handlers.
//! - **Orchestration**: [`workflow::WorkflowEngine`] drives one execution
//!   through its phases; [`job::WorkflowJobHandler`] feeds it from the
//!   queue and [`runtime::Runtime`] wires everything together.

pub mod action;
pub mod analysis;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod generated;
pub mod job;
pub mod notifier;
pub mod registry;
pub mod runtime;
pub mod schedule;
pub mod suggestion;
pub mod trigger;
pub mod workflow;

pub use action::{ActionExecutor, ActionStatus, ActionType, ExecutedAction, WorkflowAction};
pub use analysis::{AnalysisEngine, AnalysisInsight, InsightType, WorkflowAnalysis};
pub use condition::{Condition, ConditionOperator, LogicalOperator};
pub use config::EngineConfig;
pub use error::{ActionError, EngineError, PreconditionError, Result, ValidationError};
pub use job::WorkflowJobHandler;
pub use notifier::{NotificationMessage, Notifier};
pub use registry::{TriggerRegistry, WORKFLOW_JOB_TYPE};
pub use runtime::Runtime;
pub use suggestion::{SuggestionGenerator, SuggestionType, WorkflowSuggestion};
pub use trigger::{Trigger, TriggerMetadata, TriggerSpec, TriggerType};
pub use workflow::{
    EngineDeps, ExecutionRequest, ExecutionStatus, WorkflowEngine, WorkflowExecution, WorkflowPreferences,
};
