//! Engine error types.
//!
//! Two families live here:
//!
//! - [`EngineError`] for orchestration failures, surfaced to callers and
//!   persisted on failed executions as a [`crate::workflow::WorkflowError`].
//! - [`ActionError`] (with [`ValidationError`] and [`PreconditionError`]) for
//!   single-action failures.  These are recorded on the executed action and
//!   never escape the executor.

use serde::Serialize;

/// Unified error type for the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- Trigger errors ------------------------------------------------------
    /// A cron expression is invalid.
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    /// A trigger type needs a metadata field that was not supplied.
    #[error("trigger type `{trigger_type}` requires metadata field `{field}`")]
    MissingTriggerMetadata { trigger_type: String, field: String },

    /// Trigger metadata is present but unusable.
    #[error("invalid metadata for trigger type `{trigger_type}`: {reason}")]
    InvalidTriggerMetadata { trigger_type: String, reason: String },

    #[error("unknown trigger type `{0}`")]
    UnknownTriggerType(String),

    #[error("trigger not found: {trigger_id}")]
    TriggerNotFound { trigger_id: String },

    // -- Execution errors ----------------------------------------------------
    /// The execution is unknown or already terminal.
    #[error("execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    #[error("analysis failed: {reason}")]
    AnalysisFailed { reason: String },

    #[error("invalid workflow preferences: {reason}")]
    InvalidPreferences { reason: String },

    // -- Upstream crate errors -----------------------------------------------
    #[error("store error: {0}")]
    Store(#[from] flowpilot_store::StoreError),

    #[error("kernel error: {0}")]
    Kernel(#[from] flowpilot_kernel::KernelError),

    #[error("agent error: {0}")]
    Agent(#[from] flowpilot_agent::AgentError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable snake-case code persisted on failed executions.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCronExpression { .. } => "invalid_cron_expression",
            Self::MissingTriggerMetadata { .. } => "missing_trigger_metadata",
            Self::InvalidTriggerMetadata { .. } => "invalid_trigger_metadata",
            Self::UnknownTriggerType(_) => "unknown_trigger_type",
            Self::TriggerNotFound { .. } => "trigger_not_found",
            Self::ExecutionNotFound { .. } => "execution_not_found",
            Self::AnalysisFailed { .. } => "analysis_failed",
            Self::InvalidPreferences { .. } => "invalid_preferences",
            Self::Store(_) => "store_error",
            Self::Kernel(_) => "kernel_error",
            Self::Agent(_) => "agent_error",
            Self::Json(_) => "json_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Action-level errors
// ---------------------------------------------------------------------------

/// A parameter failed schema validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("missing required parameter `{parameter}`")]
    MissingParameter { parameter: String },

    #[error("parameter `{parameter}` must be of type {expected}")]
    InvalidType { parameter: String, expected: String },

    #[error("parameter `{parameter}` does not match pattern `{pattern}`")]
    PatternMismatch { parameter: String, pattern: String },

    #[error("parameter `{parameter}` is {actual}, below minimum {min}")]
    BelowMin { parameter: String, min: f64, actual: f64 },

    #[error("parameter `{parameter}` is {actual}, exceeds maximum {max}")]
    ExceedsMax { parameter: String, max: f64, actual: f64 },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingParameter { .. } => "missing_parameter",
            Self::InvalidType { .. } => "invalid_type",
            Self::PatternMismatch { .. } => "pattern_mismatch",
            Self::BelowMin { .. } => "below_min",
            Self::ExceedsMax { .. } => "exceeds_max",
        }
    }

    /// The offending parameter.
    pub fn parameter(&self) -> &str {
        match self {
            Self::MissingParameter { parameter }
            | Self::InvalidType { parameter, .. }
            | Self::PatternMismatch { parameter, .. }
            | Self::BelowMin { parameter, .. }
            | Self::ExceedsMax { parameter, .. } => parameter,
        }
    }
}

/// A declared action requirement is not met for the owner.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreconditionError {
    #[error("permission `{scope}` not granted")]
    PermissionDenied { scope: String },

    #[error("integration `{provider}` is not connected")]
    IntegrationNotConnected { provider: String },

    #[error("no `{category}` data available")]
    DataUnavailable { category: String },

    /// The check itself could not be carried out.
    #[error("could not check requirement: {reason}")]
    CheckFailed { reason: String },
}

impl PreconditionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "permission_denied",
            Self::IntegrationNotConnected { .. } => "integration_not_connected",
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::CheckFailed { .. } => "precondition_check_failed",
        }
    }
}

/// Why a single action did not succeed.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ActionError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("handler failed: {message}")]
    Handler { message: String },

    #[error("no handler registered for action type `{action_type}`")]
    UnknownHandler { action_type: String },
}

impl ActionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.code(),
            Self::Precondition(e) => e.code(),
            Self::Handler { .. } => "handler_failed",
            Self::UnknownHandler { .. } => "unknown_handler",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = EngineError::ExecutionNotFound {
            execution_id: "x".into(),
        };
        assert_eq!(err.code(), "execution_not_found");

        let err: ActionError = ValidationError::MissingParameter {
            parameter: "title".into(),
        }
        .into();
        assert_eq!(err.code(), "missing_parameter");
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn action_error_serializes_with_kind() {
        let err = ActionError::Precondition(PreconditionError::PermissionDenied {
            scope: "email:send".into(),
        });
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["kind"], "precondition");
        assert_eq!(v["detail"]["kind"], "permission_denied");
        assert_eq!(v["detail"]["scope"], "email:send");
    }
}
