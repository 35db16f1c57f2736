//! Engine tunables.

use flowpilot_kernel::DEFAULT_FINISHED_RETENTION;
use serde::{Deserialize, Serialize};

use crate::registry::WORKFLOW_JOB_TYPE;
use crate::suggestion::MAX_SUGGESTIONS;
use crate::trigger::DEFAULT_POLL_INTERVAL;
use crate::workflow::WorkflowPreferences;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Queue job type for workflow executions.
    pub job_type: String,
    /// Polling interval for context-polling triggers that do not set one.
    pub default_poll_interval_secs: u64,
    /// Suggestions kept after ranking.
    pub suggestion_limit: usize,
    /// Capacity of the event bus broadcast channel.
    pub event_bus_capacity: usize,
    /// Finished queue jobs kept queryable.
    pub job_retention: usize,
    /// Approval policy for owners without stored preferences.
    pub preferences: WorkflowPreferences,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_type: WORKFLOW_JOB_TYPE.to_string(),
            default_poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            suggestion_limit: MAX_SUGGESTIONS,
            event_bus_capacity: 1024,
            job_retention: DEFAULT_FINISHED_RETENTION,
            preferences: WorkflowPreferences::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            suggestion_limit = 3

            [preferences]
            auto_approve = true
            "#,
        )
        .unwrap();
        assert_eq!(config.suggestion_limit, 3);
        assert_eq!(config.job_type, "workflow.execute");
        assert_eq!(config.job_retention, 256);
        assert!(config.preferences.auto_approve);
        assert_eq!(config.preferences.max_auto_actions, 3);
    }
}
