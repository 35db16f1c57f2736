//! Queue consumer for workflow executions.

use async_trait::async_trait;
use flowpilot_kernel::{JobHandler, JobId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::workflow::{ExecutionRequest, WorkflowEngine};

/// Drives one execution per `workflow.execute` job.
pub struct WorkflowJobHandler {
    engine: WorkflowEngine,
}

impl WorkflowJobHandler {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for WorkflowJobHandler {
    async fn handle(&self, job_id: JobId, payload: Value) -> Result<(), String> {
        let request: ExecutionRequest =
            serde_json::from_value(payload).map_err(|e| format!("malformed workflow job payload: {e}"))?;
        match self.engine.run(request).await {
            Ok(execution) => {
                debug!(%job_id, execution_id = %execution.id, status = %execution.status, "workflow job done");
                Ok(())
            }
            Err(e) => {
                warn!(%job_id, error = %e, "workflow job failed");
                Err(e.to_string())
            }
        }
    }
}
