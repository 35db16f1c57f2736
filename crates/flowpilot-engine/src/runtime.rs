//! Assembly of the engine components into one running process.

use std::sync::Arc;

use flowpilot_agent::TextGenerator;
use flowpilot_kernel::{EventBus, IntegrationRegistry, JobQueue};
use flowpilot_store::Stores;
use tokio::task::JoinHandle;
use tracing::info;

use crate::action::ActionExecutor;
use crate::action::handlers::{HandlerDeps, register_builtin};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::job::WorkflowJobHandler;
use crate::notifier::Notifier;
use crate::registry::TriggerRegistry;
use crate::workflow::{EngineDeps, WorkflowEngine};

/// Every engine component, wired together.
///
/// Fields are cheap handles; clone what you need.
#[derive(Clone)]
pub struct Runtime {
    pub stores: Stores,
    pub bus: EventBus,
    pub queue: JobQueue,
    pub integrations: IntegrationRegistry,
    pub triggers: TriggerRegistry,
    pub executor: ActionExecutor,
    pub engine: WorkflowEngine,
}

impl Runtime {
    pub fn new(stores: Stores, generator: Arc<dyn TextGenerator>, config: &EngineConfig) -> Self {
        let bus = EventBus::new(config.event_bus_capacity);
        let queue = JobQueue::with_retention(config.job_retention);
        let integrations = IntegrationRegistry::new();
        let triggers = TriggerRegistry::with_job_type(stores.clone(), bus.clone(), queue.clone(), config.job_type.clone());

        let executor = ActionExecutor::new(stores.accounts.clone(), integrations.clone());
        register_builtin(
            &executor,
            HandlerDeps {
                stores: stores.clone(),
                bus: bus.clone(),
                queue: queue.clone(),
                triggers: triggers.clone(),
                generator: Arc::clone(&generator),
                notifier: Notifier::new(stores.activity.clone(), bus.clone()),
            },
        );

        let engine = WorkflowEngine::new(
            EngineDeps {
                stores: stores.clone(),
                bus: bus.clone(),
                triggers: triggers.clone(),
                integrations: integrations.clone(),
                executor: executor.clone(),
                generator,
            },
            config,
        );
        queue.register_handler(config.job_type.clone(), Arc::new(WorkflowJobHandler::new(engine.clone())));

        Self {
            stores,
            bus,
            queue,
            integrations,
            triggers,
            executor,
            engine,
        }
    }

    /// Load integration state, start the queue worker and re-activate every
    /// enabled trigger.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let integrations = self.engine.load_integrations().await?;
        let worker = self.queue.start()?;
        let triggers = self.triggers.reload_active().await?;
        info!(integrations, triggers, "runtime started");
        Ok(worker)
    }

    /// Tear down detections and stop the worker.
    pub fn shutdown(&self) {
        self.triggers.shutdown();
        self.queue.shutdown();
        info!(live_executions = self.engine.live_executions().len(), "runtime stopped");
    }
}
