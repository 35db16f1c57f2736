//! Flowpilot kernel.
//!
//! Process-wide primitives shared by every other flowpilot crate:
//!
//! - **[`ipc`]** -- Named-topic publish/subscribe event bus backed by
//!   [`tokio::sync::broadcast`], with disposable listener handles.
//! - **[`queue`]** -- Asynchronous job queue built on
//!   [`crossbeam::queue::SegQueue`] with a tokio-driven worker that
//!   dispatches each job to the handler registered for its type.
//! - **[`registry`]** -- Concurrent integration registry using [`DashMap`]
//!   tracking which providers are connected for which owners.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.
//!
//! [`DashMap`]: dashmap::DashMap

pub mod error;
pub mod ipc;
pub mod queue;
pub mod registry;

// Re-export the most commonly used types at the crate root for convenience.
pub use error::{KernelError, Result};
pub use ipc::{BusEvent, EventBus, SubscriptionHandle, topics};
pub use queue::{DEFAULT_FINISHED_RETENTION, JobHandler, JobId, JobInfo, JobQueue, JobStatus};
pub use registry::{IntegrationInfo, IntegrationRegistry, IntegrationStatus};
