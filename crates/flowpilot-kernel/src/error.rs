//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

use uuid::Uuid;

/// Unified error type for the flowpilot kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Queue errors -------------------------------------------------------
    /// The referenced job does not exist in the queue.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The [`Uuid`] that was looked up.
        job_id: Uuid,
    },

    /// The job is no longer in a state that allows the requested operation.
    #[error("invalid job state transition for {job_id}: {reason}")]
    InvalidJobState { job_id: Uuid, reason: String },

    /// The queue has been shut down and will not accept new work.
    #[error("job queue is shut down")]
    QueueShutdown,

    /// The worker loop is already running.
    #[error("job queue worker already started")]
    WorkerAlreadyStarted,

    // -- Event bus errors ---------------------------------------------------
    /// An event topic name was empty or otherwise malformed.
    #[error("invalid event topic `{topic}`")]
    InvalidTopic { topic: String },

    // -- Integration registry errors ----------------------------------------
    /// The integration is not known for the given owner.
    #[error("integration `{provider}` not registered for owner {owner_id}")]
    IntegrationNotFound { owner_id: String, provider: String },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
