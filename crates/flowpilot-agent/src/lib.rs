//! Text-generation backend for flowpilot.
//!
//! Workflow analysis asks a language model for extra insights and
//! suggestions.  This crate provides the HTTP client for that and the
//! [`TextGenerator`] trait the engine depends on, so the engine can run
//! without a model (see [`DisabledGenerator`]) or against a scripted one in
//! tests.
//!
//! ## Modules
//!
//! - [`llm`] -- LLM client and wire types.
//! - [`generator`] -- The [`TextGenerator`] seam.
//! - [`error`] -- Agent error types.

pub mod error;
pub mod generator;
pub mod llm;

pub use error::{AgentError, Result};
pub use generator::{DisabledGenerator, TextGenerator, strip_code_fences};
pub use llm::{ChatRequest, LlmClient, LlmClientConfig, LlmProvider, LlmResponse, Message, Role};
