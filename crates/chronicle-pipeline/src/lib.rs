//! Chronicle pipeline — LLM stages and the tick-driven job loop.
//!
//! This crate drives the deterministic `chronicle-engine` core through a
//! book job:
//!
//! - [`llm`] — the two-operation LLM collaborator contract, an
//!   OpenAI-compatible client, and a deterministic mock
//! - [`prompts`] — prompt builders over state + summaries (never prose)
//! - [`stages`] — planner, writer, editor, validator
//! - [`orchestrator`] — the step-tagged state machine, one atomic unit of
//!   work per tick, budgets, snapshots, and the decision log
//! - [`config`] / [`telemetry`] — endpoint config and tracing setup

pub mod config;
pub mod llm;
pub mod openai;
pub mod orchestrator;
pub mod prompts;
pub mod stages;
pub mod telemetry;

pub use config::{LlmEndpoint, PipelineConfig};
pub use llm::{LlmClient, LlmError, MockLlm};
pub use openai::OpenAiClient;
pub use orchestrator::{
    CancelFlag, FailureKind, JobFailure, JobStatus, JobStep, Orchestrator, TickOutcome,
};
