//! The three LLM stages plus planning.
//!
//! Stages are thin async wrappers over [`crate::llm::LlmClient`]: they build
//! prompts from read-only state, decode schema-constrained output, and
//! return typed results. They never mutate `NarrativeState`.

pub mod editor;
pub mod planner;
pub mod validator;
pub mod writer;

pub use editor::{EditorReview, EditorStage};
pub use planner::{ActPlan, Constitution, PlannerStage};
pub use validator::{ActValidation, BookValidation, ValidatorStage};
pub use writer::{DraftScene, WriterOutcome, WriterStage};
