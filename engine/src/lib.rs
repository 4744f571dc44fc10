//! Chronicle engine — the deterministic core of a long-form narrative
//! generation pipeline.
//!
//! This crate owns everything that must behave identically on every run:
//!
//! - The canonical [`state::NarrativeState`] and its invariants
//! - [`state::patch`] — the only mutation path, with stamping semantics
//! - [`fingerprint`] and [`redundancy`] — token-set similarity and the
//!   deterministic gates that reject redundant scenes before any LLM call
//! - [`state::motif`] — motif budgets, saturation, and the final recurrence
//! - [`checks`] — quick structural checks at mid-book, act-end, book-end
//! - [`budgets`] — scene / act-tail / final-tail regeneration caps
//! - [`manuscript`] and [`snapshot`] — accepted text and restore points
//!
//! The LLM-facing stages and the tick-driven orchestrator live in the
//! `chronicle-pipeline` crate; they consume this crate through read-only
//! views and patches.

pub mod budgets;
pub mod checks;
pub mod decision;
pub mod fingerprint;
pub mod manuscript;
pub mod redundancy;
pub mod snapshot;
pub mod state;
pub mod text;

pub use budgets::{
    RegenerationBudgets, MAX_ACT_TAIL_REGENERATIONS, MAX_FINAL_TAIL_REGENERATIONS,
    MAX_SCENE_REGENERATIONS,
};
pub use checks::{quick_check, CheckPoint, IssueCode, Severity, StructuralIssue, StructuralReport};
pub use decision::{DecisionRecord, EditorVerdict, SceneDecision};
pub use fingerprint::{NarrativeFunction, SceneFingerprint};
pub use manuscript::{Manuscript, ManuscriptError, SceneRecord};
pub use redundancy::{check_redundancy, overused_motifs, RedundancyRule, RedundancyVerdict};
pub use snapshot::{JobSnapshot, SnapshotLog};
pub use state::patch::{ApplyContext, MutationSummary, PatchError, StatePatch};
pub use state::{BookRequest, NarrativeState, RequestError};
