//! `StatePatch` — the only way `NarrativeState` mutates.
//!
//! Patches are partial deltas emitted by the editor and applied by the
//! orchestrator. Application is order-stable: the stamping context (scene
//! id, chapter) is captured before any field changes, so records carried in
//! the same patch as `words_added` are stamped with the pre-update chapter.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::character::{CharacterState, EpistemicRole};
use super::constraints::{CostUpdate, InterpretationUpdate, ModelId, ModelStatus, RefusalUpdate};
use super::NarrativeState;

/// Threshold above which a progression move counts as meaningful.
pub const MEANINGFUL_PROGRESSION_SHIFT: f64 = 0.05;
/// Tolerated relative disagreement between a patch's word count and the
/// recomputed count of the accepted text.
const WORDS_TOLERANCE: f64 = 0.05;

/// Absolute progression targets; unset dials are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressionTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mystery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarity_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_intensity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative_velocity: Option<f64>,
}

/// Replace the first question matching `from` with `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuestionReframe {
    pub from: String,
    pub to: String,
}

/// Open-question mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuestionPatch {
    #[serde(default)]
    pub add: Vec<String>,
    /// A question is resolved when its lowercased text contains the entry.
    #[serde(default)]
    pub resolve: Vec<String>,
    #[serde(default)]
    pub reframe: Vec<QuestionReframe>,
}

impl QuestionPatch {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.resolve.is_empty() && self.reframe.is_empty()
    }
}

/// Per-character deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CharacterDelta {
    #[serde(default)]
    pub certainty_delta: f64,
    #[serde(default)]
    pub transformation_delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_added: Option<String>,
    /// Only the false → true transition is honored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irreversible_loss: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epistemic_role: Option<EpistemicRole>,
}

/// A partial description of state deltas for one accepted scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatePatch {
    /// Words the accepted text adds. Recomputed when it disagrees with the
    /// actual count by more than 5%.
    #[serde(default)]
    pub words_added: u64,
    #[serde(default)]
    pub progression: ProgressionTargets,
    /// Escalation-budget units this scene consumed.
    #[serde(default)]
    pub escalation_spent: u32,
    #[serde(default)]
    pub questions: QuestionPatch,
    #[serde(default)]
    pub characters: BTreeMap<String, CharacterDelta>,
    #[serde(default)]
    pub motifs_added: Vec<String>,
    /// Raise or lower a motif's reinforcement limit.
    #[serde(default)]
    pub motif_limits: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_incurred: Option<CostUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality_refusal: Option<RefusalUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation_update: Option<InterpretationUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_summary: Option<String>,
}

/// Stamping context captured before application begins.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyContext {
    pub scene_id: String,
    /// Global chapter index observed at the start of application.
    pub chapter: u32,
    /// Recomputed word count of the accepted (post-edit) text.
    pub accepted_word_count: u64,
}

/// What a patch actually changed, for the meaningful-mutation check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MutationSummary {
    pub words_delta: u64,
    pub questions_changed: bool,
    /// A character transformed, gained a cost, or became irreversible-loss.
    pub characters_changed: bool,
    /// Largest absolute progression move.
    pub progression_shift: f64,
}

impl MutationSummary {
    /// Whether the scene moved the story in at least one required way.
    pub fn is_meaningful(&self) -> bool {
        self.questions_changed
            || self.characters_changed
            || self.progression_shift > MEANINGFUL_PROGRESSION_SHIFT
    }
}

/// Invariant violations during patch application. These are engine bugs or
/// malformed editor output; the orchestrator surfaces them as REGENERATE.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("interpretation update references unknown model {0}")]
    UnknownModel(ModelId),
    #[error(
        "update would leave {active} active models before convergence chapter {allowed_after}"
    )]
    InterpretationCollapse { active: usize, allowed_after: u32 },
    #[error("convergence declared in chapter {chapter}, allowed after {allowed_after}")]
    ConvergenceTooEarly { chapter: u32, allowed_after: u32 },
}

impl NarrativeState {
    /// Apply a patch. The context is captured by the caller before the call;
    /// nothing in the patch can shift what the records are stamped with.
    ///
    /// On error the state may be partially updated — callers apply patches
    /// to a scratch clone and swap on success.
    pub fn apply_patch(
        &mut self,
        patch: &StatePatch,
        ctx: &ApplyContext,
    ) -> Result<MutationSummary, PatchError> {
        let mut summary = MutationSummary::default();

        // Words: trust the recomputed count when the patch disagrees.
        let actual = ctx.accepted_word_count;
        let claimed = patch.words_added;
        let words = if actual == 0 {
            claimed
        } else if claimed == 0 {
            actual
        } else {
            let drift = (claimed as f64 - actual as f64).abs() / actual as f64;
            if drift > WORDS_TOLERANCE {
                debug!(claimed, actual, "patch word count disagrees; using actual");
                actual
            } else {
                claimed
            }
        };
        self.structure.words_written += words;
        self.act_state.act_words_written += words;
        summary.words_delta = words;

        // Progression: absolute targets, clamped.
        let before = self.progression;
        if let Some(v) = patch.progression.mystery_level {
            self.progression.mystery_level = v;
        }
        if let Some(v) = patch.progression.clarity_level {
            self.progression.clarity_level = v;
        }
        if let Some(v) = patch.progression.emotional_intensity {
            self.progression.emotional_intensity = v;
        }
        if let Some(v) = patch.progression.narrative_velocity {
            self.progression.narrative_velocity = v;
        }
        self.progression.clamp_all();
        summary.progression_shift = [
            (self.progression.mystery_level - before.mystery_level).abs(),
            (self.progression.clarity_level - before.clarity_level).abs(),
            (self.progression.emotional_intensity - before.emotional_intensity).abs(),
            (self.progression.narrative_velocity - before.narrative_velocity).abs(),
        ]
        .into_iter()
        .fold(0.0, f64::max);

        self.escalation_budget.spend(patch.escalation_spent, &ctx.scene_id);

        summary.questions_changed = self.apply_questions(&patch.questions);

        for (name, delta) in &patch.characters {
            let character = self
                .characters
                .entry(name.clone())
                .or_insert_with(|| CharacterState::new(false));
            character.shift_certainty(delta.certainty_delta);
            character.shift_transformation(delta.transformation_delta);
            if delta.transformation_delta != 0.0 {
                summary.characters_changed = true;
            }
            if let Some(cost) = &delta.cost_added {
                character.add_cost(cost.clone());
                summary.characters_changed = true;
            }
            if delta.irreversible_loss == Some(true) && !character.irreversible_loss {
                character.mark_irreversible_loss();
                summary.characters_changed = true;
            }
            if let Some(role) = delta.epistemic_role {
                character.epistemic_role = Some(role);
            }
        }

        for (motif, limit) in &patch.motif_limits {
            if let Some(budget) = self.repetition.motif_budgets.get_mut(motif) {
                budget.reinforcement_limit = *limit;
            }
        }
        for motif in &patch.motifs_added {
            self.repetition.record_motif(motif, ctx.chapter);
        }

        if let Some(cost) = &patch.cost_incurred {
            self.cost_ledger
                .record(cost.stamped(&ctx.scene_id, ctx.chapter));
        }
        if let Some(refusal) = &patch.reality_refusal {
            self.reality_refusals
                .refusals
                .push(refusal.stamped(&ctx.scene_id, ctx.chapter));
        }
        if let Some(update) = &patch.interpretation_update {
            self.apply_interpretation(update, ctx.chapter)?;
        }

        if let Some(summary_text) = &patch.scene_summary {
            self.summaries.previous_scene = summary_text.clone();
        }

        Ok(summary)
    }

    fn apply_questions(&mut self, patch: &QuestionPatch) -> bool {
        let mut changed = false;

        for needle in &patch.resolve {
            let needle = needle.to_lowercase();
            let before = self.act_state.open_questions.len();
            self.act_state
                .open_questions
                .retain(|q| !q.to_lowercase().contains(&needle));
            changed |= self.act_state.open_questions.len() != before;
        }

        for reframe in &patch.reframe {
            let needle = reframe.from.to_lowercase();
            if let Some(q) = self
                .act_state
                .open_questions
                .iter_mut()
                .find(|q| q.to_lowercase().contains(&needle))
            {
                *q = reframe.to.clone();
                changed = true;
            }
        }

        for question in &patch.add {
            if !self.act_state.open_questions.contains(question) {
                self.act_state.open_questions.push(question.clone());
                changed = true;
            }
        }

        changed
    }

    fn apply_interpretation(
        &mut self,
        update: &InterpretationUpdate,
        chapter: u32,
    ) -> Result<(), PatchError> {
        let allowed_after = self.interpretation.convergence_allowed_after;
        let before_convergence = chapter < allowed_after;

        if update.mark_converged == Some(true) && before_convergence {
            return Err(PatchError::ConvergenceTooEarly {
                chapter,
                allowed_after,
            });
        }

        // Guard the two-active-models invariant before committing a
        // status change.
        if let Some(new_status) = update.status {
            let prospective = self
                .interpretation
                .models
                .iter()
                .filter(|m| {
                    let status = if m.id == update.id { new_status } else { m.status };
                    status == ModelStatus::Active
                })
                .count();
            if before_convergence && prospective < 2 {
                return Err(PatchError::InterpretationCollapse {
                    active: prospective,
                    allowed_after,
                });
            }
        }

        let model = self
            .interpretation
            .model_mut(update.id)
            .ok_or(PatchError::UnknownModel(update.id))?;
        if let Some(status) = update.status {
            model.status = status;
        }
        if let Some(v) = update.wins_socially {
            model.wins_socially = v;
        }
        if let Some(v) = update.wins_empirically {
            model.wins_empirically = v;
        }
        if let Some(v) = update.feels_emotionally_true {
            model.feels_emotionally_true = v;
        }
        if update.mark_converged == Some(true) {
            self.interpretation.has_converged = true;
        }
        Ok(())
    }
}
