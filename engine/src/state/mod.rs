//! `NarrativeState` — the single source of truth for a book job.
//!
//! The state is constructed deterministically from the job input, mutated
//! only through patch application (see [`patch`]), and carried whole inside
//! every snapshot. Stages receive read-only views; the orchestrator owns
//! the one mutable copy per tick.

pub mod character;
pub mod constraints;
pub mod motif;
pub mod patch;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use character::CharacterState;
use constraints::{CostLedger, EndingAnchor, InterpretationCompetition, RealityRefusals};
use motif::RepetitionRegistry;

/// Minimum accepted book length.
pub const MIN_TARGET_WORDS: u32 = 10_000;
/// Maximum accepted book length.
pub const MAX_TARGET_WORDS: u32 = 150_000;
/// Books at or under this target get three acts; longer books get five.
pub const THREE_ACT_CEILING: u32 = 35_000;
/// Words a single scene slot is planned to contribute.
pub const SCENE_SLOT_WORDS: u32 = 1_400;
/// Scene slots per chapter.
pub const SCENES_PER_CHAPTER: u32 = 3;

/// The input that seeds a job. Everything else is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRequest {
    pub prompt: String,
    pub genre: String,
    pub target_length_words: u32,
    pub theme_thesis: String,
    pub protagonist_name: String,
}

/// Rejections of a malformed book request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("target length {0} outside [{MIN_TARGET_WORDS}, {MAX_TARGET_WORDS}]")]
    TargetOutOfRange(u32),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl BookRequest {
    /// Validate field presence and the target-length band.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.prompt.trim().is_empty() {
            return Err(RequestError::MissingField("prompt"));
        }
        if self.protagonist_name.trim().is_empty() {
            return Err(RequestError::MissingField("protagonist_name"));
        }
        if self.theme_thesis.trim().is_empty() {
            return Err(RequestError::MissingField("theme_thesis"));
        }
        if !(MIN_TARGET_WORDS..=MAX_TARGET_WORDS).contains(&self.target_length_words) {
            return Err(RequestError::TargetOutOfRange(self.target_length_words));
        }
        Ok(())
    }
}

/// Planning geometry fixed at job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleGeometry {
    pub acts_total: u32,
    pub chapters_planned: u32,
    pub chapters_per_act: u32,
    pub scenes_per_chapter: u32,
    /// Total scene slots; drives the progress schedule.
    pub total_sections: u32,
}

impl ScheduleGeometry {
    /// Derive the geometry for a target length.
    pub fn for_target(target_words: u32) -> Self {
        let acts_total = if target_words <= THREE_ACT_CEILING { 3 } else { 5 };
        let total_sections = target_words.div_ceil(SCENE_SLOT_WORDS).max(1);
        let chapters_planned = total_sections.div_ceil(SCENES_PER_CHAPTER).max(1);
        let chapters_per_act = chapters_planned.div_ceil(acts_total).max(1);
        Self {
            acts_total,
            chapters_planned,
            chapters_per_act,
            scenes_per_chapter: SCENES_PER_CHAPTER,
            total_sections,
        }
    }
}

/// Where writing currently stands. Indices are 1-based; `chapter_in_act`
/// and `scene_in_chapter` name the slot being written next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructurePosition {
    pub act_index: u32,
    pub chapter_in_act: u32,
    pub scene_in_chapter: u32,
    pub words_written: u64,
}

/// What advancing past an accepted scene did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    SameChapter,
    NewChapter,
    /// The act has no chapters left; the orchestrator must close it.
    ActExhausted,
}

/// The four reader-experience dials, each clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progression {
    pub mystery_level: f64,
    pub clarity_level: f64,
    pub emotional_intensity: f64,
    pub narrative_velocity: f64,
}

impl Default for Progression {
    fn default() -> Self {
        Self {
            mystery_level: 0.4,
            clarity_level: 0.1,
            emotional_intensity: 0.2,
            narrative_velocity: 0.5,
        }
    }
}

impl Progression {
    /// Clamp every dial into [0, 1].
    pub fn clamp_all(&mut self) {
        self.mystery_level = self.mystery_level.clamp(0.0, 1.0);
        self.clarity_level = self.clarity_level.clamp(0.0, 1.0);
        self.emotional_intensity = self.emotional_intensity.clamp(0.0, 1.0);
        self.narrative_velocity = self.narrative_velocity.clamp(0.0, 1.0);
    }
}

/// Hard cap on upward stakes ratchets across the book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationBudget {
    pub remaining: u32,
    /// Scene that last consumed a unit.
    pub last_consumed_by: Option<String>,
}

impl EscalationBudget {
    /// Initial allowance for a target length.
    pub fn for_target(target_words: u32) -> Self {
        let proportional = (f64::from(target_words) / 2_500.0).round() as u32;
        Self {
            remaining: proportional.max(8),
            last_consumed_by: None,
        }
    }

    /// Spend units, saturating at zero.
    pub fn spend(&mut self, units: u32, scene_id: &str) {
        if units == 0 {
            return;
        }
        self.remaining = self.remaining.saturating_sub(units);
        self.last_consumed_by = Some(scene_id.to_string());
    }
}

/// Attempt to open an act past the final one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no acts remaining past act {0}")]
pub struct ActOverflow(pub u32);

/// The standing plan for one act, fixed at the plan step. Keeping the full
/// plan inside the state keeps snapshots self-contained across restores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannedAct {
    pub goal: String,
    pub open_questions: Vec<String>,
    pub close_conditions: Vec<String>,
}

/// The act currently being written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActState {
    pub act_index: u32,
    pub goal: String,
    pub open_questions: Vec<String>,
    pub close_conditions: Vec<String>,
    pub target_words: u64,
    pub act_words_written: u64,
}

/// The three rolling summaries that stand in for the manuscript in every
/// LLM prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summaries {
    pub book_so_far: String,
    pub current_act: String,
    pub previous_scene: String,
}

/// The canonical state of a book job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeState {
    pub request: BookRequest,
    pub geometry: ScheduleGeometry,
    pub structure: StructurePosition,
    pub progression: Progression,
    pub escalation_budget: EscalationBudget,
    pub characters: BTreeMap<String, CharacterState>,
    pub act_state: ActState,
    /// One entry per act, filled by the plan step.
    pub planned_acts: Vec<PlannedAct>,
    pub cost_ledger: CostLedger,
    pub interpretation: InterpretationCompetition,
    pub reality_refusals: RealityRefusals,
    pub ending_anchor: Option<EndingAnchor>,
    pub repetition: RepetitionRegistry,
    pub summaries: Summaries,
}

impl NarrativeState {
    /// Deterministic initial state for a validated request.
    pub fn initial(request: &BookRequest) -> Result<Self, RequestError> {
        request.validate()?;
        let geometry = ScheduleGeometry::for_target(request.target_length_words);

        let mut characters = BTreeMap::new();
        characters.insert(request.protagonist_name.clone(), CharacterState::new(true));

        let chapters = f64::from(geometry.chapters_planned);
        let injection_points = vec![
            ((chapters * 0.4).round() as u32).max(1),
            ((chapters * 0.75).round() as u32).max(1),
        ];
        let convergence_allowed_after = ((chapters * 0.7).round() as u32).max(2);

        Ok(Self {
            request: request.clone(),
            geometry,
            structure: StructurePosition {
                act_index: 1,
                chapter_in_act: 1,
                scene_in_chapter: 1,
                words_written: 0,
            },
            progression: Progression::default(),
            escalation_budget: EscalationBudget::for_target(request.target_length_words),
            characters,
            act_state: ActState {
                act_index: 1,
                target_words: u64::from(request.target_length_words)
                    / u64::from(geometry.acts_total),
                ..ActState::default()
            },
            planned_acts: Vec::new(),
            cost_ledger: CostLedger::default(),
            interpretation: InterpretationCompetition {
                convergence_allowed_after,
                ..InterpretationCompetition::default()
            },
            reality_refusals: RealityRefusals {
                required_count: 1,
                injection_points,
                ..RealityRefusals::default()
            },
            ending_anchor: None,
            repetition: RepetitionRegistry::default(),
            summaries: Summaries::default(),
        })
    }

    /// Global chapter index of the slot currently being written (1-based).
    pub fn current_chapter(&self) -> u32 {
        (self.structure.act_index - 1) * self.geometry.chapters_per_act
            + self.structure.chapter_in_act
    }

    /// Scene id of the slot currently being written.
    pub fn current_scene_id(&self) -> String {
        format!(
            "ch{}_s{}",
            self.current_chapter(),
            self.structure.scene_in_chapter
        )
    }

    /// The protagonist's tracked state, if present.
    pub fn protagonist(&self) -> Option<&CharacterState> {
        self.characters.get(&self.request.protagonist_name)
    }

    /// Advance the position past an accepted scene.
    pub fn advance_scene(&mut self) -> AdvanceOutcome {
        if self.structure.scene_in_chapter < self.geometry.scenes_per_chapter {
            self.structure.scene_in_chapter += 1;
            return AdvanceOutcome::SameChapter;
        }
        self.structure.scene_in_chapter = 1;
        if self.structure.chapter_in_act < self.geometry.chapters_per_act {
            self.structure.chapter_in_act += 1;
            return AdvanceOutcome::NewChapter;
        }
        AdvanceOutcome::ActExhausted
    }

    /// Open the next act with its plan. Fails past the final act.
    pub fn open_act(
        &mut self,
        goal: &str,
        open_questions: Vec<String>,
        close_conditions: Vec<String>,
    ) -> Result<(), ActOverflow> {
        let next = self.act_state.act_index + 1;
        if next > self.geometry.acts_total {
            return Err(ActOverflow(self.act_state.act_index));
        }
        self.structure.act_index = next;
        self.structure.chapter_in_act = 1;
        self.structure.scene_in_chapter = 1;
        self.act_state = ActState {
            act_index: next,
            goal: goal.to_string(),
            open_questions,
            close_conditions,
            target_words: u64::from(self.request.target_length_words)
                / u64::from(self.geometry.acts_total),
            act_words_written: 0,
        };
        self.summaries.current_act.clear();
        Ok(())
    }
}
