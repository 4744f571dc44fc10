//! The tick-driven orchestrator.
//!
//! A job advances through tagged steps, one atomic unit of work per tick:
//! constitution, plan, one scene, one validation, or finalize. The
//! orchestrator owns the one mutable `NarrativeState`, applies editor
//! patches to a scratch clone, and swaps on success — no partial state is
//! ever observable across ticks. Regeneration budgets, the decision log,
//! and snapshot emission live here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use chronicle_engine::state::patch::{ApplyContext, StatePatch};
use chronicle_engine::state::{NarrativeState, PlannedAct};
use chronicle_engine::text::{truncate_words, word_count};
use chronicle_engine::{
    quick_check, BookRequest, CheckPoint, DecisionRecord, JobSnapshot, Manuscript,
    NarrativeFunction, RegenerationBudgets, RequestError, SceneDecision, SceneFingerprint,
    SceneRecord, SnapshotLog, MAX_SCENE_REGENERATIONS,
};

use crate::config::PipelineConfig;
use crate::llm::{LlmClient, LlmError, TextRequest};
use crate::prompts;
use crate::stages::editor::EditorReview;
use crate::stages::validator::{ActRegenerationScope, ActValidation, BookRegenerationScope, BookValidation};
use crate::stages::writer::DraftScene;
use crate::stages::{EditorStage, PlannerStage, ValidatorStage, WriterOutcome, WriterStage};

/// Fraction of act words truncated for a `last_15_percent` regeneration.
const ACT_TAIL_FRACTION: f64 = 0.15;
/// Fraction of final-act words truncated for a `final_act_tail`
/// regeneration.
const FINAL_TAIL_FRACTION: f64 = 0.20;
/// Words the forced-acceptance trim targets.
const FORCED_ACCEPT_WORDS: usize = 900;
/// Rolling cap on the book-so-far summary.
const BOOK_SUMMARY_CAP: usize = 4_000;
/// Rolling cap on the current-act summary.
const ACT_SUMMARY_CAP: usize = 2_000;

/// The tagged steps a job moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStep {
    Created,
    Constitution,
    Plan,
    /// Writing the scene at (global chapter, scene-in-chapter).
    WriteScene { chapter: u32, scene: u32 },
    ValidateAct { act: u32 },
    Finalize,
    Complete,
}

/// A step tag that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown step tag: {0}")]
pub struct UnknownStep(pub String);

impl JobStep {
    /// Persistent string tag, e.g. `write_ch3_s2`.
    pub fn tag(&self) -> String {
        match self {
            Self::Created => "created".to_string(),
            Self::Constitution => "constitution".to_string(),
            Self::Plan => "plan".to_string(),
            Self::WriteScene { chapter, scene } => format!("write_ch{chapter}_s{scene}"),
            Self::ValidateAct { act } => format!("validate_act{act}"),
            Self::Finalize => "finalize".to_string(),
            Self::Complete => "complete".to_string(),
        }
    }

    /// Parse a persisted tag.
    pub fn parse(tag: &str) -> Result<Self, UnknownStep> {
        match tag {
            "created" => return Ok(Self::Created),
            "constitution" => return Ok(Self::Constitution),
            "plan" => return Ok(Self::Plan),
            "finalize" => return Ok(Self::Finalize),
            "complete" => return Ok(Self::Complete),
            _ => {}
        }
        if let Some(rest) = tag.strip_prefix("write_ch") {
            if let Some((chapter, scene)) = rest.split_once("_s") {
                if let (Ok(chapter), Ok(scene)) = (chapter.parse(), scene.parse()) {
                    return Ok(Self::WriteScene { chapter, scene });
                }
            }
        }
        if let Some(act) = tag.strip_prefix("validate_act") {
            if let Ok(act) = act.parse() {
                return Ok(Self::ValidateAct { act });
            }
        }
        Err(UnknownStep(tag.to_string()))
    }
}

/// User-visible job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Failed,
    Complete,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Structural validation budget exhausted.
    Validation,
    /// Step tag did not parse on resume.
    UnknownStep,
    Cancelled,
}

/// Failure details attached to a failed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub error: String,
    /// Last good step tag.
    pub last_step: String,
    /// Outstanding structural issues, when validation failed.
    pub issues: Vec<String>,
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub status: JobStatus,
    pub step: String,
    pub progress: u8,
    pub message: String,
}

/// Cooperative cancellation handle; checked between stages.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The per-job scheduler.
pub struct Orchestrator {
    job_id: Uuid,
    state: NarrativeState,
    manuscript: Manuscript,
    snapshots: SnapshotLog,
    budgets: RegenerationBudgets,
    decisions: Vec<DecisionRecord>,
    step: JobStep,
    status: JobStatus,
    failure: Option<JobFailure>,
    cancel: CancelFlag,
    /// Regeneration instructions and sizing annotations for the next draft.
    pending_instructions: Vec<String>,
    /// Constraints from the last failed act/book validation.
    tail_constraints: Vec<String>,
    /// Best draft for the current slot, for forced acceptance.
    last_draft: Option<DraftScene>,

    llm: Arc<dyn LlmClient>,
    writer: WriterStage,
    editor: EditorStage,
    validator: ValidatorStage,
    planner: PlannerStage,
}

impl Orchestrator {
    /// Create a queued job from a validated request.
    pub fn new(
        request: &BookRequest,
        llm: Arc<dyn LlmClient>,
        config: &PipelineConfig,
    ) -> Result<Self, RequestError> {
        let state = NarrativeState::initial(request)?;
        Ok(Self::from_parts(
            state,
            Manuscript::default(),
            JobStep::Created,
            JobStatus::Queued,
            None,
            llm,
            config,
        ))
    }

    /// Resume a job from a persisted snapshot and its manuscript. An
    /// unknown step tag yields a job already in the failed state, step
    /// preserved.
    pub fn resume(
        snapshot: JobSnapshot,
        manuscript: Manuscript,
        llm: Arc<dyn LlmClient>,
        config: &PipelineConfig,
    ) -> Self {
        match JobStep::parse(&snapshot.step) {
            Ok(step) => Self::from_parts(
                snapshot.state,
                manuscript,
                step,
                JobStatus::Running,
                None,
                llm,
                config,
            ),
            Err(unknown) => {
                let failure = JobFailure {
                    kind: FailureKind::UnknownStep,
                    error: unknown.to_string(),
                    last_step: snapshot.step.clone(),
                    issues: Vec::new(),
                };
                Self::from_parts(
                    snapshot.state,
                    manuscript,
                    JobStep::Created,
                    JobStatus::Failed,
                    Some(failure),
                    llm,
                    config,
                )
            }
        }
    }

    fn from_parts(
        state: NarrativeState,
        manuscript: Manuscript,
        step: JobStep,
        status: JobStatus,
        failure: Option<JobFailure>,
        llm: Arc<dyn LlmClient>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            state,
            manuscript,
            snapshots: SnapshotLog::default(),
            budgets: RegenerationBudgets::default(),
            decisions: Vec::new(),
            step,
            status,
            failure,
            cancel: CancelFlag::default(),
            pending_instructions: Vec::new(),
            tail_constraints: Vec::new(),
            last_draft: None,
            llm: llm.clone(),
            writer: WriterStage::new(
                llm.clone(),
                config.writer_temperature,
                config.max_scene_tokens,
            ),
            editor: EditorStage::new(
                llm.clone(),
                config.editor_temperature,
                config.max_json_tokens,
            ),
            validator: ValidatorStage::new(
                llm.clone(),
                config.editor_temperature,
                config.max_json_tokens,
            ),
            planner: PlannerStage::new(llm, config.editor_temperature, config.max_json_tokens),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    pub fn state(&self) -> &NarrativeState {
        &self.state
    }

    pub fn manuscript(&self) -> &Manuscript {
        &self.manuscript
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    pub fn budgets(&self) -> RegenerationBudgets {
        self.budgets
    }

    pub fn latest_snapshot(&self) -> Option<&JobSnapshot> {
        self.snapshots.latest()
    }

    /// Handle for cooperative cancellation.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Execute one atomic unit of work.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.status == JobStatus::Failed {
            return self.finish_tick("job already failed".to_string());
        }
        if self.status == JobStatus::Complete || self.step == JobStep::Complete {
            self.status = JobStatus::Complete;
            return self.finish_tick("book complete".to_string());
        }
        if self.check_cancelled() {
            return self.finish_tick("job cancelled".to_string());
        }
        self.status = JobStatus::Running;

        let message = match self.step {
            JobStep::Created => {
                self.step = JobStep::Constitution;
                "job initialized".to_string()
            }
            JobStep::Constitution => self.run_constitution().await,
            JobStep::Plan => self.run_plan().await,
            JobStep::WriteScene { .. } => self.run_scene().await,
            JobStep::ValidateAct { act } => self.run_act_validation(act).await,
            JobStep::Finalize => self.run_finalize().await,
            JobStep::Complete => unreachable!("handled above"),
        };

        self.finish_tick(message)
    }

    fn finish_tick(&mut self, message: String) -> TickOutcome {
        let step = self.step.tag();
        let progress = self.progress();
        self.snapshots
            .record(JobSnapshot::new(self.state.clone(), &step, progress, &message));
        TickOutcome {
            status: self.status,
            step,
            progress,
            message,
        }
    }

    /// Progress schedule: constitution 5, plan 10, writing 20→90 linear in
    /// sections, finalize 95, complete 100.
    fn progress(&self) -> u8 {
        match self.step {
            JobStep::Created => 0,
            JobStep::Constitution => 5,
            JobStep::Plan => 10,
            JobStep::WriteScene { .. } | JobStep::ValidateAct { .. } => {
                let total = self.state.geometry.total_sections.max(1) as u64;
                let done = (self.manuscript.scenes.len() as u64).min(total);
                (20 + (70 * done / total) as u8).min(90)
            }
            JobStep::Finalize => 95,
            JobStep::Complete => 100,
        }
    }

    fn check_cancelled(&mut self) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        let step = self.step.tag();
        warn!(step = %step, "job cancelled");
        self.status = JobStatus::Failed;
        self.failure = Some(JobFailure {
            kind: FailureKind::Cancelled,
            error: format!("cancelled at step {step}"),
            last_step: step,
            issues: Vec::new(),
        });
        true
    }

    fn fail_validation(&mut self, error: String, issues: Vec<String>) -> String {
        let step = self.step.tag();
        error!(step = %step, error = %error, "validation budget exhausted");
        self.status = JobStatus::Failed;
        self.failure = Some(JobFailure {
            kind: FailureKind::Validation,
            error: error.clone(),
            last_step: step,
            issues,
        });
        error
    }

    /// Transport failures leave the step in place; the job resumes from the
    /// same step on the next tick.
    fn resumable(&self, stage: &str, error: &LlmError) -> String {
        warn!(stage, %error, "tick failed; step preserved");
        format!("{stage} failed ({error}); tick is resumable")
    }

    // ---- constitution & plan -------------------------------------------

    async fn run_constitution(&mut self) -> String {
        let constitution = match self.planner.constitution(&self.state).await {
            Ok(c) => c,
            Err(e) => return self.resumable("constitution", &e),
        };

        let mut next = self.state.clone();
        next.interpretation.models_generated = true;
        next.interpretation.models = constitution
            .interpretation_models
            .iter()
            .map(|seed| chronicle_engine::state::constraints::InterpretationModel {
                id: seed.id,
                label: seed.label.clone(),
                description: seed.description.clone(),
                wins_socially: false,
                wins_empirically: false,
                feels_emotionally_true: false,
                status: chronicle_engine::state::constraints::ModelStatus::Active,
            })
            .collect();
        for member in &constitution.cast {
            next.characters.entry(member.name.clone()).or_insert_with(|| {
                chronicle_engine::state::character::CharacterState::new(member.is_primary)
            });
        }
        next.summaries.book_so_far = constitution.opening_summary.clone();
        self.state = next;

        self.step = JobStep::Plan;
        format!("constitution established: {}", constitution.premise)
    }

    async fn run_plan(&mut self) -> String {
        let acts = match self.planner.plan(&self.state).await {
            Ok(a) => a,
            Err(e) => return self.resumable("plan", &e),
        };

        let mut next = self.state.clone();
        next.planned_acts = acts
            .iter()
            .map(|a| PlannedAct {
                goal: a.goal.clone(),
                open_questions: a.open_questions.clone(),
                close_conditions: a.close_conditions.clone(),
            })
            .collect();
        let first = next.planned_acts[0].clone();
        next.act_state.goal = first.goal;
        next.act_state.open_questions = first.open_questions;
        next.act_state.close_conditions = first.close_conditions;
        self.state = next;

        self.step = JobStep::WriteScene {
            chapter: self.state.current_chapter(),
            scene: self.state.structure.scene_in_chapter,
        };
        format!("planned {} acts", self.state.planned_acts.len())
    }

    // ---- the scene loop ------------------------------------------------

    async fn run_scene(&mut self) -> String {
        let scene_id = self.state.current_scene_id();
        let brief = self.build_brief();
        let mut constraints = self.tail_constraints.clone();
        constraints.extend(self.pending_instructions.clone());

        let outcome = match self.writer.draft(&self.state, &brief, &constraints).await {
            Ok(o) => o,
            Err(e @ LlmError::Transport(_)) => return self.resumable("writer", &e),
            Err(LlmError::SchemaFailure(msg)) => {
                return self.scene_regenerate(&scene_id, format!("llm_schema_failure: {msg}"), None)
            }
        };

        let draft = match outcome {
            WriterOutcome::Draft(d) => d,
            WriterOutcome::TooShort { words } => {
                self.pending_instructions.push(format!(
                    "the previous draft ran {words} words; deliver at least 1200"
                ));
                return format!("draft too short ({words} words); re-briefing writer");
            }
        };
        self.last_draft = Some(draft.clone());

        if self.check_cancelled() {
            return "job cancelled".to_string();
        }

        let review = match self.editor.review(&self.state, &scene_id, &draft).await {
            Ok(r) => r,
            Err(e @ LlmError::Transport(_)) => return self.resumable("editor", &e),
            Err(LlmError::SchemaFailure(msg)) => {
                return self.scene_regenerate(&scene_id, format!("llm_schema_failure: {msg}"), None)
            }
        };

        self.handle_review(&scene_id, draft, review)
    }

    fn handle_review(
        &mut self,
        scene_id: &str,
        draft: DraftScene,
        review: EditorReview,
    ) -> String {
        let verdict = review.verdict;
        match verdict.decision {
            SceneDecision::Regenerate => {
                self.scene_regenerate(scene_id, verdict.reason, verdict.instructions)
            }
            SceneDecision::Drop => {
                self.decisions.push(DecisionRecord::new(
                    scene_id,
                    self.budgets.scene_regen_count + 1,
                    SceneDecision::Drop,
                    &verdict.reason,
                ));
                self.manuscript
                    .note_dropped(format!("{scene_id}: {}", verdict.reason));
                self.pending_instructions.clear();
                self.last_draft = None;
                format!("scene {scene_id} dropped: {}", verdict.reason)
            }
            SceneDecision::Merge => self.merge_scene(scene_id, draft, verdict, review.fingerprint),
            SceneDecision::Accept | SceneDecision::Rewrite => {
                self.accept_scene(scene_id, draft, verdict, review.fingerprint)
            }
        }
    }

    fn scene_regenerate(
        &mut self,
        scene_id: &str,
        reason: String,
        instructions: Option<String>,
    ) -> String {
        if self.budgets.scene_exhausted() {
            return self.force_accept(scene_id);
        }
        let count = self.budgets.record_scene_regen();
        self.decisions.push(DecisionRecord::new(
            scene_id,
            count,
            SceneDecision::Regenerate,
            &reason,
        ));
        if let Some(instructions) = instructions {
            self.pending_instructions = vec![instructions];
        }
        info!(scene_id, count, reason = %reason, "scene regenerating");
        format!("scene {scene_id} regenerating ({count}/{MAX_SCENE_REGENERATIONS}): {reason}")
    }

    /// Budget exhausted: accept the best attempt, trimmed hard.
    fn force_accept(&mut self, scene_id: &str) -> String {
        let Some(draft) = self.last_draft.clone() else {
            return "no draft available to force-accept; retrying writer".to_string();
        };
        let text = truncate_words(&draft.text, FORCED_ACCEPT_WORDS);
        let words = word_count(&text);

        let fingerprint = SceneFingerprint::minimal(
            scene_id,
            NarrativeFunction::Consequence,
            &format!("forced acceptance of \"{}\"", draft.title),
        );
        let patch = StatePatch {
            words_added: words,
            scene_summary: Some(format!("{} (accepted after budget exhaustion)", draft.title)),
            ..StatePatch::default()
        };
        let ctx = ApplyContext {
            scene_id: scene_id.to_string(),
            chapter: self.state.current_chapter(),
            accepted_word_count: words,
        };

        let mut next = self.state.clone();
        if let Err(e) = next.apply_patch(&patch, &ctx) {
            error!(scene_id, %e, "forced-acceptance patch failed");
            return format!("forced acceptance failed ({e}); retrying");
        }
        next.repetition.push_fingerprint(fingerprint);
        warn!(
            scene_id,
            words, "scene regeneration budget exhausted; forcing acceptance"
        );

        self.commit_scene(next, scene_id, &draft, &text);
        self.decisions.push(
            DecisionRecord::new(
                scene_id,
                MAX_SCENE_REGENERATIONS + 1,
                SceneDecision::Accept,
                "scene regeneration budget exhausted",
            )
            .forced(),
        );
        format!("scene {scene_id} force-accepted at {words} words")
    }

    fn accept_scene(
        &mut self,
        scene_id: &str,
        draft: DraftScene,
        verdict: chronicle_engine::EditorVerdict,
        fingerprint: SceneFingerprint,
    ) -> String {
        let decision = verdict.decision;
        let reason = verdict.reason;
        let text = verdict.edited_text.unwrap_or_else(|| draft.text.clone());
        let words = word_count(&text);
        let patch = verdict.state_patch.unwrap_or_default();
        let ctx = ApplyContext {
            scene_id: scene_id.to_string(),
            chapter: self.state.current_chapter(),
            accepted_word_count: words,
        };

        let mut next = self.state.clone();
        let summary = match next.apply_patch(&patch, &ctx) {
            Ok(s) => s,
            Err(e) => {
                error!(scene_id, %e, "patch application violated an invariant");
                return self.scene_regenerate(
                    scene_id,
                    format!("invalid state patch: {e}"),
                    None,
                );
            }
        };

        if !summary.is_meaningful() {
            return self.scene_regenerate(
                scene_id,
                "no meaningful state change".to_string(),
                Some(
                    "the scene must change the question set, move a character, or shift \
                     progression by more than 0.05"
                        .to_string(),
                ),
            );
        }

        if patch.scene_summary.is_none() {
            next.summaries.previous_scene = fingerprint.new_information.clone();
        }
        next.repetition.push_fingerprint(fingerprint);

        let attempt = self.budgets.scene_regen_count + 1;
        self.commit_scene(next, scene_id, &draft, &text);
        self.decisions
            .push(DecisionRecord::new(scene_id, attempt, decision, &reason));
        format!("scene {scene_id} accepted at {words} words ({decision})")
    }

    fn merge_scene(
        &mut self,
        scene_id: &str,
        draft: DraftScene,
        verdict: chronicle_engine::EditorVerdict,
        fingerprint: SceneFingerprint,
    ) -> String {
        let reason = verdict.reason;
        let patch = verdict.state_patch.unwrap_or_default();
        let text = verdict.edited_text.unwrap_or_else(|| draft.text.clone());

        // The merge mutates the manuscript before the patch is applied, so
        // keep the previous scene for rollback on patch failure.
        let saved_last = match self.manuscript.scenes.last() {
            Some(s) => s.clone(),
            None => {
                return self.scene_regenerate(
                    scene_id,
                    "merge rejected: no previous scene".to_string(),
                    Some("there is no previous scene; produce a standalone scene".to_string()),
                )
            }
        };
        let delta = match self.manuscript.merge_into_last(&text) {
            Ok(d) => d,
            Err(e) => {
                return self.scene_regenerate(
                    scene_id,
                    format!("merge rejected: {e}"),
                    Some("produce a standalone scene instead of a merge".to_string()),
                )
            }
        };

        let ctx = ApplyContext {
            scene_id: scene_id.to_string(),
            chapter: self.state.current_chapter(),
            accepted_word_count: delta,
        };
        let mut next = self.state.clone();
        match next.apply_patch(&patch, &ctx) {
            Ok(_) => {}
            Err(e) => {
                *self.manuscript.scenes.last_mut().expect("saved above") = saved_last;
                error!(scene_id, %e, "merge patch violated an invariant");
                return self.scene_regenerate(scene_id, format!("invalid state patch: {e}"), None);
            }
        }

        next.repetition.push_fingerprint(fingerprint);
        self.append_rolling_summaries(&mut next);
        self.state = next;
        let attempt = self.budgets.scene_regen_count + 1;
        self.budgets.reset_scene();
        self.pending_instructions.clear();
        self.last_draft = None;
        self.decisions.push(DecisionRecord::new(
            scene_id,
            attempt,
            SceneDecision::Merge,
            &reason,
        ));
        // The slot stays open; the scene index does not advance.
        format!("scene {scene_id} merged into previous scene (+{delta} words)")
    }

    /// Shared acceptance bookkeeping: manuscript push, summaries, budgets,
    /// structure advance.
    fn commit_scene(
        &mut self,
        mut next: NarrativeState,
        scene_id: &str,
        draft: &DraftScene,
        text: &str,
    ) {
        self.manuscript.push(SceneRecord::new(
            scene_id,
            next.structure.act_index,
            next.current_chapter(),
            next.structure.scene_in_chapter,
            &draft.title,
            &draft.pov,
            text,
        ));
        self.append_rolling_summaries(&mut next);
        self.state = next;
        self.budgets.reset_scene();
        self.pending_instructions.clear();
        self.last_draft = None;
        self.advance_after_accept();
    }

    fn append_rolling_summaries(&self, next: &mut NarrativeState) {
        let line = next.summaries.previous_scene.clone();
        if line.trim().is_empty() {
            return;
        }
        next.summaries.current_act.push_str("\n- ");
        next.summaries.current_act.push_str(&line);
        next.summaries.book_so_far.push_str("\n- ");
        next.summaries.book_so_far.push_str(&line);
        trim_to_tail(&mut next.summaries.current_act, ACT_SUMMARY_CAP);
        trim_to_tail(&mut next.summaries.book_so_far, BOOK_SUMMARY_CAP);
    }

    fn advance_after_accept(&mut self) {
        use chronicle_engine::state::AdvanceOutcome;

        let acts_total = self.state.geometry.acts_total;
        let act = self.state.structure.act_index;
        let outcome = self.state.advance_scene();
        let act_done = outcome == AdvanceOutcome::ActExhausted
            || self.state.act_state.act_words_written >= self.state.act_state.target_words;

        if act_done {
            if act >= acts_total {
                self.step = JobStep::Finalize;
            } else {
                self.step = JobStep::ValidateAct { act };
            }
        } else {
            self.step = JobStep::WriteScene {
                chapter: self.state.current_chapter(),
                scene: self.state.structure.scene_in_chapter,
            };
        }
    }

    fn build_brief(&self) -> String {
        let state = &self.state;
        let mut brief = format!(
            "Write act {}, chapter {}, scene {}. Act goal: {}.",
            state.structure.act_index,
            state.current_chapter(),
            state.structure.scene_in_chapter,
            state.act_state.goal,
        );
        if !state.summaries.previous_scene.trim().is_empty() {
            brief.push_str(&format!(
                " Follows directly from: {}.",
                state.summaries.previous_scene
            ));
        }
        if !state.act_state.open_questions.is_empty() {
            let keep: Vec<&str> = state
                .act_state
                .open_questions
                .iter()
                .take(3)
                .map(String::as_str)
                .collect();
            brief.push_str(&format!(" Keep alive: {}.", keep.join(" / ")));
        }
        if state.reality_refusals.due_at(state.current_chapter()) {
            brief.push_str(
                " This scene must stage a reality refusal: a clear question receives a \
                 factual answer that refuses interpretation.",
            );
        }
        let dropped = &self.manuscript.dropped_notes;
        if let Some(note) = dropped.last() {
            brief.push_str(&format!(" A prior draft for this slot was discarded ({note})."));
        }
        brief
    }

    // ---- act and book validation ---------------------------------------

    async fn run_act_validation(&mut self, act: u32) -> String {
        let quick = quick_check(&self.state, CheckPoint::ActEnd);
        if quick.has_fatal() {
            return self.fail_validation(
                format!("fatal structural issue at act {act} boundary"),
                quick.messages(),
            );
        }

        let validation = match self.validator.validate_act(&self.state, &quick.messages()).await
        {
            Ok(v) => v,
            Err(e) => return self.resumable("act validation", &e),
        };

        if validation.valid && quick.is_valid() {
            let plan = self
                .state
                .planned_acts
                .get(act as usize)
                .cloned()
                .unwrap_or_default();
            let mut next = self.state.clone();
            if next
                .open_act(&plan.goal, plan.open_questions, plan.close_conditions)
                .is_err()
            {
                self.step = JobStep::Finalize;
                return format!("act {act} validated; no acts remain, finalizing");
            }
            self.state = next;
            self.tail_constraints.clear();
            self.step = JobStep::WriteScene {
                chapter: self.state.current_chapter(),
                scene: self.state.structure.scene_in_chapter,
            };
            return format!("act {act} validated; act {} opened", act + 1);
        }

        self.order_act_regeneration(act, validation, quick.messages())
    }

    fn order_act_regeneration(
        &mut self,
        act: u32,
        validation: ActValidation,
        mut issues: Vec<String>,
    ) -> String {
        issues.extend(validation.issues.clone());
        if !self.budgets.record_act_tail_regen() {
            return self.fail_validation(
                format!("act {act} failed validation with the tail budget exhausted"),
                issues,
            );
        }

        let scope = validation
            .regeneration_scope
            .unwrap_or(ActRegenerationScope::Last15Percent);
        let removed = match scope {
            ActRegenerationScope::Last15Percent => {
                let cut = (self.state.act_state.act_words_written as f64 * ACT_TAIL_FRACTION)
                    .ceil() as u64;
                self.manuscript.truncate_tail_words(cut.max(1))
            }
            ActRegenerationScope::LastChapter => self.manuscript.truncate_last_chapter(),
        };

        self.restore_state_to_manuscript();
        self.tail_constraints = validation.regeneration_constraints;
        self.step = JobStep::WriteScene {
            chapter: self.state.current_chapter(),
            scene: self.state.structure.scene_in_chapter,
        };
        info!(
            act,
            removed,
            regen = self.budgets.act_tail_regen_count,
            "act tail truncated for regeneration"
        );
        format!(
            "act {act} failed validation; truncated {removed} words and resumed writing"
        )
    }

    async fn run_finalize(&mut self) -> String {
        if self.state.ending_anchor.is_none() {
            match self.extract_ending_anchor().await {
                Ok(Some(anchor)) => {
                    self.state.ending_anchor = Some(anchor);
                }
                Ok(None) => {
                    warn!("ending anchor extraction produced an invalid sentence");
                }
                Err(e) => return self.resumable("ending anchor", &e),
            }
        }

        let quick = quick_check(&self.state, CheckPoint::BookEnd);
        if quick.has_fatal() {
            return self.fail_validation(
                "fatal structural issue at book end".to_string(),
                quick.messages(),
            );
        }

        let validation = match self
            .validator
            .validate_book(&self.state, &quick.messages())
            .await
        {
            Ok(v) => v,
            Err(e) => return self.resumable("book validation", &e),
        };

        if validation.valid && quick.is_valid() {
            self.status = JobStatus::Complete;
            self.step = JobStep::Complete;
            return format!(
                "book complete: {} words, quality {}",
                self.state.structure.words_written, validation.quality_score
            );
        }

        self.order_final_regeneration(validation, quick.messages())
    }

    fn order_final_regeneration(
        &mut self,
        validation: BookValidation,
        mut issues: Vec<String>,
    ) -> String {
        issues.extend(validation.issues.clone());
        if !self.budgets.record_final_tail_regen() {
            return self.fail_validation(
                "book failed validation with the final-tail budget exhausted".to_string(),
                issues,
            );
        }

        let scope = validation
            .regeneration_scope
            .unwrap_or(BookRegenerationScope::FinalActTail);
        let final_act = self.state.geometry.acts_total;
        let removed = match scope {
            BookRegenerationScope::FinalActTail => {
                let cut =
                    (self.manuscript.act_words(final_act) as f64 * FINAL_TAIL_FRACTION).ceil()
                        as u64;
                self.manuscript.truncate_tail_words(cut.max(1))
            }
            BookRegenerationScope::FinalChapter => self.manuscript.truncate_last_chapter(),
        };

        self.restore_state_to_manuscript();
        self.tail_constraints = validation.regeneration_constraints;
        self.step = JobStep::WriteScene {
            chapter: self.state.current_chapter(),
            scene: self.state.structure.scene_in_chapter,
        };
        info!(
            removed,
            regen = self.budgets.final_tail_regen_count,
            "final tail truncated for regeneration"
        );
        format!("book failed validation; truncated {removed} words and resumed writing")
    }

    async fn extract_ending_anchor(
        &self,
    ) -> Result<Option<chronicle_engine::state::constraints::EndingAnchor>, LlmError> {
        use chronicle_engine::state::constraints::EndingAnchor;

        let (system_prompt, user_prompt) = prompts::ending_anchor(&self.state);
        let response = self
            .llm
            .generate_text(TextRequest {
                system_prompt,
                user_prompt,
                max_tokens: 256,
                temperature: 0.2,
            })
            .await?;

        let mut anchor_line = None;
        let mut cost_line = String::new();
        for line in response.content.lines() {
            if let Some(rest) = line.trim().strip_prefix("ANCHOR:") {
                anchor_line = Some(rest.trim().to_string());
            } else if let Some(rest) = line.trim().strip_prefix("COST:") {
                cost_line = rest.trim().to_string();
            }
        }
        let Some(sentence) = anchor_line else {
            return Ok(None);
        };
        match EndingAnchor::new(&sentence, &cost_line) {
            Ok(anchor) => Ok(Some(anchor)),
            Err(e) => {
                warn!(%e, "rejected ending anchor candidate");
                Ok(None)
            }
        }
    }

    /// After tail truncation, restore the state that matches the surviving
    /// manuscript.
    fn restore_state_to_manuscript(&mut self) {
        let words = self.manuscript.total_words();
        if let Some(snapshot) = self.snapshots.restore_before(words) {
            self.state = snapshot.state.clone();
        } else {
            warn!(words, "no snapshot at or below word count; keeping state");
        }
        self.pending_instructions.clear();
        self.last_draft = None;
        self.budgets.reset_scene();
    }
}

/// Keep roughly the trailing `cap` bytes, cutting at a line boundary.
fn trim_to_tail(text: &mut String, cap: usize) {
    if text.len() <= cap {
        return;
    }
    let mut cut = text.len() - cap;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    let tail_start = text[cut..]
        .find('\n')
        .map(|offset| cut + offset)
        .unwrap_or(cut);
    *text = text[tail_start..].trim_start().to_string();
}
