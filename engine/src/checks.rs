//! Quick structural checks — no LLM involved.
//!
//! Run before every act-end and book-end LLM validation and whenever an
//! acceptance might close an act. Issues feed the validator prompt and, at
//! budget exhaustion, the job's failure record.

use serde::{Deserialize, Serialize};

use crate::state::character::EpistemicRole;
use crate::state::motif::MotifBudget;
use crate::state::NarrativeState;

/// Where in the book the check is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPoint {
    MidBook,
    ActEnd,
    BookEnd,
}

/// How bad an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The job cannot proceed at all.
    Fatal,
    /// Validation fails; regeneration may repair it.
    Blocking,
}

/// Machine-readable issue codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    ProtagonistMissing,
    ProtagonistUnscathed,
    ProtagonistUntransformed,
    ProtagonistCostless,
    EscalationUnspent,
    BookTooShort,
    QuestionsUnresolved,
    NoIrreversibleCost,
    InterpretationCollapsed,
    RefusalsMissing,
    EndingAnchorMissing,
    RoleDivergence,
    MotifOverSaturated,
}

/// A single structural finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralIssue {
    pub code: IssueCode,
    pub severity: Severity,
    pub message: String,
}

impl StructuralIssue {
    fn fatal(code: IssueCode, message: String) -> Self {
        Self {
            code,
            severity: Severity::Fatal,
            message,
        }
    }

    fn blocking(code: IssueCode, message: String) -> Self {
        Self {
            code,
            severity: Severity::Blocking,
            message,
        }
    }
}

/// The outcome of a quick structural check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralReport {
    pub issues: Vec<StructuralIssue>,
}

impl StructuralReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Fatal)
    }

    /// Issue messages, for validator prompts and failure records.
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }
}

/// Run the quick structural check at a checkpoint.
pub fn quick_check(state: &NarrativeState, point: CheckPoint) -> StructuralReport {
    let mut report = StructuralReport::default();
    let book_end = point == CheckPoint::BookEnd;

    let protagonist = match state.protagonist() {
        Some(p) => p,
        None => {
            report.issues.push(StructuralIssue::fatal(
                IssueCode::ProtagonistMissing,
                format!(
                    "protagonist \"{}\" is not tracked in the character map",
                    state.request.protagonist_name
                ),
            ));
            return report;
        }
    };

    // Mid-book reached once the act index passes the midpoint.
    let past_midpoint = state.structure.act_index * 2 > state.geometry.acts_total;
    if (point == CheckPoint::MidBook || (past_midpoint && !book_end))
        && protagonist.costs_incurred.is_empty()
    {
        report.issues.push(StructuralIssue::blocking(
            IssueCode::ProtagonistCostless,
            "protagonist has incurred no cost by mid-book".to_string(),
        ));
    }

    if book_end {
        if !protagonist.irreversible_loss {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::ProtagonistUnscathed,
                "protagonist ends the book without an irreversible loss".to_string(),
            ));
        }
        if protagonist.transformation < 0.3 {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::ProtagonistUntransformed,
                format!(
                    "protagonist transformation {:.2} is below 0.3",
                    protagonist.transformation
                ),
            ));
        }
        if protagonist.costs_incurred.is_empty() {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::ProtagonistCostless,
                "protagonist ends the book with no costs incurred".to_string(),
            ));
        }
        if state.escalation_budget.remaining > 2 {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::EscalationUnspent,
                format!(
                    "{} escalation units left unspent",
                    state.escalation_budget.remaining
                ),
            ));
        }
        let target = u64::from(state.request.target_length_words);
        if (state.structure.words_written as f64) < 0.9 * target as f64 {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::BookTooShort,
                format!(
                    "{} words written, below 90% of the {target}-word target",
                    state.structure.words_written
                ),
            ));
        }
        if state.act_state.open_questions.len() > 3 {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::QuestionsUnresolved,
                format!(
                    "{} questions still open at book end",
                    state.act_state.open_questions.len()
                ),
            ));
        }
        if state.cost_ledger.irreversible_count < 1 {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::NoIrreversibleCost,
                "the cost ledger holds no irreversible cost".to_string(),
            ));
        }
        if state.reality_refusals.outstanding() {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::RefusalsMissing,
                format!(
                    "{} of {} required reality refusals recorded",
                    state.reality_refusals.refusals.len(),
                    state.reality_refusals.required_count
                ),
            ));
        }
        if state.ending_anchor.is_none() {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::EndingAnchorMissing,
                "no ending anchor has been extracted".to_string(),
            ));
        }

        // Role divergence: no two primaries may share a non-null role.
        let mut seen_roles: Vec<(String, EpistemicRole)> = Vec::new();
        for (name, character) in &state.characters {
            if !character.is_primary {
                continue;
            }
            if let Some(role) = character.epistemic_role {
                if let Some(entry) = seen_roles.iter().find(|entry| entry.1 == role) {
                    report.issues.push(StructuralIssue::blocking(
                        IssueCode::RoleDivergence,
                        format!(
                            "primary characters {} and {name} both end as {role}",
                            entry.0
                        ),
                    ));
                } else {
                    seen_roles.push((name.clone(), role));
                }
            }
        }
    }

    // The interpretation competition must stay plural until convergence
    // is allowed.
    if state.interpretation.models_generated
        && state.current_chapter() < state.interpretation.convergence_allowed_after
        && state.interpretation.active_count() < 2
    {
        report.issues.push(StructuralIssue::blocking(
            IssueCode::InterpretationCollapsed,
            format!(
                "only {} interpretation model(s) active before chapter {}",
                state.interpretation.active_count(),
                state.interpretation.convergence_allowed_after
            ),
        ));
    }

    // Ceiling: limit + 1 covers the permitted final recurrence.
    for (motif, budget) in &state.repetition.motif_budgets {
        if over_ceiling(budget) {
            report.issues.push(StructuralIssue::blocking(
                IssueCode::MotifOverSaturated,
                format!(
                    "motif \"{motif}\" reinforced {} times against a limit of {}",
                    budget.reinforcement_count, budget.reinforcement_limit
                ),
            ));
        }
    }

    report
}

fn over_ceiling(budget: &MotifBudget) -> bool {
    budget.reinforcement_count > budget.reinforcement_limit + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::character::{CharacterState, EpistemicRole};
    use crate::state::constraints::{EndingAnchor, RealityRefusal};
    use crate::state::BookRequest;

    fn request() -> BookRequest {
        BookRequest {
            prompt: "A keeper's death unsettles a harbor town".to_string(),
            genre: "literary mystery".to_string(),
            target_length_words: 30_000,
            theme_thesis: "Understanding always bills someone".to_string(),
            protagonist_name: "Mara".to_string(),
        }
    }

    fn complete_state() -> NarrativeState {
        let mut state = NarrativeState::initial(&request()).unwrap();
        state.structure.act_index = state.geometry.acts_total;
        state.structure.chapter_in_act = state.geometry.chapters_per_act;
        state.structure.words_written = 29_000;
        state.escalation_budget.remaining = 1;
        {
            let mara = state.characters.get_mut("Mara").unwrap();
            mara.transformation = 0.6;
            mara.add_cost("her certainty about the harbor");
            mara.mark_irreversible_loss();
            mara.epistemic_role = Some(EpistemicRole::Witness);
        }
        state.cost_ledger.irreversible_count = 1;
        state.reality_refusals.refusals.push(RealityRefusal {
            question: "why did the light go out".to_string(),
            answer: "the log shows a full oil tank".to_string(),
            scene_id: "ch4_s1".to_string(),
            chapter: 4,
        });
        state.ending_anchor =
            Some(EndingAnchor::new("Knowing cost Mara the harbor's trust.", "trust").unwrap());
        state
    }

    #[test]
    fn test_complete_state_passes_book_end() {
        let report = quick_check(&complete_state(), CheckPoint::BookEnd);
        assert!(report.is_valid(), "unexpected issues: {:?}", report.issues);
    }

    #[test]
    fn test_missing_protagonist_is_fatal() {
        let mut state = complete_state();
        state.characters.clear();
        let report = quick_check(&state, CheckPoint::BookEnd);
        assert!(report.has_fatal());
        assert_eq!(report.issues[0].code, IssueCode::ProtagonistMissing);
    }

    #[test]
    fn test_book_end_protagonist_requirements() {
        let mut state = complete_state();
        {
            let mara = state.characters.get_mut("Mara").unwrap();
            mara.irreversible_loss = false;
            mara.transformation = 0.1;
            mara.costs_incurred.clear();
        }
        let report = quick_check(&state, CheckPoint::BookEnd);
        let codes: Vec<IssueCode> = report.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&IssueCode::ProtagonistUnscathed));
        assert!(codes.contains(&IssueCode::ProtagonistUntransformed));
        assert!(codes.contains(&IssueCode::ProtagonistCostless));
    }

    #[test]
    fn test_midbook_costless() {
        let state = NarrativeState::initial(&request()).unwrap();
        let report = quick_check(&state, CheckPoint::MidBook);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].code, IssueCode::ProtagonistCostless);
    }

    #[test]
    fn test_book_end_budget_and_length() {
        let mut state = complete_state();
        state.escalation_budget.remaining = 5;
        state.structure.words_written = 20_000;
        state.act_state.open_questions = vec![
            "q1".to_string(),
            "q2".to_string(),
            "q3".to_string(),
            "q4".to_string(),
        ];
        let report = quick_check(&state, CheckPoint::BookEnd);
        let codes: Vec<IssueCode> = report.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&IssueCode::EscalationUnspent));
        assert!(codes.contains(&IssueCode::BookTooShort));
        assert!(codes.contains(&IssueCode::QuestionsUnresolved));
    }

    #[test]
    fn test_book_end_ledger_refusals_anchor() {
        let mut state = complete_state();
        state.cost_ledger.irreversible_count = 0;
        state.reality_refusals.refusals.clear();
        state.ending_anchor = None;
        let report = quick_check(&state, CheckPoint::BookEnd);
        let codes: Vec<IssueCode> = report.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&IssueCode::NoIrreversibleCost));
        assert!(codes.contains(&IssueCode::RefusalsMissing));
        assert!(codes.contains(&IssueCode::EndingAnchorMissing));
    }

    #[test]
    fn test_role_divergence() {
        let mut state = complete_state();
        let mut rival = CharacterState::new(true);
        rival.epistemic_role = Some(EpistemicRole::Witness);
        state.characters.insert("Tomas".to_string(), rival);
        let report = quick_check(&state, CheckPoint::BookEnd);
        let codes: Vec<IssueCode> = report.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&IssueCode::RoleDivergence));
    }

    #[test]
    fn test_distinct_roles_pass() {
        let mut state = complete_state();
        let mut rival = CharacterState::new(true);
        rival.epistemic_role = Some(EpistemicRole::Resister);
        state.characters.insert("Tomas".to_string(), rival);
        let mut silent = CharacterState::new(true);
        silent.epistemic_role = None;
        state.characters.insert("Edda".to_string(), silent);
        let report = quick_check(&state, CheckPoint::BookEnd);
        assert!(report.is_valid());
    }

    #[test]
    fn test_interpretation_collapse_before_convergence() {
        let mut state = NarrativeState::initial(&request()).unwrap();
        state.interpretation.models_generated = true;
        state.interpretation.convergence_allowed_after = 5;
        // One active model only.
        let report = quick_check(&state, CheckPoint::ActEnd);
        let codes: Vec<IssueCode> = report.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&IssueCode::InterpretationCollapsed));
    }

    #[test]
    fn test_motif_ceiling() {
        let mut state = complete_state();
        state.repetition.record_motif("lighthouse", 1);
        state
            .repetition
            .motif_budgets
            .get_mut("lighthouse")
            .unwrap()
            .reinforcement_count = 5;
        let report = quick_check(&state, CheckPoint::BookEnd);
        let codes: Vec<IssueCode> = report.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&IssueCode::MotifOverSaturated));
    }
}
