//! Narrative constraint records — cost ledger, interpretation competition,
//! reality refusals, and the ending anchor.
//!
//! These are the book-level obligations the engine enforces. Each record is
//! stamped with the scene and chapter where it was earned; the unstamped
//! `*Update` forms are what the editor emits across the LLM boundary.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What kind of permanent loss a narrative cost represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    Identity,
    Relationship,
    Reputation,
    Safety,
    Future,
}

impl std::fmt::Display for CostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Relationship => write!(f, "relationship"),
            Self::Reputation => write!(f, "reputation"),
            Self::Safety => write!(f, "safety"),
            Self::Future => write!(f, "future"),
        }
    }
}

/// A permanent loss recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeCost {
    pub cost_type: CostType,
    /// Character the loss belongs to.
    pub owner: String,
    /// What caused the loss.
    pub trigger: String,
    pub description: String,
    pub irreversible: bool,
    /// Scene that earned the cost.
    pub scene_id: String,
    /// Chapter observed at the start of patch application.
    pub chapter: u32,
}

/// Unstamped cost as emitted by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CostUpdate {
    pub cost_type: CostType,
    pub owner: String,
    pub trigger: String,
    pub description: String,
    pub irreversible: bool,
}

impl CostUpdate {
    /// Stamp the update with its scene and chapter of record.
    pub fn stamped(&self, scene_id: &str, chapter: u32) -> NarrativeCost {
        NarrativeCost {
            cost_type: self.cost_type,
            owner: self.owner.clone(),
            trigger: self.trigger.clone(),
            description: self.description.clone(),
            irreversible: self.irreversible,
            scene_id: scene_id.to_string(),
            chapter,
        }
    }
}

/// The book's accumulated permanent losses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    pub costs: Vec<NarrativeCost>,
    /// Count of costs marked irreversible. Must reach ≥ 1 by book end.
    pub irreversible_count: u32,
}

impl CostLedger {
    /// Record a cost, maintaining the irreversible count.
    pub fn record(&mut self, cost: NarrativeCost) {
        if cost.irreversible {
            self.irreversible_count += 1;
        }
        self.costs.push(cost);
    }
}

/// Identifier of one of the three competing interpretation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    A,
    B,
    C,
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "a"),
            Self::B => write!(f, "b"),
            Self::C => write!(f, "c"),
        }
    }
}

/// Lifecycle status of an interpretation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Active,
    Discredited,
    Validated,
    Abandoned,
}

/// One competing explanation of the story's core mystery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InterpretationModel {
    pub id: ModelId,
    pub label: String,
    pub description: String,
    /// The explanation other characters find easiest to live with.
    pub wins_socially: bool,
    /// The explanation the evidence best supports.
    pub wins_empirically: bool,
    /// The explanation that feels true regardless of evidence.
    pub feels_emotionally_true: bool,
    pub status: ModelStatus,
}

/// Editor-emitted adjustment to one interpretation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InterpretationUpdate {
    pub id: ModelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ModelStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wins_socially: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wins_empirically: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feels_emotionally_true: Option<bool>,
    /// Declare the competition converged on this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_converged: Option<bool>,
}

/// The competition between mutually exclusive explanations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterpretationCompetition {
    /// Whether the constitution step has seeded the models.
    pub models_generated: bool,
    pub models: Vec<InterpretationModel>,
    /// Chapter before which at least two models must stay active.
    pub convergence_allowed_after: u32,
    pub has_converged: bool,
}

impl InterpretationCompetition {
    /// Number of models still active.
    pub fn active_count(&self) -> usize {
        self.models
            .iter()
            .filter(|m| m.status == ModelStatus::Active)
            .count()
    }

    /// Look up a model by id.
    pub fn model_mut(&mut self, id: ModelId) -> Option<&mut InterpretationModel> {
        self.models.iter_mut().find(|m| m.id == id)
    }
}

/// A scene where a clear question got an answer that refuses interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealityRefusal {
    pub question: String,
    pub answer: String,
    pub scene_id: String,
    pub chapter: u32,
}

/// Unstamped refusal as emitted by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RefusalUpdate {
    pub question: String,
    pub answer: String,
}

impl RefusalUpdate {
    pub fn stamped(&self, scene_id: &str, chapter: u32) -> RealityRefusal {
        RealityRefusal {
            question: self.question.clone(),
            answer: self.answer.clone(),
            scene_id: scene_id.to_string(),
            chapter,
        }
    }
}

/// Reality refusals required of the book, with scheduled injection points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealityRefusals {
    pub refusals: Vec<RealityRefusal>,
    /// Minimum refusals required by book end.
    pub required_count: u32,
    /// Global chapter indices where a refusal scene is scheduled.
    pub injection_points: Vec<u32>,
}

impl RealityRefusals {
    /// Whether the book still owes refusals.
    pub fn outstanding(&self) -> bool {
        (self.refusals.len() as u32) < self.required_count
    }

    /// Whether a refusal is due at the given global chapter.
    pub fn due_at(&self, chapter: u32) -> bool {
        self.outstanding() && self.injection_points.contains(&chapter)
    }
}

/// Why an ending-anchor candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnchorError {
    #[error("anchor sentence is empty")]
    Empty,
    #[error("anchor sentence is {0} chars, limit is 240")]
    TooLong(usize),
    #[error("anchor must be a single declarative sentence")]
    NotSingle,
    #[error("anchor may not contain an em-dash or ellipsis")]
    Evasive,
}

/// The single declarative sentence that closes the book, plus what the
/// understanding cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndingAnchor {
    pub sentence: String,
    pub epistemic_cost_summary: String,
}

impl EndingAnchor {
    /// Validate and construct an anchor: trimmed, non-empty, ≤ 240 chars,
    /// exactly one sentence, no em-dash, no ellipsis.
    pub fn new(sentence: &str, epistemic_cost_summary: &str) -> Result<Self, AnchorError> {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return Err(AnchorError::Empty);
        }
        if sentence.chars().count() > 240 {
            return Err(AnchorError::TooLong(sentence.chars().count()));
        }
        if sentence.contains('—') || sentence.contains("...") || sentence.contains('…') {
            return Err(AnchorError::Evasive);
        }
        let terminals = sentence.matches(['.', '!', '?']).count();
        let ends_clean = sentence.ends_with('.');
        if terminals > 1 || !ends_clean {
            return Err(AnchorError::NotSingle);
        }
        Ok(Self {
            sentence: sentence.to_string(),
            epistemic_cost_summary: epistemic_cost_summary.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_counts_irreversible() {
        let mut ledger = CostLedger::default();
        let update = CostUpdate {
            cost_type: CostType::Relationship,
            owner: "Mara".to_string(),
            trigger: "the confession".to_string(),
            description: "Her sister stops speaking to her".to_string(),
            irreversible: true,
        };
        ledger.record(update.stamped("ch3_s1", 3));
        assert_eq!(ledger.irreversible_count, 1);
        assert_eq!(ledger.costs[0].scene_id, "ch3_s1");
        assert_eq!(ledger.costs[0].chapter, 3);

        let reversible = CostUpdate {
            irreversible: false,
            ..update
        };
        ledger.record(reversible.stamped("ch4_s2", 4));
        assert_eq!(ledger.irreversible_count, 1);
        assert_eq!(ledger.costs.len(), 2);
    }

    #[test]
    fn test_active_count() {
        let mut comp = InterpretationCompetition {
            models_generated: true,
            models: vec![
                InterpretationModel {
                    id: ModelId::A,
                    label: "accident".to_string(),
                    description: String::new(),
                    wins_socially: true,
                    wins_empirically: false,
                    feels_emotionally_true: false,
                    status: ModelStatus::Active,
                },
                InterpretationModel {
                    id: ModelId::B,
                    label: "negligence".to_string(),
                    description: String::new(),
                    wins_socially: false,
                    wins_empirically: true,
                    feels_emotionally_true: false,
                    status: ModelStatus::Active,
                },
            ],
            convergence_allowed_after: 8,
            has_converged: false,
        };
        assert_eq!(comp.active_count(), 2);
        comp.model_mut(ModelId::B).unwrap().status = ModelStatus::Discredited;
        assert_eq!(comp.active_count(), 1);
    }

    #[test]
    fn test_refusals_due_at_injection_points() {
        let refusals = RealityRefusals {
            refusals: Vec::new(),
            required_count: 1,
            injection_points: vec![4, 8],
        };
        assert!(refusals.due_at(4));
        assert!(!refusals.due_at(5));
        assert!(refusals.outstanding());
    }

    #[test]
    fn test_refusals_satisfied_not_due() {
        let refusals = RealityRefusals {
            refusals: vec![RealityRefusal {
                question: "why".to_string(),
                answer: "the tide log shows nothing".to_string(),
                scene_id: "ch4_s2".to_string(),
                chapter: 4,
            }],
            required_count: 1,
            injection_points: vec![4, 8],
        };
        assert!(!refusals.outstanding());
        assert!(!refusals.due_at(8));
    }

    #[test]
    fn test_anchor_accepts_plain_sentence() {
        let anchor =
            EndingAnchor::new("Knowing what happened cost Mara her sister.", "loss of kin")
                .unwrap();
        assert_eq!(anchor.sentence, "Knowing what happened cost Mara her sister.");
    }

    #[test]
    fn test_anchor_rejects_shapes() {
        assert_eq!(
            EndingAnchor::new("", "x").unwrap_err(),
            AnchorError::Empty
        );
        let long = "word ".repeat(60);
        assert!(matches!(
            EndingAnchor::new(&long, "x").unwrap_err(),
            AnchorError::TooLong(_)
        ));
        assert_eq!(
            EndingAnchor::new("She knew — or thought she did.", "x").unwrap_err(),
            AnchorError::Evasive
        );
        assert_eq!(
            EndingAnchor::new("It ended...", "x").unwrap_err(),
            AnchorError::Evasive
        );
        assert_eq!(
            EndingAnchor::new("Did it cost her?", "x").unwrap_err(),
            AnchorError::NotSingle
        );
        assert_eq!(
            EndingAnchor::new("It ended. She left.", "x").unwrap_err(),
            AnchorError::NotSingle
        );
    }
}
