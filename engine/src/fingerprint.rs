//! Scene fingerprints — the schema-bound semantic summary of a scene.
//!
//! The editor extracts exactly one fingerprint per drafted scene. The
//! fingerprint, never the prose, is what redundancy detection and state
//! deltas operate on. Once a scene is accepted its fingerprint is frozen.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::character::EpistemicRole;
use crate::state::constraints::{CostUpdate, InterpretationUpdate, RefusalUpdate};

/// What a scene does for the narrative. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeFunction {
    Discovery,
    Confirmation,
    Escalation,
    Consequence,
    Reversal,
    Surrender,
    Resolution,
}

impl std::fmt::Display for NarrativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Confirmation => write!(f, "confirmation"),
            Self::Escalation => write!(f, "escalation"),
            Self::Consequence => write!(f, "consequence"),
            Self::Reversal => write!(f, "reversal"),
            Self::Surrender => write!(f, "surrender"),
            Self::Resolution => write!(f, "resolution"),
        }
    }
}

/// How a scene moved one character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CharacterImpact {
    pub character: String,
    pub impact: String,
}

/// Changes to the open-question set, as observed by the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuestionDelta {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub resolved: Vec<String>,
    #[serde(default)]
    pub reframed: Vec<String>,
}

impl QuestionDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.resolved.is_empty() && self.reframed.is_empty()
    }
}

/// A character settling into an epistemic role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EpistemicRoleSignal {
    pub character: String,
    pub role: EpistemicRole,
}

/// The semantic summary of one drafted scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneFingerprint {
    /// Overwritten with the orchestrator-supplied id; LLM-provided ids are
    /// ignored.
    pub scene_id: String,
    pub narrative_function: NarrativeFunction,
    /// One sentence stating what the reader did not previously know.
    pub new_information: String,
    /// One sentence, or null when the scene introduces no consequence.
    #[serde(default)]
    pub consequence_introduced: Option<String>,
    /// Emotional movement in [-1, 1].
    pub emotional_delta: f64,
    /// Stakes movement in [0, 1].
    pub escalation_delta: f64,
    #[serde(default)]
    pub character_impacts: Vec<CharacterImpact>,
    #[serde(default)]
    pub unresolved_question_changes: QuestionDelta,
    #[serde(default)]
    pub motifs_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_incurred: Option<CostUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality_refusal: Option<RefusalUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation_model_update: Option<InterpretationUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epistemic_role_signal: Option<EpistemicRoleSignal>,
}

impl SceneFingerprint {
    /// A bare fingerprint carrying only the required fields. Test and
    /// forced-acceptance helper.
    pub fn minimal(scene_id: &str, function: NarrativeFunction, new_information: &str) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            narrative_function: function,
            new_information: new_information.to_string(),
            consequence_introduced: None,
            emotional_delta: 0.0,
            escalation_delta: 0.0,
            character_impacts: Vec::new(),
            unresolved_question_changes: QuestionDelta::default(),
            motifs_used: Vec::new(),
            cost_incurred: None,
            reality_refusal: None,
            interpretation_model_update: None,
            epistemic_role_signal: None,
        }
    }

    /// Clamp the deltas into their declared ranges.
    pub fn clamped(mut self) -> Self {
        self.emotional_delta = self.emotional_delta.clamp(-1.0, 1.0);
        self.escalation_delta = self.escalation_delta.clamp(0.0, 1.0);
        self
    }
}
