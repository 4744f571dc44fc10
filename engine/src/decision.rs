//! Editor decisions and the verdict payload.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::patch::StatePatch;

/// What the editor ruled for a drafted scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SceneDecision {
    /// Scene joins the manuscript as-is or as the edited text.
    Accept,
    /// Scene is kept but replaced by the edited text.
    Rewrite,
    /// Text is merged into the previous accepted scene.
    Merge,
    /// Scene is discarded; the writer retries with instructions.
    Regenerate,
    /// Scene is discarded; the slot is re-briefed.
    Drop,
}

impl SceneDecision {
    /// Whether this decision keeps text in the manuscript and resets the
    /// scene regeneration counter.
    pub fn is_acceptance(self) -> bool {
        matches!(self, Self::Accept | Self::Rewrite | Self::Merge)
    }
}

impl std::fmt::Display for SceneDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Rewrite => write!(f, "rewrite"),
            Self::Merge => write!(f, "merge"),
            Self::Regenerate => write!(f, "regenerate"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

/// The editor's full ruling on a drafted scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EditorVerdict {
    pub decision: SceneDecision,
    pub reason: String,
    /// Replacement text for ACCEPT-with-edits, REWRITE, and MERGE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_patch: Option<StatePatch>,
    /// Writer guidance when the decision is REGENERATE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl EditorVerdict {
    /// A regeneration verdict with guidance.
    pub fn regenerate(reason: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            decision: SceneDecision::Regenerate,
            reason: reason.into(),
            edited_text: None,
            state_patch: None,
            instructions: Some(instructions.into()),
        }
    }
}

/// One entry in the orchestrator's decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub scene_id: String,
    /// Attempt number for the slot (1-indexed).
    pub attempt: u32,
    pub decision: SceneDecision,
    pub reason: String,
    /// Whether the orchestrator forced this decision after budget
    /// exhaustion.
    pub forced: bool,
    pub timestamp: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(scene_id: &str, attempt: u32, decision: SceneDecision, reason: &str) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            attempt,
            decision,
            reason: reason.to_string(),
            forced: false,
            timestamp: Utc::now(),
        }
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptance_class() {
        assert!(SceneDecision::Accept.is_acceptance());
        assert!(SceneDecision::Rewrite.is_acceptance());
        assert!(SceneDecision::Merge.is_acceptance());
        assert!(!SceneDecision::Regenerate.is_acceptance());
        assert!(!SceneDecision::Drop.is_acceptance());
    }

    #[test]
    fn test_decision_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&SceneDecision::Regenerate).unwrap(),
            "\"regenerate\""
        );
        let parsed: SceneDecision = serde_json::from_str("\"merge\"").unwrap();
        assert_eq!(parsed, SceneDecision::Merge);
    }

    #[test]
    fn test_verdict_minimal_json() {
        let json = r#"{"decision": "accept", "reason": "moves the plot"}"#;
        let verdict: EditorVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(verdict.decision, SceneDecision::Accept);
        assert!(verdict.edited_text.is_none());
        assert!(verdict.state_patch.is_none());
    }

    #[test]
    fn test_regenerate_helper() {
        let verdict = EditorVerdict::regenerate("duplicate", "reveal something new");
        assert_eq!(verdict.decision, SceneDecision::Regenerate);
        assert_eq!(verdict.instructions.as_deref(), Some("reveal something new"));
    }

    #[test]
    fn test_forced_record() {
        let record =
            DecisionRecord::new("ch1_s1", 4, SceneDecision::Accept, "budget exhausted").forced();
        assert!(record.forced);
        assert_eq!(record.attempt, 4);
    }
}
