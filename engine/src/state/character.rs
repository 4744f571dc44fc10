//! Character tracking — certainty, transformation, and epistemic roles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The stance a character ends up taking toward the story's central mystery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EpistemicRole {
    /// Saw what happened and carries it.
    Witness,
    /// Builds explanations and defends them.
    Interpreter,
    /// Refuses the emerging account.
    Resister,
    /// Walks away from the question entirely.
    Abandoner,
}

impl std::fmt::Display for EpistemicRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Witness => write!(f, "witness"),
            Self::Interpreter => write!(f, "interpreter"),
            Self::Resister => write!(f, "resister"),
            Self::Abandoner => write!(f, "abandoner"),
        }
    }
}

/// Tracked state for a single character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    /// How certain the character is about the mystery, in [0, 1].
    pub certainty: f64,
    /// How far the character has moved from who they were, in [0, 1].
    pub transformation: f64,
    /// Permanent losses attributed to this character, in story order.
    pub costs_incurred: Vec<String>,
    /// Whether the character has suffered a loss that cannot be undone.
    pub irreversible_loss: bool,
    /// The epistemic role the character has settled into, if any.
    pub epistemic_role: Option<EpistemicRole>,
    /// Whether this character is one of the book's primary figures.
    pub is_primary: bool,
}

impl CharacterState {
    /// A freshly introduced character with no history.
    pub fn new(is_primary: bool) -> Self {
        Self {
            certainty: 0.0,
            transformation: 0.0,
            costs_incurred: Vec::new(),
            irreversible_loss: false,
            epistemic_role: None,
            is_primary,
        }
    }

    /// Shift certainty by a delta, clamped to [0, 1].
    pub fn shift_certainty(&mut self, delta: f64) {
        self.certainty = (self.certainty + delta).clamp(0.0, 1.0);
    }

    /// Shift transformation by a delta, clamped to [0, 1].
    pub fn shift_transformation(&mut self, delta: f64) {
        self.transformation = (self.transformation + delta).clamp(0.0, 1.0);
    }

    /// Record a cost against this character.
    pub fn add_cost(&mut self, cost: impl Into<String>) {
        self.costs_incurred.push(cost.into());
    }

    /// Mark an irreversible loss. The flag only transitions false → true.
    pub fn mark_irreversible_loss(&mut self) {
        self.irreversible_loss = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_character_is_blank() {
        let c = CharacterState::new(true);
        assert_eq!(c.certainty, 0.0);
        assert_eq!(c.transformation, 0.0);
        assert!(c.costs_incurred.is_empty());
        assert!(!c.irreversible_loss);
        assert_eq!(c.epistemic_role, None);
        assert!(c.is_primary);
    }

    #[test]
    fn test_shifts_clamp() {
        let mut c = CharacterState::new(false);
        c.shift_certainty(1.5);
        assert_eq!(c.certainty, 1.0);
        c.shift_certainty(-3.0);
        assert_eq!(c.certainty, 0.0);
        c.shift_transformation(0.4);
        c.shift_transformation(0.4);
        c.shift_transformation(0.4);
        assert_eq!(c.transformation, 1.0);
    }

    #[test]
    fn test_irreversible_loss_latches() {
        let mut c = CharacterState::new(false);
        c.mark_irreversible_loss();
        assert!(c.irreversible_loss);
        c.mark_irreversible_loss();
        assert!(c.irreversible_loss);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(EpistemicRole::Witness.to_string(), "witness");
        assert_eq!(EpistemicRole::Interpreter.to_string(), "interpreter");
        assert_eq!(EpistemicRole::Resister.to_string(), "resister");
        assert_eq!(EpistemicRole::Abandoner.to_string(), "abandoner");
    }
}
