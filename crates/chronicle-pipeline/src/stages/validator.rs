//! Validator stage — quick structural checks plus LLM validation at act
//! and book boundaries.

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use chronicle_engine::state::NarrativeState;
use chronicle_engine::{quick_check, CheckPoint, StructuralReport};

use crate::llm::{decode, JsonRequest, LlmClient, LlmError};
use crate::prompts;

/// How much of the act to regenerate after a failed act validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ActRegenerationScope {
    #[serde(rename = "last_15_percent")]
    Last15Percent,
    #[serde(rename = "last_chapter")]
    LastChapter,
}

/// How much of the book tail to regenerate after a failed book validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BookRegenerationScope {
    #[serde(rename = "final_act_tail")]
    FinalActTail,
    #[serde(rename = "final_chapter")]
    FinalChapter,
}

/// LLM verdict at an act boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActValidation {
    pub valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regeneration_scope: Option<ActRegenerationScope>,
    #[serde(default)]
    pub regeneration_constraints: Vec<String>,
}

/// LLM verdict at the book boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BookValidation {
    pub valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regeneration_scope: Option<BookRegenerationScope>,
    #[serde(default)]
    pub regeneration_constraints: Vec<String>,
    /// Overall quality in [0, 100].
    pub quality_score: u8,
    #[serde(default)]
    pub notes: String,
}

/// Structural validation at act and book boundaries.
pub struct ValidatorStage {
    llm: Arc<dyn LlmClient>,
    temperature: f64,
    max_tokens: u32,
}

impl ValidatorStage {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f64, max_tokens: u32) -> Self {
        Self {
            llm,
            temperature,
            max_tokens,
        }
    }

    /// The deterministic pre-check. Free, runs before every LLM validation.
    pub fn quick(&self, state: &NarrativeState, point: CheckPoint) -> StructuralReport {
        quick_check(state, point)
    }

    /// Act-boundary LLM validation; quick issues are surfaced to the model.
    pub async fn validate_act(
        &self,
        state: &NarrativeState,
        quick_issues: &[String],
    ) -> Result<ActValidation, LlmError> {
        let (system_prompt, user_prompt) = prompts::act_validation(state, quick_issues);
        let response = self
            .llm
            .generate_json(JsonRequest {
                system_prompt,
                user_prompt,
                schema: serde_json::to_value(schema_for!(ActValidation)).unwrap_or_default(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;
        decode(&response)
    }

    /// Book-boundary LLM validation.
    pub async fn validate_book(
        &self,
        state: &NarrativeState,
        quick_issues: &[String],
    ) -> Result<BookValidation, LlmError> {
        let (system_prompt, user_prompt) = prompts::book_validation(state, quick_issues);
        let response = self
            .llm
            .generate_json(JsonRequest {
                system_prompt,
                user_prompt,
                schema: serde_json::to_value(schema_for!(BookValidation)).unwrap_or_default(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;
        decode(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use chronicle_engine::BookRequest;
    use serde_json::json;

    fn state() -> NarrativeState {
        NarrativeState::initial(&BookRequest {
            prompt: "A keeper's death unsettles a harbor town".to_string(),
            genre: "literary mystery".to_string(),
            target_length_words: 30_000,
            theme_thesis: "Understanding always bills someone".to_string(),
            protagonist_name: "Mara".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_scope_wire_format() {
        assert_eq!(
            serde_json::to_string(&ActRegenerationScope::Last15Percent).unwrap(),
            "\"last_15_percent\""
        );
        assert_eq!(
            serde_json::to_string(&BookRegenerationScope::FinalActTail).unwrap(),
            "\"final_act_tail\""
        );
        let parsed: ActRegenerationScope =
            serde_json::from_str("\"last_chapter\"").unwrap();
        assert_eq!(parsed, ActRegenerationScope::LastChapter);
    }

    #[tokio::test]
    async fn test_validate_act_decodes() {
        let mock = Arc::new(MockLlm::new());
        mock.push_json(json!({
            "valid": false,
            "issues": ["protagonist untouched"],
            "regeneration_scope": "last_15_percent",
            "regeneration_constraints": ["give the discovery a price"]
        }));
        let stage = ValidatorStage::new(mock, 0.2, 2_048);
        let validation = stage.validate_act(&state(), &[]).await.unwrap();
        assert!(!validation.valid);
        assert_eq!(
            validation.regeneration_scope,
            Some(ActRegenerationScope::Last15Percent)
        );
        assert_eq!(validation.regeneration_constraints.len(), 1);
    }

    #[tokio::test]
    async fn test_validate_book_decodes() {
        let mock = Arc::new(MockLlm::new());
        mock.push_json(json!({
            "valid": true,
            "quality_score": 74,
            "notes": "ending holds"
        }));
        let stage = ValidatorStage::new(mock, 0.2, 2_048);
        let validation = stage.validate_book(&state(), &[]).await.unwrap();
        assert!(validation.valid);
        assert_eq!(validation.quality_score, 74);
        assert!(validation.regeneration_scope.is_none());
    }

    #[test]
    fn test_quick_delegates_to_engine() {
        let stage = ValidatorStage::new(Arc::new(MockLlm::new()), 0.2, 2_048);
        let report = stage.quick(&state(), CheckPoint::BookEnd);
        assert!(!report.is_valid());
    }
}
