//! Planner stage — story constitution and per-act plans.

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use chronicle_engine::state::constraints::ModelId;
use chronicle_engine::state::NarrativeState;

use crate::llm::{decode, JsonRequest, LlmClient, LlmError};
use crate::prompts;

/// A supporting character declared by the constitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CastMember {
    pub name: String,
    #[serde(default)]
    pub is_primary: bool,
}

/// One seeded interpretation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelSeed {
    pub id: ModelId,
    pub label: String,
    pub description: String,
}

/// The book's constitution: premise, cast, competing interpretations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Constitution {
    pub premise: String,
    /// Seed for the book-so-far summary.
    pub opening_summary: String,
    #[serde(default)]
    pub cast: Vec<CastMember>,
    /// Exactly three models with ids a, b, c.
    pub interpretation_models: Vec<ModelSeed>,
}

/// Plan for a single act.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActPlan {
    pub goal: String,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub close_conditions: Vec<String>,
}

/// The full act plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BookPlan {
    pub acts: Vec<ActPlan>,
}

/// Produces the constitution and act plans.
pub struct PlannerStage {
    llm: Arc<dyn LlmClient>,
    temperature: f64,
    max_tokens: u32,
}

impl PlannerStage {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f64, max_tokens: u32) -> Self {
        Self {
            llm,
            temperature,
            max_tokens,
        }
    }

    /// Generate the constitution. Fails as a schema error when the three
    /// interpretation models do not arrive with distinct ids.
    pub async fn constitution(&self, state: &NarrativeState) -> Result<Constitution, LlmError> {
        let (system_prompt, user_prompt) = prompts::constitution(state);
        let response = self
            .llm
            .generate_json(JsonRequest {
                system_prompt,
                user_prompt,
                schema: serde_json::to_value(schema_for!(Constitution)).unwrap_or_default(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;
        let constitution: Constitution = decode(&response)?;

        let mut ids: Vec<ModelId> = constitution
            .interpretation_models
            .iter()
            .map(|m| m.id)
            .collect();
        ids.sort_by_key(|id| *id as u8);
        ids.dedup();
        if ids != [ModelId::A, ModelId::B, ModelId::C] {
            return Err(LlmError::SchemaFailure(
                "constitution must seed exactly three interpretation models a, b, c".to_string(),
            ));
        }
        Ok(constitution)
    }

    /// Generate the per-act plan, truncated or padded to the act count.
    pub async fn plan(&self, state: &NarrativeState) -> Result<Vec<ActPlan>, LlmError> {
        let (system_prompt, user_prompt) = prompts::act_plan(state);
        let response = self
            .llm
            .generate_json(JsonRequest {
                system_prompt,
                user_prompt,
                schema: serde_json::to_value(schema_for!(BookPlan)).unwrap_or_default(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;
        let plan: BookPlan = decode(&response)?;

        let wanted = state.geometry.acts_total as usize;
        if plan.acts.is_empty() {
            return Err(LlmError::SchemaFailure("plan contains no acts".to_string()));
        }
        let mut acts = plan.acts;
        acts.truncate(wanted);
        while acts.len() < wanted {
            acts.push(ActPlan {
                goal: format!("carry the story through act {}", acts.len() + 1),
                open_questions: Vec::new(),
                close_conditions: Vec::new(),
            });
        }
        Ok(acts)
    }
}
