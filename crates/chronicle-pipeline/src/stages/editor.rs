//! Editor stage — fingerprint extraction, deterministic redundancy gates,
//! and the full editorial evaluation.
//!
//! Phase B is the engine's deterministic short-circuit: a redundancy hit
//! returns REGENERATE without spending a second LLM call.

use std::sync::Arc;

use schemars::schema_for;
use tracing::info;

use chronicle_engine::state::NarrativeState;
use chronicle_engine::text::{truncate_words, word_count};
use chronicle_engine::{check_redundancy, EditorVerdict, SceneDecision, SceneFingerprint};

use crate::llm::{decode, JsonRequest, LlmClient, LlmError};
use crate::prompts;
use crate::stages::writer::DraftScene;

/// Lower bound on accepted (post-edit) text.
pub const MIN_ACCEPTED_WORDS: u64 = 900;
/// Upper bound on accepted (post-edit) text; longer text is cut.
pub const MAX_ACCEPTED_WORDS: u64 = 1_800;

/// The editor's complete output for one drafted scene.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorReview {
    pub fingerprint: SceneFingerprint,
    pub verdict: EditorVerdict,
    /// Whether the deterministic gates decided without a second LLM call.
    pub short_circuited: bool,
}

/// Judges drafted scenes. The only stage that emits state patches.
pub struct EditorStage {
    llm: Arc<dyn LlmClient>,
    temperature: f64,
    max_tokens: u32,
}

impl EditorStage {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f64, max_tokens: u32) -> Self {
        Self {
            llm,
            temperature,
            max_tokens,
        }
    }

    /// Review a drafted scene end to end.
    pub async fn review(
        &self,
        state: &NarrativeState,
        scene_id: &str,
        draft: &DraftScene,
    ) -> Result<EditorReview, LlmError> {
        // Phase A: fingerprint extraction. The supplied scene id wins.
        let mut fingerprint = self.extract_fingerprint(state, &draft.text).await?;
        fingerprint.scene_id = scene_id.to_string();

        // Phase B: deterministic redundancy short-circuit.
        if let Some(hit) = check_redundancy(&fingerprint, &state.repetition, state.current_chapter())
        {
            info!(rule = %hit.rule, scene_id, "redundancy gate hit");
            return Ok(EditorReview {
                fingerprint,
                verdict: EditorVerdict::regenerate(hit.reason, hit.suggestion),
                short_circuited: true,
            });
        }

        // Phase C: full evaluation.
        let verdict = self.evaluate(state, &fingerprint, draft).await?;
        Ok(EditorReview {
            fingerprint,
            verdict,
            short_circuited: false,
        })
    }

    async fn extract_fingerprint(
        &self,
        state: &NarrativeState,
        scene_text: &str,
    ) -> Result<SceneFingerprint, LlmError> {
        let (system_prompt, user_prompt) = prompts::fingerprint(state, scene_text);
        let response = self
            .llm
            .generate_json(JsonRequest {
                system_prompt,
                user_prompt,
                schema: serde_json::to_value(schema_for!(SceneFingerprint))
                    .unwrap_or_default(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;
        Ok(decode::<SceneFingerprint>(&response)?.clamped())
    }

    async fn evaluate(
        &self,
        state: &NarrativeState,
        fingerprint: &SceneFingerprint,
        draft: &DraftScene,
    ) -> Result<EditorVerdict, LlmError> {
        let (system_prompt, user_prompt) = prompts::editor(state, fingerprint, &draft.text);
        let response = self
            .llm
            .generate_json(JsonRequest {
                system_prompt,
                user_prompt,
                schema: serde_json::to_value(schema_for!(EditorVerdict)).unwrap_or_default(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;
        let verdict = decode::<EditorVerdict>(&response)?;
        Ok(enforce_word_band(verdict, draft))
    }
}

/// Enforce the accepted-text word band: cut overlong text, regenerate
/// undersized text.
fn enforce_word_band(mut verdict: EditorVerdict, draft: &DraftScene) -> EditorVerdict {
    if !verdict.decision.is_acceptance() {
        return verdict;
    }
    let effective = verdict.edited_text.as_deref().unwrap_or(&draft.text);
    let words = word_count(effective);

    if words > MAX_ACCEPTED_WORDS {
        verdict.edited_text = Some(truncate_words(effective, MAX_ACCEPTED_WORDS as usize));
        return verdict;
    }
    if words < MIN_ACCEPTED_WORDS && verdict.decision != SceneDecision::Merge {
        return EditorVerdict::regenerate(
            format!("accepted text is {words} words, below the {MIN_ACCEPTED_WORDS}-word floor"),
            "expand the scene; accepted text must land between 900 and 1800 words",
        );
    }
    verdict
}
