//! Writer stage — drafts raw scene prose.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use chronicle_engine::state::NarrativeState;
use chronicle_engine::text::word_count;

use crate::llm::{LlmClient, LlmError, TextRequest};
use crate::prompts;

/// Minimum words for a usable draft; shorter drafts are discarded.
pub const MIN_DRAFT_WORDS: u64 = 1_200;
/// The band's upper edge; the editor cuts overlong drafts.
pub const MAX_DRAFT_WORDS: u64 = 2_500;

/// A parsed scene draft.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftScene {
    pub title: String,
    pub pov: String,
    pub text: String,
    pub word_count: u64,
}

/// What the writer produced.
#[derive(Debug, Clone, PartialEq)]
pub enum WriterOutcome {
    Draft(DraftScene),
    /// Draft below the floor; the orchestrator re-briefs with a "too
    /// short" annotation.
    TooShort { words: u64 },
}

/// Drafts scenes from state plus a brief. Stateless between calls.
pub struct WriterStage {
    llm: Arc<dyn LlmClient>,
    temperature: f64,
    max_tokens: u32,
}

impl WriterStage {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f64, max_tokens: u32) -> Self {
        Self {
            llm,
            temperature,
            max_tokens,
        }
    }

    /// Draft one scene.
    pub async fn draft(
        &self,
        state: &NarrativeState,
        brief: &str,
        constraints: &[String],
    ) -> Result<WriterOutcome, LlmError> {
        let (system_prompt, user_prompt) = prompts::writer(state, brief, constraints);
        let response = self
            .llm
            .generate_text(TextRequest {
                system_prompt,
                user_prompt,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;

        let draft = parse_draft(&response.content, &state.request.protagonist_name);
        if draft.word_count < MIN_DRAFT_WORDS {
            debug!(words = draft.word_count, "draft below floor");
            return Ok(WriterOutcome::TooShort {
                words: draft.word_count,
            });
        }
        Ok(WriterOutcome::Draft(draft))
    }
}

/// Parse the `TITLE:` / `POV:` header the writer is asked to emit. A
/// missing header falls back to an untitled scene in the protagonist's POV.
fn parse_draft(content: &str, default_pov: &str) -> DraftScene {
    let title_re = Regex::new(r"(?m)^TITLE:\s*(.+)$").expect("static regex");
    let pov_re = Regex::new(r"(?m)^POV:\s*(.+)$").expect("static regex");

    let title = title_re
        .captures(content)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| "Untitled".to_string());
    let pov = pov_re
        .captures(content)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| default_pov.to_string());

    let mut text = content.to_string();
    for re in [&title_re, &pov_re] {
        text = re.replace(&text, "").to_string();
    }
    let text = text.trim().to_string();

    DraftScene {
        title,
        pov,
        word_count: word_count(&text),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use chronicle_engine::BookRequest;

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

    fn scene_body(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_parse_draft_header() {
        let content = format!(
            "TITLE: The Cold Lamp\nPOV: Mara\n\n{}",
            scene_body(10)
        );
        let draft = parse_draft(&content, "Mara");
        assert_eq!(draft.title, "The Cold Lamp");
        assert_eq!(draft.pov, "Mara");
        assert_eq!(draft.word_count, 10);
        assert!(!draft.text.contains("TITLE:"));
    }

    #[test]
    fn test_parse_draft_missing_header_falls_back() {
        let draft = parse_draft(&scene_body(5), "Mara");
        assert_eq!(draft.title, "Untitled");
        assert_eq!(draft.pov, "Mara");
        assert_eq!(draft.word_count, 5);
    }

    #[tokio::test]
    async fn test_draft_accepts_long_enough_scene() {
        let mock = Arc::new(MockLlm::new());
        mock.push_text(format!(
            "TITLE: Arrival\nPOV: Mara\n\n{}",
            scene_body(1_400)
        ));
        let stage = WriterStage::new(mock, 0.9, 4_096);
        let outcome = stage.draft(&state(), "open on the lamp room", &[]).await.unwrap();
        match outcome {
            WriterOutcome::Draft(draft) => {
                assert_eq!(draft.title, "Arrival");
                assert_eq!(draft.word_count, 1_400);
            }
            WriterOutcome::TooShort { .. } => panic!("expected a draft"),
        }
    }

    #[tokio::test]
    async fn test_draft_too_short() {
        let mock = Arc::new(MockLlm::new());
        mock.push_text(format!("TITLE: Stub\nPOV: Mara\n\n{}", scene_body(300)));
        let stage = WriterStage::new(mock, 0.9, 4_096);
        let outcome = stage.draft(&state(), "brief", &[]).await.unwrap();
        assert_eq!(outcome, WriterOutcome::TooShort { words: 300 });
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mock = Arc::new(MockLlm::new());
        mock.push_text_error(LlmError::Transport("connection reset".to_string()));
        let stage = WriterStage::new(mock, 0.9, 4_096);
        let err = stage.draft(&state(), "brief", &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }
}
