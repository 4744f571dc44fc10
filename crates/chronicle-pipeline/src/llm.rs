//! The LLM collaborator interface.
//!
//! Two operations: free text and schema-constrained JSON. Transport policy
//! (retries, timeouts, model selection) belongs to the implementation, not
//! to the engine; the engine only distinguishes transport failures (tick is
//! resumable) from schema failures (counted as a scene regeneration).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors surfaced across the LLM boundary.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Network-level failure. The tick fails but stays resumable.
    #[error("llm transport failure: {0}")]
    Transport(String),
    /// The model could not produce schema-valid output even after repair.
    #[error("llm schema failure: {0}")]
    SchemaFailure(String),
}

/// Request for free-form text.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Free-form text result with usage accounting.
#[derive(Debug, Clone)]
pub struct TextResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub duration_ms: u64,
}

/// Request for schema-constrained JSON.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// JSON Schema the output must satisfy.
    pub schema: serde_json::Value,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Parsed JSON result with usage accounting.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub value: serde_json::Value,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub duration_ms: u64,
}

/// The two-operation LLM contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse, LlmError>;

    /// JSON generation. Implementations own JSON repair and schema
    /// validation; repeated failure surfaces as [`LlmError::SchemaFailure`].
    async fn generate_json(&self, request: JsonRequest) -> Result<JsonResponse, LlmError>;
}

/// Deserialize a JSON response into a typed value.
pub fn decode<T: DeserializeOwned>(response: &JsonResponse) -> Result<T, LlmError> {
    serde_json::from_value(response.value.clone())
        .map_err(|e| LlmError::SchemaFailure(e.to_string()))
}

/// Deterministic scripted client for tests.
///
/// Responses are queued ahead of time and popped in call order; an empty
/// queue surfaces as a transport failure so a test that under-scripts
/// fails loudly instead of hanging.
#[derive(Default)]
pub struct MockLlm {
    text_queue: Mutex<VecDeque<Result<String, LlmError>>>,
    json_queue: Mutex<VecDeque<Result<serde_json::Value, LlmError>>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.text_queue
            .lock()
            .unwrap()
            .push_back(Ok(content.into()));
    }

    pub fn push_text_error(&self, error: LlmError) {
        self.text_queue.lock().unwrap().push_back(Err(error));
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.json_queue.lock().unwrap().push_back(Ok(value));
    }

    pub fn push_json_error(&self, error: LlmError) {
        self.json_queue.lock().unwrap().push_back(Err(error));
    }

    /// Queued responses not yet consumed.
    pub fn remaining(&self) -> (usize, usize) {
        (
            self.text_queue.lock().unwrap().len(),
            self.json_queue.lock().unwrap().len(),
        )
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate_text(&self, _request: TextRequest) -> Result<TextResponse, LlmError> {
        let next = self.text_queue.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(TextResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
                duration_ms: 0,
            }),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::Transport("mock text queue empty".to_string())),
        }
    }

    async fn generate_json(&self, _request: JsonRequest) -> Result<JsonResponse, LlmError> {
        let next = self.json_queue.lock().unwrap().pop_front();
        match next {
            Some(Ok(value)) => Ok(JsonResponse {
                value,
                input_tokens: 0,
                output_tokens: 0,
                duration_ms: 0,
            }),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::Transport("mock json queue empty".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_pops_in_order() {
        let mock = MockLlm::new();
        mock.push_text("first");
        mock.push_text("second");

        let req = TextRequest {
            system_prompt: String::new(),
            user_prompt: String::new(),
            max_tokens: 10,
            temperature: 0.0,
        };
        assert_eq!(mock.generate_text(req.clone()).await.unwrap().content, "first");
        assert_eq!(mock.generate_text(req).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_mock_empty_queue_is_transport_error() {
        let mock = MockLlm::new();
        let req = TextRequest {
            system_prompt: String::new(),
            user_prompt: String::new(),
            max_tokens: 10,
            temperature: 0.0,
        };
        assert!(matches!(
            mock.generate_text(req).await.unwrap_err(),
            LlmError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_decode_schema_failure() {
        let mock = MockLlm::new();
        mock.push_json(json!({"unexpected": true}));
        let req = JsonRequest {
            system_prompt: String::new(),
            user_prompt: String::new(),
            schema: json!({}),
            max_tokens: 10,
            temperature: 0.0,
        };
        let response = mock.generate_json(req).await.unwrap();

        #[derive(Debug, serde::Deserialize)]
        struct Strict {
            #[allow(dead_code)]
            required: String,
        }
        assert!(matches!(
            decode::<Strict>(&response).unwrap_err(),
            LlmError::SchemaFailure(_)
        ));
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let mock = MockLlm::new();
        mock.push_json_error(LlmError::SchemaFailure("still malformed".to_string()));
        let req = JsonRequest {
            system_prompt: String::new(),
            user_prompt: String::new(),
            schema: json!({}),
            max_tokens: 10,
            temperature: 0.0,
        };
        assert!(matches!(
            mock.generate_json(req).await.unwrap_err(),
            LlmError::SchemaFailure(_)
        ));
    }
}
