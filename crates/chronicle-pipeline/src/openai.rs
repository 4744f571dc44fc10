//! OpenAI-compatible chat-completions client.
//!
//! Thin transport: one POST per call, fence-stripping plus a single parse
//! for JSON mode. Retry policy, timeouts beyond the client default, and
//! model routing live outside the engine.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::LlmEndpoint;
use crate::llm::{JsonRequest, JsonResponse, LlmClient, LlmError, TextRequest, TextResponse};

/// Client for any endpoint speaking the `/chat/completions` dialect.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(endpoint: &LlmEndpoint) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .expect("failed to build HTTP client"),
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
        }
    }

    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f64,
        json_mode: bool,
    ) -> Result<(String, u32, u32, u64), LlmError> {
        let start = Instant::now();

        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport(format!(
                "chat completion failed ({status}): {body}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let input_tokens = payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = payload["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(input_tokens, output_tokens, duration_ms, "chat completion");
        Ok((content, input_tokens, output_tokens, duration_ms))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse, LlmError> {
        let (content, input_tokens, output_tokens, duration_ms) = self
            .chat(
                &request.system_prompt,
                &request.user_prompt,
                request.max_tokens,
                request.temperature,
                false,
            )
            .await?;
        Ok(TextResponse {
            content,
            input_tokens,
            output_tokens,
            duration_ms,
        })
    }

    async fn generate_json(&self, request: JsonRequest) -> Result<JsonResponse, LlmError> {
        let system = format!(
            "{}\n\nRespond with a single JSON object satisfying this JSON Schema:\n{}",
            request.system_prompt, request.schema
        );
        let (content, input_tokens, output_tokens, duration_ms) = self
            .chat(
                &system,
                &request.user_prompt,
                request.max_tokens,
                request.temperature,
                true,
            )
            .await?;

        let stripped = strip_code_fences(&content);
        let value: serde_json::Value = serde_json::from_str(stripped)
            .map_err(|e| LlmError::SchemaFailure(format!("unparseable JSON: {e}")))?;

        Ok(JsonResponse {
            value,
            input_tokens,
            output_tokens,
            duration_ms,
        })
    }
}

/// Strip a leading/trailing markdown code fence, if present.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OpenAiClient::new(&LlmEndpoint {
            url: "http://localhost:8080/v1/".to_string(),
            api_key: "k".to_string(),
            model: "m".to_string(),
        });
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
