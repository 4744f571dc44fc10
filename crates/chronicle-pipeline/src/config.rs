//! Pipeline configuration.
//!
//! Endpoint settings come from `CHRONICLE_*` environment variables with
//! workable defaults; book requests are loaded from TOML files.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use chronicle_engine::BookRequest;

/// An OpenAI-compatible inference endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmEndpoint {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub endpoint: LlmEndpoint,
    /// Sampling temperature for scene drafting.
    pub writer_temperature: f64,
    /// Sampling temperature for fingerprinting, editing, validation.
    pub editor_temperature: f64,
    /// Token budget for a scene draft.
    pub max_scene_tokens: u32,
    /// Token budget for schema-constrained calls.
    pub max_json_tokens: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: LlmEndpoint {
                url: std::env::var("CHRONICLE_LLM_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
                api_key: std::env::var("CHRONICLE_LLM_API_KEY")
                    .unwrap_or_else(|_| "not-needed".into()),
                model: std::env::var("CHRONICLE_LLM_MODEL")
                    .unwrap_or_else(|_| "chronicle-writer".into()),
            },
            writer_temperature: env_f64("CHRONICLE_WRITER_TEMPERATURE", 0.9),
            editor_temperature: env_f64("CHRONICLE_EDITOR_TEMPERATURE", 0.2),
            max_scene_tokens: 4_096,
            max_json_tokens: 2_048,
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Load a book request from a TOML file.
pub fn load_request(path: &Path) -> Result<BookRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading request file {}", path.display()))?;
    let request: BookRequest =
        toml::from_str(&raw).with_context(|| format!("parsing request file {}", path.display()))?;
    request
        .validate()
        .with_context(|| "invalid book request".to_string())?;
    Ok(request)
}
