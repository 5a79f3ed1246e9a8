//! Ollama API adapter.
//!
//! Calls `POST {host}/api/generate` for completions and
//! `GET {host}/api/tags` for model discovery. Requests are synchronous
//! (`stream: false`); the generate deadline is generous because local
//! models can be slow to first token.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::CoreError;

use super::LlmBackend;

const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);
const TAGS_TIMEOUT: Duration = Duration::from_secs(5);

// ── Wire types ───────────────────────────────────────────

/// `/api/generate` request body.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// `/api/generate` response.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// `/api/tags` response.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

// ── Client ───────────────────────────────────────────────

/// Client for a local Ollama server.
pub struct OllamaClient {
    client: Client,
    host: String,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::new(),
            host: config.host.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, CoreError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        debug!("ollama: generate with {model} ({} chars)", prompt.len());

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .timeout(GENERATE_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(CoreError::backend)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::backend(format!(
                "ollama returned {status}: {body}"
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(CoreError::backend)?;
        if !parsed.done {
            debug!("ollama: response marked not done, returning partial text");
        }
        Ok(parsed.response)
    }

    async fn list_models(&self) -> Result<Vec<String>, CoreError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(TAGS_TIMEOUT)
            .send()
            .await
            .map_err(CoreError::backend)?;

        if !response.status().is_success() {
            return Err(CoreError::backend(format!(
                "ollama tags returned {}",
                response.status()
            )));
        }

        let parsed: TagsResponse = response.json().await.map_err(CoreError::backend)?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
