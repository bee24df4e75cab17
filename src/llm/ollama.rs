//! Ollama `/api/generate` adapter.

use crate::config::LlmConfig;
use crate::error::{LiveError, Result};
use crate::llm::LanguageModelService;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Non-streaming client for an Ollama-compatible server.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            temperature: config.temperature,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LanguageModelService for OllamaClient {
    async fn generate_reply(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_tokens: u32,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "system": system_prompt,
            "stream": false,
            "options": {
                "num_predict": max_tokens,
                "temperature": self.temperature,
            },
        });

        debug!(%url, model = %self.model, "sending generate request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LiveError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LiveError::Llm(format!("server returned {status}: {detail}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LiveError::Llm(format!("invalid response body: {e}")))?;
        Ok(parsed.response.trim().to_owned())
    }
}
