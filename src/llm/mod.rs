//! Language model collaborator used for generative comment replies.
//!
//! The dispatcher only depends on [`LanguageModelService`]; [`OllamaClient`]
//! is the HTTP adapter used by the binary.

pub mod ollama;

pub use ollama::OllamaClient;

use crate::error::Result;
use async_trait::async_trait;

/// Produces reply text for a prompt. May fail or time out.
#[async_trait]
pub trait LanguageModelService: Send + Sync {
    async fn generate_reply(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_tokens: u32,
    ) -> Result<String>;
}
