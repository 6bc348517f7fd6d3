//! Chat-completion capability.
//!
//! [`ChatModel`] takes an ordered message list and returns the assistant's
//! reply. Providers: `disabled`, `openai` (`/chat/completions`), and
//! `ollama` (`/api/chat`, non-streaming). Transport and model failures come
//! back as [`RagError::Generation`]; turning them into user-facing text is
//! the HTTP layer's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::models::ChatMessage;
use crate::remote::{post_json, JsonEndpoint};

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Always fails. Used when `generation.provider = "disabled"`.
pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(RagError::Generation("generation provider is disabled".into()))
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect()
}

// ============ OpenAI ============

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

/// OpenAI-compatible chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAIChatModel {
    model: String,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAIChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::Generation("OPENAI_API_KEY environment variable not set".into())
        })?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let endpoint = JsonEndpoint {
            label: "OpenAI",
            url: format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
            bearer: Some(self.api_key.clone()),
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        };
        let request = OpenAIRequest {
            model: &self.model,
            messages: wire_messages(messages),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| RagError::Generation(format!("encoding request: {}", e)))?;
        let raw = post_json(&endpoint, &body)
            .await
            .map_err(RagError::Generation)?;
        let response: OpenAIResponse = serde_json::from_value(raw)
            .map_err(|e| RagError::Generation(format!("invalid OpenAI response: {}", e)))?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::Generation("OpenAI response had no content".into()))
    }
}

// ============ Ollama ============

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Debug, Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

/// Ollama `/api/chat`, default URL `http://localhost:11434`.
pub struct OllamaChatModel {
    model: String,
    url: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OllamaChatModel {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let endpoint = JsonEndpoint {
            label: "Ollama",
            url: format!("{}/api/chat", self.url.trim_end_matches('/')),
            bearer: None,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        };
        let request = OllamaRequest {
            model: &self.model,
            messages: wire_messages(messages),
            stream: false,
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| RagError::Generation(format!("encoding request: {}", e)))?;
        let raw = post_json(&endpoint, &body)
            .await
            .map_err(RagError::Generation)?;
        let response: OllamaResponse = serde_json::from_value(raw)
            .map_err(|e| RagError::Generation(format!("invalid Ollama response: {}", e)))?;
        Ok(response.message.content)
    }
}

/// Create the [`ChatModel`] named by `config.provider`.
pub fn create_chat_model(config: &GenerationConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChatModel::new(config))),
        other => Err(RagError::Generation(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}
