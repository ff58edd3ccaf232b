//! HTTP adapter implementing the inference client contract.
//!
//! One request per `complete` call; retries and backoff belong to the
//! caller's retry policy.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use heal_core::{InferenceClient, InferenceError};

use crate::error::{LlmError, LlmResult};
use crate::provider::{LlmProvider, LlmSettings};

const MAX_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// LLM adapter that handles API calls
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: Option<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl LlmAdapter {
    pub fn new(provider: LlmProvider, api_key: Option<String>, model: Option<String>) -> Self {
        Self {
            provider,
            api_key,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            base_url: provider.default_base_url().to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the adapter at a different endpoint (proxy, self-hosted Ollama).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_settings(settings: &LlmSettings) -> LlmResult<Self> {
        let provider = settings.resolve_provider()?;
        let api_key = settings.api_key(provider).map(str::to_string);
        if provider != LlmProvider::Ollama && api_key.is_none() {
            return Err(LlmError::NotConfigured);
        }

        let adapter = Self::new(provider, api_key, settings.model().map(str::to_string));
        Ok(match (provider, settings.ollama_url.as_deref()) {
            (LlmProvider::Ollama, Some(url)) if !url.trim().is_empty() => {
                adapter.with_base_url(url.trim())
            }
            _ => adapter,
        })
    }

    /// Create an LLM adapter from environment variables
    pub fn from_env() -> LlmResult<Self> {
        Self::from_settings(&LlmSettings::from_env())
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn send(&self, system: &str, user: &str, timeout: Duration) -> LlmResult<String> {
        debug!(
            provider = self.provider.as_str(),
            model = %self.model,
            prompt_chars = system.len() + user.len(),
            "Sending completion request"
        );
        match self.provider {
            LlmProvider::OpenAI => self.complete_openai(system, user, timeout).await,
            LlmProvider::Anthropic => self.complete_anthropic(system, user, timeout).await,
            LlmProvider::Ollama => self.complete_ollama(system, user, timeout).await,
        }
    }

    async fn complete_openai(&self, system: &str, user: &str, timeout: Duration) -> LlmResult<String> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::new("system", system), ChatMessage::new("user", user)],
            max_completion_tokens: Some(MAX_TOKENS),
        };
        let builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .json(&request);

        let response: OpenAIResponse = self.execute(builder, timeout).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in OpenAI response".into()))?;
        if let Some(usage) = response.usage {
            debug!(
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                "OpenAI usage"
            );
        }
        Ok(choice.message.content)
    }

    async fn complete_anthropic(
        &self,
        system: &str,
        user: &str,
        timeout: Duration,
    ) -> LlmResult<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: Some(system.to_string()).filter(|s| !s.is_empty()),
            messages: vec![ChatMessage::new("user", user)],
        };
        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request);

        let response: AnthropicResponse = self.execute(builder, timeout).await?;
        if let Some(usage) = &response.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Anthropic usage"
            );
        }
        let text: String = response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse(
                "no text content in Anthropic response".into(),
            ));
        }
        Ok(text)
    }

    async fn complete_ollama(&self, system: &str, user: &str, timeout: Duration) -> LlmResult<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::new("system", system), ChatMessage::new("user", user)],
            stream: false,
        };
        let builder = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request);

        let response: OllamaResponse = self.execute(builder, timeout).await?;
        Ok(response.message.content)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> LlmResult<T> {
        let response = builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                provider: self.provider.display_name().to_string(),
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;
        serde_json::from_str(&body)
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    fn transport_error(&self, err: reqwest::Error, timeout: Duration) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout(timeout)
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl InferenceClient for LlmAdapter {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, InferenceError> {
        self.send(system_prompt, user_prompt, timeout)
            .await
            .map_err(InferenceError::from)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max).collect();
        cut.push_str("...");
        cut
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: ResponseMessage,
}
