//! Provider selection.

use std::fmt;
use std::str::FromStr;

use crate::error::LlmError;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Anthropic => "claude-sonnet-4-5",
            Self::Ollama => "codellama",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Ollama => DEFAULT_OLLAMA_URL,
        }
    }

    /// Display name used in error messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Ollama => "Ollama",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

/// Everything needed to pick and configure a provider.
///
/// Empty strings count as unset.
#[derive(Debug, Clone, Default)]
pub struct LlmSettings {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub ollama_url: Option<String>,
}

impl LlmSettings {
    /// Read settings from `HEAL_LLM_PROVIDER`, `HEAL_LLM_MODEL`,
    /// `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and `OLLAMA_URL`.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        Self {
            provider: var("HEAL_LLM_PROVIDER"),
            model: var("HEAL_LLM_MODEL"),
            openai_api_key: var("OPENAI_API_KEY"),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            ollama_url: var("OLLAMA_URL"),
        }
    }

    /// The provider to use: the explicit choice, otherwise the first one
    /// with credentials in the order OpenAI, Anthropic, Ollama.
    pub fn resolve_provider(&self) -> Result<LlmProvider, LlmError> {
        if let Some(name) = non_empty(&self.provider) {
            return name.parse();
        }
        if non_empty(&self.openai_api_key).is_some() {
            Ok(LlmProvider::OpenAI)
        } else if non_empty(&self.anthropic_api_key).is_some() {
            Ok(LlmProvider::Anthropic)
        } else if non_empty(&self.ollama_url).is_some() {
            Ok(LlmProvider::Ollama)
        } else {
            Err(LlmError::NotConfigured)
        }
    }

    /// API key for `provider`; Ollama needs none.
    pub fn api_key(&self, provider: LlmProvider) -> Option<&str> {
        match provider {
            LlmProvider::OpenAI => non_empty(&self.openai_api_key),
            LlmProvider::Anthropic => non_empty(&self.anthropic_api_key),
            LlmProvider::Ollama => None,
        }
    }

    pub fn model(&self) -> Option<&str> {
        non_empty(&self.model)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
