//! # heal_llm
//!
//! Inference clients for heal: OpenAI chat completions, Anthropic messages
//! and Ollama chat, behind the [`heal_core::InferenceClient`] contract.
//!
//! ```rust,ignore
//! let adapter = heal_llm::LlmAdapter::from_env()?;
//! let text = adapter.complete(system, user, Duration::from_secs(120)).await?;
//! ```

pub mod adapter;
pub mod error;
pub mod provider;

pub use adapter::LlmAdapter;
pub use error::{LlmError, LlmResult};
pub use provider::{LlmProvider, LlmSettings, DEFAULT_OLLAMA_URL};
