use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sessions::{Role, Turn};

/// A message sent to a completion endpoint.
///
/// `role` is one of `"system"`, `"user"` or `"assistant"`; providers map it
/// onto their own wire vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        match turn.role {
            Role::User => Self::user(turn.text.clone()),
            Role::Assistant => Self::assistant(turn.text.clone()),
        }
    }
}

/// Failures a provider reports in a structured way. Transport and HTTP
/// status failures travel as plain `anyhow` errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} API key not set. Set {env_var} (or api_key in config.toml).")]
    MissingApiKey {
        provider: String,
        env_var: &'static str,
    },
    #[error("{provider} blocked the prompt: {reason}")]
    Blocked { provider: String, reason: String },
    #[error("No response from {provider}")]
    EmptyResponse { provider: String },
}

/// A generative-AI completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send an ordered conversation and return the assistant's reply text.
    async fn chat_with_history(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String>;

    /// Single-shot convenience wrapper around [`Provider::chat_with_history`].
    async fn chat_with_system(
        &self,
        system_prompt: Option<&str>,
        message: &str,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = system_prompt {
            messages.push(ChatMessage::system(sys));
        }
        messages.push(ChatMessage::user(message));
        self.chat_with_history(&messages, model, temperature).await
    }

    /// Provider identifier used in logs.
    fn name(&self) -> &str;
}
