//! Google Gemini provider (`generateContent` REST API).

use crate::providers::traits::{ChatMessage, Provider, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl GeminiProvider {
    pub fn new(api_key: Option<&str>) -> Self {
        Self::with_base_url(None, api_key)
    }

    /// `base_url` is the versioned API root, e.g.
    /// `https://generativelanguage.googleapis.com/v1beta`.
    pub fn with_base_url(base_url: Option<&str>, api_key: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.map(ToString::to_string),
            client: super::build_http_client(),
        }
    }

    fn generate_content_url(&self, model: &str) -> String {
        let model = model.trim().trim_start_matches("models/");
        format!("{}/models/{model}:generateContent", self.base_url)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn text_content(role: &str, text: &str) -> Content {
    Content {
        role: Some(role.to_string()),
        parts: vec![Part {
            text: Some(text.to_string()),
        }],
    }
}

/// Map chat messages onto Gemini's `contents` + `systemInstruction`.
/// Gemini calls the assistant role `model`; system messages are merged.
fn build_request(messages: &[ChatMessage], temperature: f64) -> GenerateContentRequest {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect();

    let contents = messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| {
            let role = if m.role == "assistant" { "model" } else { "user" };
            text_content(role, &m.content)
        })
        .collect();

    GenerateContentRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(system.join("\n\n")),
            }],
        }),
        generation_config: GenerationConfig { temperature },
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ProviderError> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(ProviderError::Blocked {
            provider: "Gemini".into(),
            reason,
        });
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ProviderError::EmptyResponse {
            provider: "Gemini".into(),
        });
    };

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(match candidate.finish_reason {
            Some(reason) if reason != "STOP" => ProviderError::Blocked {
                provider: "Gemini".into(),
                reason,
            },
            _ => ProviderError::EmptyResponse {
                provider: "Gemini".into(),
            },
        });
    }

    Ok(text)
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn chat_with_history(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::MissingApiKey {
                provider: "Gemini".into(),
                env_var: super::credential_env_var("gemini"),
            })?;

        let request = build_request(messages, temperature);
        let response = self
            .client
            .post(self.generate_content_url(model))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::api_error("Gemini", response).await);
        }

        let body: GenerateContentResponse = response.json().await?;
        Ok(extract_text(body)?)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
