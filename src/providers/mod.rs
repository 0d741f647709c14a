//! Provider subsystem for completion backends.
//!
//! Each provider implements the [`Provider`] trait defined in [`traits`] and is
//! registered in the factory function [`create_provider`] by its canonical
//! string key.
//!
//! # Extension
//!
//! To add a new provider, implement [`Provider`] in a new submodule, register
//! it in [`create_provider`] and list it in [`list_providers`].

pub mod compatible;
pub mod gemini;
pub mod traits;

pub use compatible::OpenAiCompatibleProvider;
pub use gemini::GeminiProvider;
pub use traits::{ChatMessage, Provider, ProviderError};

use std::time::Duration;

const MAX_API_ERROR_CHARS: usize = 200;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from provider error strings.
///
/// Redacts OpenAI-style `sk-` keys and Google `AIza` API keys.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 2] = ["sk-", "AIza"];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{provider} API error ({status}): {sanitized}")
}

/// Values copied from `.env.example` that mean "not configured yet".
pub fn is_placeholder_credential(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || (value.starts_with("your_") && value.ends_with("_here"))
}

/// Environment variables consulted for `name`'s key, most specific first.
fn credential_env_candidates(name: &str) -> Vec<&'static str> {
    let mut candidates = match canonical_provider_name(name) {
        Some("gemini") => vec!["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        Some("openai") => vec!["OPENAI_API_KEY"],
        _ => vec![],
    };
    candidates.extend(["CHATRELAY_API_KEY", "API_KEY"]);
    candidates
}

/// The environment variable to suggest when `name` has no key.
pub fn credential_env_var(name: &str) -> &'static str {
    credential_env_candidates(name)
        .first()
        .copied()
        .unwrap_or("CHATRELAY_API_KEY")
}

/// Resolve API key for a provider from config and environment variables.
fn resolve_provider_credential(name: &str, credential_override: Option<&str>) -> Option<String> {
    resolve_credential_from(name, credential_override, |var| std::env::var(var).ok())
}

/// Credential resolution with an injectable variable lookup.
///
/// An explicit key wins. Otherwise only variables meant for this provider
/// (or the generic ones) are read, so a Gemini key is never sent to another
/// backend.
fn resolve_credential_from<F>(
    name: &str,
    credential_override: Option<&str>,
    lookup: F,
) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw_override) = credential_override {
        let trimmed_override = raw_override.trim();
        if !is_placeholder_credential(trimmed_override) {
            return Some(trimmed_override.to_owned());
        }
    }

    credential_env_candidates(name)
        .into_iter()
        .filter_map(|var| lookup(var))
        .map(|value| value.trim().to_string())
        .find(|value| !is_placeholder_credential(value))
}

/// Whether `name` will find an API key, from `api_key` or the environment.
pub fn has_provider_credential(name: &str, api_key: Option<&str>) -> bool {
    resolve_provider_credential(name, api_key).is_some()
}

/// Map a configured provider id or alias to its canonical id.
fn canonical_provider_name(name: &str) -> Option<&'static str> {
    let name = name.trim();
    if name.starts_with("custom:") {
        return Some("custom");
    }
    list_providers().into_iter().find_map(|p| {
        (p.name.eq_ignore_ascii_case(name) || p.aliases.iter().any(|a| a.eq_ignore_ascii_case(name)))
            .then_some(p.name)
    })
}

/// Factory: create the right provider from config.
///
/// `api_url` overrides the provider's default base URL.
pub fn create_provider(
    name: &str,
    api_key: Option<&str>,
    api_url: Option<&str>,
) -> anyhow::Result<Box<dyn Provider>> {
    let resolved_credential = resolve_provider_credential(name, api_key);
    let key = resolved_credential.as_deref();

    match canonical_provider_name(name) {
        Some("gemini") => Ok(Box::new(GeminiProvider::with_base_url(api_url, key))),
        Some("openai") => Ok(Box::new(OpenAiCompatibleProvider::new(
            "OpenAI",
            api_url.unwrap_or(OPENAI_BASE_URL),
            key,
        ))),
        Some("custom") => {
            let base_url = name.trim()["custom:".len()..].trim();
            if base_url.is_empty() {
                anyhow::bail!("Custom provider requires a URL, e.g. custom:http://localhost:11434/v1");
            }
            Ok(Box::new(OpenAiCompatibleProvider::new(
                "Custom",
                base_url,
                key,
            )))
        }
        _ => {
            let supported: Vec<&str> = list_providers().iter().map(|p| p.name).collect();
            anyhow::bail!(
                "Unknown provider: {name}. Supported: {}, custom:<URL>",
                supported.join(", ")
            )
        }
    }
}

/// Information about a supported provider for display purposes.
pub struct ProviderInfo {
    /// Canonical name used in config (e.g. `"gemini"`)
    pub name: &'static str,
    /// Human-readable display name
    pub display_name: &'static str,
    /// Alternative names accepted in config
    pub aliases: &'static [&'static str],
}

/// Return the list of all known providers.
pub fn list_providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            name: "gemini",
            display_name: "Google Gemini",
            aliases: &["google"],
        },
        ProviderInfo {
            name: "openai",
            display_name: "OpenAI",
            aliases: &[],
        },
    ]
}
