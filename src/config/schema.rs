use crate::providers::is_placeholder_credential;
use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Telegram rejects messages longer than this many characters.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Environment variable that relocates the config directory.
pub const CONFIG_DIR_ENV: &str = "CHATRELAY_CONFIG_DIR";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level chatrelay configuration, loaded from `config.toml`.
///
/// Resolution order: `CHATRELAY_CONFIG_DIR` env → `~/.chatrelay/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// API key for the selected provider. When unset, the provider's own
    /// variable (`GEMINI_API_KEY`, `OPENAI_API_KEY`) is used, then
    /// `CHATRELAY_API_KEY` or `API_KEY`.
    pub api_key: Option<String>,
    /// Base URL override for the provider API, including any version
    /// segment. Gemini requests go to `{api_url}/models/{model}:generateContent`
    /// (default `https://generativelanguage.googleapis.com/v1beta`); OpenAI
    /// requests go to `{api_url}/chat/completions`.
    pub api_url: Option<String>,
    /// Provider ID or alias (`"gemini"`, `"openai"`, `"custom:<url>"`). Default: `"gemini"`.
    pub default_provider: Option<String>,
    /// Model routed through the selected provider. Default: `"gemini-1.5-flash"`.
    pub default_model: Option<String>,
    /// Model temperature (0.0–2.0). Default: `0.7`.
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
    /// Optional system instruction sent with every completion request.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Bot presentation settings (`[bot]`).
    #[serde(default)]
    pub bot: BotConfig,

    /// Conversation history limits (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Telegram channel settings (`[telegram]`).
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_temperature() -> f64 {
    0.7
}

// ── Bot ──────────────────────────────────────────────────────────

/// Bot presentation configuration (`[bot]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BotConfig {
    /// Display name used in /start and /about. Default: `"Gemini Chat Bot"`.
    #[serde(default = "default_bot_name")]
    pub name: String,
    /// Replies longer than this are split into several messages. Default: `4096`.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

fn default_bot_name() -> String {
    "Gemini Chat Bot".into()
}

fn default_max_message_length() -> usize {
    TELEGRAM_MAX_MESSAGE_LENGTH
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            max_message_length: default_max_message_length(),
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────────

/// Conversation history configuration (`[sessions]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionsConfig {
    /// Maximum turns (user + assistant messages) retained per user. Default: `20`.
    #[serde(default = "default_max_history_length")]
    pub max_history_length: usize,
    /// Maximum users held in memory; the least recently active is dropped
    /// beyond this. `0` disables the cap. Default: `10000`.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_history_length() -> usize {
    20
}

fn default_max_sessions() -> usize {
    10_000
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_history_length: default_max_history_length(),
            max_sessions: default_max_sessions(),
        }
    }
}

// ── Telegram ─────────────────────────────────────────────────────

/// Telegram Bot API configuration (`[telegram]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TelegramConfig {
    /// Bot token from @BotFather. Overridden by `TELEGRAM_BOT_TOKEN`.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Usernames (without '@') or numeric user IDs allowed to talk to the
    /// bot. `"*"` allows everyone; an empty list allows nobody.
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,
    /// Long-poll timeout for `getUpdates`. Default: `30`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".into()]
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_users: default_allowed_users(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());

        Self {
            config_path: home.join(".chatrelay").join("config.toml"),
            api_key: None,
            api_url: None,
            default_provider: Some("gemini".to_string()),
            default_model: Some("gemini-1.5-flash".to_string()),
            default_temperature: default_temperature(),
            system_prompt: None,
            bot: BotConfig::default(),
            sessions: SessionsConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        let dir = dir.trim();
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".chatrelay"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Render a secret for display: first four characters, then `***`.
pub fn mask_secret(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => "(not set)".to_string(),
        Some(v) if is_placeholder_credential(v) => "(placeholder)".to_string(),
        Some(v) => {
            let prefix: String = v.chars().take(4).collect();
            format!("{prefix}***")
        }
    }
}

impl Config {
    /// Load `config.toml`, writing defaults on first run, then apply
    /// environment overrides and validate.
    ///
    /// `config_dir` wins over `CHATRELAY_CONFIG_DIR` and `~/.chatrelay`.
    pub async fn load_or_init(config_dir: Option<&Path>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_config_dir()?,
        };
        let mut config = Self::load_or_init_in(&config_dir).await?;
        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            provider = config.provider_name(),
            model = config.model_name(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Load (or create) `config.toml` inside `config_dir` without applying
    /// environment overrides.
    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        if config_path.exists() {
            // Warn if config file is world-readable (may contain API keys)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            Ok(config)
        } else {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;

            // Restrict permissions on newly created config file (may contain API keys)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }

            tracing::info!(path = %config.config_path.display(), "Created default config");
            Ok(config)
        }
    }

    pub fn provider_name(&self) -> &str {
        self.default_provider.as_deref().unwrap_or("gemini")
    }

    pub fn model_name(&self) -> &str {
        self.default_model.as_deref().unwrap_or("gemini-1.5-flash")
    }

    /// Telegram token, or `None` when unset or still the `.env.example` placeholder.
    pub fn telegram_token(&self) -> Option<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !is_placeholder_credential(token))
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            anyhow::bail!(
                "default_temperature must be between 0.0 and 2.0 (got {})",
                self.default_temperature
            );
        }
        if self.bot.name.trim().is_empty() {
            anyhow::bail!("bot.name must not be empty");
        }
        if self.bot.max_message_length == 0
            || self.bot.max_message_length > TELEGRAM_MAX_MESSAGE_LENGTH
        {
            anyhow::bail!(
                "bot.max_message_length must be between 1 and {TELEGRAM_MAX_MESSAGE_LENGTH}"
            );
        }
        if self.sessions.max_history_length == 0 {
            anyhow::bail!("sessions.max_history_length must be greater than 0");
        }
        if self.telegram.poll_timeout_secs == 0 {
            anyhow::bail!("telegram.poll_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides read through `lookup`, so callers can supply values
    /// from somewhere other than the process environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Telegram token: TELEGRAM_BOT_TOKEN or CHATRELAY_TELEGRAM_TOKEN
        if let Some(token) = non_empty(
            lookup("CHATRELAY_TELEGRAM_TOKEN").or_else(|| lookup("TELEGRAM_BOT_TOKEN")),
        ) {
            self.telegram.bot_token = Some(token);
        }

        // API keys stay out of `api_key`: providers read their own variables
        // so one provider's key is never sent to another.

        if let Some(provider) = non_empty(lookup("CHATRELAY_PROVIDER")) {
            self.default_provider = Some(provider);
        }

        if let Some(model) = non_empty(lookup("CHATRELAY_MODEL")) {
            self.default_model = Some(model);
        }

        if let Some(url) = non_empty(lookup("CHATRELAY_API_URL")) {
            self.api_url = Some(url);
        }

        if let Some(raw) = lookup("CHATRELAY_TEMPERATURE") {
            match raw.trim().parse::<f64>() {
                Ok(temp) if (0.0..=2.0).contains(&temp) => self.default_temperature = temp,
                _ => tracing::warn!(value = %raw, "Ignoring invalid CHATRELAY_TEMPERATURE"),
            }
        }

        if let Some(raw) = lookup("CHATRELAY_MAX_HISTORY") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.sessions.max_history_length = n,
                _ => tracing::warn!(value = %raw, "Ignoring invalid CHATRELAY_MAX_HISTORY"),
            }
        }

        if let Some(name) = non_empty(lookup("CHATRELAY_BOT_NAME")) {
            self.bot.name = name;
        }

        if let Some(raw) = lookup("CHATRELAY_ALLOW_ALL_USERS") {
            if parse_bool_flag(&raw) == Some(true) {
                self.telegram.allowed_users = vec!["*".into()];
            }
        }
    }

    /// Atomically write the config back to `config_path`.
    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await?;
        Ok(())
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::test;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── Defaults ─────────────────────────────────────────────

    #[test]
    async fn config_default_has_sane_values() {
        let c = Config::default();
        assert_eq!(c.provider_name(), "gemini");
        assert_eq!(c.model_name(), "gemini-1.5-flash");
        assert!((c.default_temperature - 0.7).abs() < f64::EPSILON);
        assert!(c.api_key.is_none());
        assert_eq!(c.bot.name, "Gemini Chat Bot");
        assert_eq!(c.bot.max_message_length, 4096);
        assert_eq!(c.sessions.max_history_length, 20);
        assert_eq!(c.telegram.allowed_users, vec!["*".to_string()]);
        assert!(c.config_path.to_string_lossy().contains("config.toml"));
        assert!(c.validate().is_ok());
    }

    #[test]
    async fn config_schema_export_contains_expected_shape() {
        let schema = schemars::schema_for!(Config);
        let schema_json = serde_json::to_value(&schema).expect("schema should serialize to json");

        let properties = schema_json
            .get("properties")
            .and_then(serde_json::Value::as_object)
            .expect("schema should expose top-level properties");

        assert!(properties.contains_key("default_provider"));
        assert!(properties.contains_key("sessions"));
        assert!(properties.contains_key("telegram"));
        assert!(!properties.contains_key("config_path"));
    }

    // ── Serde ────────────────────────────────────────────────

    #[test]
    async fn minimal_toml_fills_section_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[telegram]
bot_token = "123:ABC"
"#,
        )
        .unwrap();
        assert!((parsed.default_temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(parsed.telegram.bot_token.as_deref(), Some("123:ABC"));
        assert_eq!(parsed.telegram.poll_timeout_secs, 30);
        assert_eq!(parsed.telegram.allowed_users, vec!["*".to_string()]);
        assert_eq!(parsed.sessions.max_sessions, 10_000);
        assert!(parsed.default_provider.is_none());
        assert_eq!(parsed.provider_name(), "gemini");
    }

    #[test]
    async fn load_or_init_creates_then_reloads_config() {
        let tmp = tempfile::TempDir::new().unwrap();

        let created = Config::load_or_init_in(tmp.path()).await.unwrap();
        assert!(created.config_path.exists());
        assert_eq!(created.config_path, tmp.path().join("config.toml"));

        let mut edited = created.clone();
        edited.bot.name = "Relay".into();
        edited.sessions.max_history_length = 6;
        edited.telegram.allowed_users = vec!["alice".into(), "12345".into()];
        edited.save().await.unwrap();

        let reloaded = Config::load_or_init_in(tmp.path()).await.unwrap();
        assert_eq!(reloaded.bot.name, "Relay");
        assert_eq!(reloaded.sessions.max_history_length, 6);
        assert_eq!(reloaded.telegram.allowed_users, ["alice", "12345"]);
    }

    #[test]
    async fn explicit_config_dir_is_used() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("nested");
        let config = Config::load_or_init(Some(&dir)).await.unwrap();
        assert_eq!(config.config_path, dir.join("config.toml"));
        assert!(config.config_path.exists());
    }

    #[cfg(unix)]
    #[test]
    async fn new_config_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_init_in(tmp.path()).await.unwrap();
        let mode = std::fs::metadata(&config.config_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    async fn save_leaves_no_temp_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_init_in(tmp.path()).await.unwrap();
        config.save().await.unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["config.toml"]);
    }

    #[test]
    async fn malformed_config_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "default_temperature = [").unwrap();
        let err = Config::load_or_init_in(tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    // ── Env overrides ────────────────────────────────────────

    #[test]
    async fn overrides_set_token() {
        let mut c = Config::default();
        c.apply_overrides_from(lookup_from(&[("TELEGRAM_BOT_TOKEN", "123:ABC")]));
        assert_eq!(c.telegram.bot_token.as_deref(), Some("123:ABC"));

        c.apply_overrides_from(lookup_from(&[("CHATRELAY_TELEGRAM_TOKEN", "456:DEF")]));
        assert_eq!(c.telegram.bot_token.as_deref(), Some("456:DEF"));
    }

    #[test]
    async fn provider_keys_do_not_land_in_api_key() {
        let mut c = Config::default();
        c.apply_overrides_from(lookup_from(&[
            ("GEMINI_API_KEY", "AIza-google"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("CHATRELAY_API_KEY", "shared"),
            ("CHATRELAY_PROVIDER", "openai"),
        ]));
        assert!(c.api_key.is_none());
        assert_eq!(c.provider_name(), "openai");
    }

    #[test]
    async fn empty_overrides_are_ignored() {
        let mut c = Config::default();
        c.telegram.bot_token = Some("from-file".into());
        c.apply_overrides_from(lookup_from(&[("TELEGRAM_BOT_TOKEN", "   "), ("CHATRELAY_MODEL", "")]));
        assert_eq!(c.telegram.bot_token.as_deref(), Some("from-file"));
        assert_eq!(c.model_name(), "gemini-1.5-flash");
    }

    #[test]
    async fn overrides_provider_model_and_history() {
        let mut c = Config::default();
        c.apply_overrides_from(lookup_from(&[
            ("CHATRELAY_PROVIDER", "openai"),
            ("CHATRELAY_MODEL", "gpt-4o-mini"),
            ("CHATRELAY_MAX_HISTORY", "8"),
            ("CHATRELAY_BOT_NAME", "Relay"),
        ]));
        assert_eq!(c.provider_name(), "openai");
        assert_eq!(c.model_name(), "gpt-4o-mini");
        assert_eq!(c.sessions.max_history_length, 8);
        assert_eq!(c.bot.name, "Relay");
    }

    #[test]
    async fn temperature_override_is_range_checked() {
        let mut c = Config::default();
        c.apply_overrides_from(lookup_from(&[("CHATRELAY_TEMPERATURE", "1.2")]));
        assert!((c.default_temperature - 1.2).abs() < f64::EPSILON);

        c.apply_overrides_from(lookup_from(&[("CHATRELAY_TEMPERATURE", "3.5")]));
        assert!((c.default_temperature - 1.2).abs() < f64::EPSILON);

        c.apply_overrides_from(lookup_from(&[("CHATRELAY_TEMPERATURE", "hot")]));
        assert!((c.default_temperature - 1.2).abs() < f64::EPSILON);
    }

    #[test]
    async fn invalid_max_history_override_is_ignored() {
        let mut c = Config::default();
        c.apply_overrides_from(lookup_from(&[("CHATRELAY_MAX_HISTORY", "0")]));
        assert_eq!(c.sessions.max_history_length, 20);
    }

    // ── Validation ───────────────────────────────────────────

    #[test]
    async fn validate_rejects_bad_values() {
        let mut c = Config::default();
        c.default_temperature = 2.5;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.bot.max_message_length = 5000;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.bot.max_message_length = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.sessions.max_history_length = 0;
        let err = c.validate().unwrap_err().to_string();
        assert!(err.contains("max_history_length"));

        let mut c = Config::default();
        c.bot.name = "  ".into();
        assert!(c.validate().is_err());
    }

    #[test]
    async fn placeholder_token_reads_as_unset() {
        let mut c = Config::default();
        c.telegram.bot_token = Some("your_telegram_bot_token_here".into());
        assert!(c.telegram_token().is_none());

        c.telegram.bot_token = Some(" 123:ABC ".into());
        assert_eq!(c.telegram_token(), Some("123:ABC"));
    }

    #[test]
    async fn mask_secret_hides_most_of_the_value() {
        assert_eq!(mask_secret(None), "(not set)");
        assert_eq!(mask_secret(Some("your_gemini_api_key_here")), "(placeholder)");
        assert_eq!(mask_secret(Some("AIzaSyXYZ")), "AIza***");
    }
}
