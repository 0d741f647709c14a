#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::float_cmp,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    dead_code
)]

use anyhow::{bail, Context, Result};
use chatrelay::auto_reply::{create_dispatcher, ChatSettings, Dispatcher};
use chatrelay::channels::{run_message_loop, Channel, TelegramChannel, TerminalChannel};
use chatrelay::config::mask_secret;
use chatrelay::providers::{self, Provider};
use chatrelay::sessions::create_session_store;
use chatrelay::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn parse_temperature(s: &str) -> std::result::Result<f64, String> {
    let t: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=2.0).contains(&t) {
        return Err("temperature must be between 0.0 and 2.0".to_string());
    }
    Ok(t)
}

/// `chatrelay` - a Telegram chat bot backed by Gemini, with per-user memory.
#[derive(Parser, Debug)]
#[command(name = "chatrelay")]
#[command(version)]
#[command(about = "Telegram chat bot for Gemini and OpenAI-compatible models.", long_about = None)]
struct Cli {
    /// Directory holding config.toml (default: ~/.chatrelay)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Per-run overrides for the completion settings in config.toml.
#[derive(clap::Args, Debug, Clone, Default)]
struct ModelArgs {
    /// Provider to use (gemini, openai, custom:<URL>)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use
    #[arg(long)]
    model: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[arg(short, long, value_parser = parse_temperature)]
    temperature: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Telegram bot
    #[command(long_about = "\
Run the Telegram bot.

Long-polls the Telegram Bot API and answers every allowed user with \
the configured model, keeping a bounded history per user. Requires \
TELEGRAM_BOT_TOKEN and a provider API key (GEMINI_API_KEY by default). \
Stop with Ctrl-C.

Examples:
  chatrelay run
  chatrelay run --model gemini-1.5-pro
  chatrelay run -p openai --model gpt-4o-mini")]
    Run {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Chat with the bot in this terminal
    #[command(long_about = "\
Chat with the bot in this terminal.

Uses the same commands and history handling as the Telegram bot. \
Type /help for commands and /quit to exit.

Examples:
  chatrelay chat
  chatrelay chat -t 0.2")]
    Chat {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Check the token, API key and Telegram connectivity
    #[command(long_about = "\
Check the bot configuration.

Verifies that the Telegram token and provider API key are set (and \
not the .env.example placeholders), that the provider can be built \
and that Telegram accepts the token. With --live, also sends one \
test prompt to the model.

Examples:
  chatrelay doctor
  chatrelay doctor --live")]
    Doctor {
        /// Also send a test prompt to the provider
        #[arg(long)]
        live: bool,
    },

    /// Show the effective configuration (secrets masked)
    Status,

    /// List supported AI providers
    Providers,

    /// Manage configuration
    #[command(long_about = "\
Manage chatrelay configuration.

Use 'schema' to dump the full JSON Schema for the config file, \
which documents every available key, type, and default value.

Examples:
  chatrelay config schema              # print JSON Schema to stdout
  chatrelay config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Values from .env act like exported variables; real env wins.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli
        .config_dir
        .as_ref()
        .is_some_and(|dir| dir.as_os_str().to_string_lossy().trim().is_empty())
    {
        bail!("--config-dir cannot be empty");
    }

    // Terminal chat keeps the screen for the conversation unless RUST_LOG asks otherwise.
    let default_level = if matches!(cli.command, Commands::Chat { .. }) {
        "warn"
    } else {
        "info"
    };
    let subscriber = fmt::Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config_dir = cli.config_dir.as_deref();

    match cli.command {
        Commands::Config {
            config_command: ConfigCommands::Schema,
        } => print_config_schema(),

        Commands::Run { model } => {
            let config = Config::load_or_init(config_dir).await?;
            run_telegram(with_model_args(config, &model)?).await
        }

        Commands::Chat { model } => {
            let config = Config::load_or_init(config_dir).await?;
            run_terminal(with_model_args(config, &model)?).await
        }

        Commands::Doctor { live } => doctor(&Config::load_or_init(config_dir).await?, live).await,

        Commands::Status => {
            print_status(&Config::load_or_init(config_dir).await?);
            Ok(())
        }

        Commands::Providers => {
            print_providers(&Config::load_or_init(config_dir).await?);
            Ok(())
        }
    }
}

fn print_config_schema() -> Result<()> {
    let schema = schemars::schema_for!(Config);
    println!(
        "{}",
        serde_json::to_string_pretty(&schema).context("failed to serialize JSON Schema")?
    );
    Ok(())
}

fn print_providers(config: &Config) {
    let providers = providers::list_providers();
    let current = config.provider_name().trim().to_ascii_lowercase();
    println!("Supported providers ({} total):\n", providers.len());
    println!("  ID (use in config)  DESCRIPTION");
    println!("  ─────────────────── ───────────");
    for p in &providers {
        let is_active = p.name.eq_ignore_ascii_case(&current)
            || p.aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(&current));
        let marker = if is_active { " (active)" } else { "" };
        let aliases = if p.aliases.is_empty() {
            String::new()
        } else {
            format!("  (aliases: {})", p.aliases.join(", "))
        };
        println!("  {:<19} {}{}{}", p.name, p.display_name, marker, aliases);
    }
    println!("\n  custom:<URL>        Any OpenAI-compatible endpoint");
}

fn with_model_args(mut config: Config, args: &ModelArgs) -> Result<Config> {
    if let Some(provider) = &args.provider {
        config.default_provider = Some(provider.clone());
    }
    if let Some(model) = &args.model {
        config.default_model = Some(model.clone());
    }
    if let Some(temperature) = args.temperature {
        config.default_temperature = temperature;
    }
    config.validate()?;
    Ok(config)
}

fn build_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let name = config.provider_name();
    if !providers::has_provider_credential(name, config.api_key.as_deref()) {
        bail!(
            "No API key for provider '{name}'. Set {} in .env or the environment, \
             or api_key in {}",
            providers::credential_env_var(name),
            config.config_path.display()
        );
    }
    let provider = providers::create_provider(
        name,
        config.api_key.as_deref(),
        config.api_url.as_deref(),
    )?;
    Ok(Arc::from(provider))
}

fn build_dispatcher(config: &Config) -> Result<Arc<dyn Dispatcher>> {
    let provider = build_provider(config)?;
    let store = create_session_store(&config.sessions);
    info!(
        store = store.name(),
        max_history = config.sessions.max_history_length,
        max_sessions = config.sessions.max_sessions,
        "Session store ready"
    );

    Ok(create_dispatcher(
        store,
        provider,
        ChatSettings {
            bot_name: config.bot.name.clone(),
            model: config.model_name().to_string(),
            temperature: config.default_temperature,
            system_prompt: config.system_prompt.clone(),
        },
    ))
}

async fn run_telegram(config: Config) -> Result<()> {
    let Some(token) = config.telegram_token() else {
        bail!(
            "Telegram bot token not set. Set TELEGRAM_BOT_TOKEN in .env or the environment, \
             or telegram.bot_token in {}",
            config.config_path.display()
        );
    };

    let dispatcher = build_dispatcher(&config)?;
    let telegram = TelegramChannel::with_options(
        token.to_string(),
        config.telegram.allowed_users.clone(),
        chatrelay::channels::telegram::TELEGRAM_API_BASE,
        config.telegram.poll_timeout_secs,
    );

    match telegram.get_me().await {
        Ok(username) => info!("🚀 Starting {} as @{username}", config.bot.name),
        Err(e) => tracing::warn!("Telegram getMe failed, check the bot token: {e}"),
    }
    info!(
        provider = config.provider_name(),
        model = config.model_name(),
        "Listening for Telegram messages (Ctrl-C to stop)"
    );

    let channel: Arc<dyn Channel> = Arc::new(telegram);
    tokio::select! {
        result = run_message_loop(channel, dispatcher, config.bot.max_message_length) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

async fn run_terminal(config: Config) -> Result<()> {
    let dispatcher = build_dispatcher(&config)?;
    let terminal = TerminalChannel::new();
    terminal.print_banner(&config.bot.name)?;

    let channel: Arc<dyn Channel> = Arc::new(terminal);
    tokio::select! {
        result = run_message_loop(channel, dispatcher, config.bot.max_message_length) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\n👋 Chat stopped by user");
            Ok(())
        }
    }
}

fn check(label: &str, ok: bool, detail: &str) -> bool {
    let mark = if ok { "✅" } else { "❌" };
    println!("  {mark} {label:<18} {detail}");
    ok
}

async fn doctor(config: &Config, live: bool) -> Result<()> {
    println!("🩺 chatrelay doctor");
    println!();
    println!("Config: {}", config.config_path.display());
    println!();

    let mut healthy = true;

    let token = config.telegram_token();
    healthy &= check(
        "Telegram token",
        token.is_some(),
        &mask_secret(config.telegram.bot_token.as_deref()),
    );

    let has_key =
        providers::has_provider_credential(config.provider_name(), config.api_key.as_deref());
    let key_detail = if has_key {
        "found".to_string()
    } else {
        format!(
            "missing (set {})",
            providers::credential_env_var(config.provider_name())
        )
    };
    healthy &= check("API key", has_key, &key_detail);

    let provider = match build_provider(config) {
        Ok(p) => {
            check("Provider", true, config.provider_name());
            Some(p)
        }
        Err(e) => {
            healthy &= check("Provider", false, &e.to_string());
            None
        }
    };

    if let Some(token) = token {
        let telegram = TelegramChannel::with_options(
            token.to_string(),
            config.telegram.allowed_users.clone(),
            chatrelay::channels::telegram::TELEGRAM_API_BASE,
            config.telegram.poll_timeout_secs,
        );
        match telegram.get_me().await {
            Ok(username) => {
                check("Telegram API", true, &format!("@{username}"));
            }
            Err(e) => healthy &= check("Telegram API", false, &e.to_string()),
        }
    }

    if live {
        if let Some(provider) = provider {
            match provider
                .chat_with_system(
                    None,
                    "Hello! Please respond with a short greeting.",
                    config.model_name(),
                    config.default_temperature,
                )
                .await
            {
                Ok(reply) => {
                    let preview: String = reply.chars().take(60).collect();
                    check("Model reply", true, preview.trim());
                }
                Err(e) => healthy &= check("Model reply", false, &format!("{e:#}")),
            }
        }
    }

    if config.telegram.allowed_users.is_empty() {
        println!();
        println!("  ⚠️  telegram.allowed_users is empty: the bot will ignore everyone.");
    }

    println!();
    if healthy {
        println!("🎉 All checks passed.");
        Ok(())
    } else {
        bail!("Some checks failed; see above.")
    }
}

fn print_status(config: &Config) {
    println!("🤖 chatrelay Status");
    println!();
    println!("Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("Config:      {}", config.config_path.display());
    println!();
    println!("Bot:         {}", config.bot.name);
    println!("Provider:    {}", config.provider_name());
    println!("   Model:       {}", config.model_name());
    println!("   Temperature: {}", config.default_temperature);
    println!(
        "   API URL:     {}",
        config.api_url.as_deref().unwrap_or("(default)")
    );
    let api_key = if config.api_key.is_some() {
        mask_secret(config.api_key.as_deref())
    } else if providers::has_provider_credential(config.provider_name(), None) {
        format!(
            "(from {} or a generic key variable)",
            providers::credential_env_var(config.provider_name())
        )
    } else {
        "(not set)".to_string()
    };
    println!("   API key:     {api_key}");
    println!(
        "   System prompt: {}",
        if config.system_prompt.is_some() {
            "set"
        } else {
            "(none)"
        }
    );
    println!();
    println!("Sessions:");
    println!(
        "  Max history:   {} turns",
        config.sessions.max_history_length
    );
    println!(
        "  Max sessions:  {}",
        if config.sessions.max_sessions == 0 {
            "unbounded".to_string()
        } else {
            config.sessions.max_sessions.to_string()
        }
    );
    println!();
    println!("Telegram:");
    println!(
        "  Bot token:     {}",
        mask_secret(config.telegram.bot_token.as_deref())
    );
    println!(
        "  Allowed users: {}",
        if config.telegram.allowed_users.is_empty() {
            "(none)".to_string()
        } else {
            config.telegram.allowed_users.join(", ")
        }
    );
    println!("  Poll timeout:  {}s", config.telegram.poll_timeout_secs);
    println!("  Max message:   {} chars", config.bot.max_message_length);
}
