use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;

use super::traits::{CommandContext, CommandResult, SlashCommandHandler};
use crate::channels::InlineButton;
use crate::sessions::{Role, SessionStore, SessionSummary};

/// Longest preview of one turn shown by `/history`.
const HISTORY_PREVIEW_CHARS: usize = 50;

pub const CALLBACK_START_CHAT: &str = "start_chat";
pub const CALLBACK_HELP: &str = "help";
pub const CALLBACK_ABOUT: &str = "about";

/// `/start`: greeting plus the main-menu keyboard.
pub struct StartCommand {
    bot_name: String,
}

impl StartCommand {
    pub fn new(bot_name: &str) -> Self {
        Self {
            bot_name: bot_name.to_string(),
        }
    }
}

#[async_trait]
impl SlashCommandHandler for StartCommand {
    fn command(&self) -> &str {
        "/start"
    }

    fn description(&self) -> &str {
        "Welcome message and main menu"
    }

    async fn execute(&self, _args: &str, context: &CommandContext) -> Result<CommandResult> {
        let name = context.sender_name.as_deref().unwrap_or("there");
        let output = format!(
            "🤖 Welcome to {}, {name}!\n\n\
             I'm ready to chat with you about anything. Just send me a message.\n\n\
             💡 *Available Commands:*\n\
             • `/help` - Show help information\n\
             • `/clear` - Clear conversation history\n\
             • `/history` - View conversation summary\n\
             • `/about` - About this bot\n\n\
             Start chatting now! 🚀",
            self.bot_name
        );
        Ok(CommandResult {
            output,
            keyboard: vec![
                InlineButton::new("💬 Start Chatting", CALLBACK_START_CHAT),
                InlineButton::new("❓ Help", CALLBACK_HELP),
                InlineButton::new("ℹ️ About", CALLBACK_ABOUT),
            ],
        })
    }
}

/// `/help`: lists the registered commands.
pub struct HelpCommand {
    available_commands: Vec<(String, String)>,
}

impl HelpCommand {
    pub fn new(available_commands: Vec<(String, String)>) -> Self {
        Self { available_commands }
    }
}

#[async_trait]
impl SlashCommandHandler for HelpCommand {
    fn command(&self) -> &str {
        "/help"
    }

    fn description(&self) -> &str {
        "Show available commands"
    }

    async fn execute(&self, _args: &str, _context: &CommandContext) -> Result<CommandResult> {
        let mut lines = vec![
            "🤖 *Bot Commands:*".to_string(),
            String::new(),
            "• Just send any message to chat with me".to_string(),
        ];
        for (cmd, desc) in &self.available_commands {
            lines.push(format!("• `{cmd}` - {desc}"));
        }
        lines.push(String::new());
        lines.push("💡 I remember our recent messages. Use `/clear` to start fresh.".to_string());
        Ok(CommandResult::text(lines.join("\n")))
    }
}

/// `/clear`: drops the caller's history.
pub struct ClearCommand {
    store: Arc<dyn SessionStore>,
}

impl ClearCommand {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SlashCommandHandler for ClearCommand {
    fn command(&self) -> &str {
        "/clear"
    }

    fn description(&self) -> &str {
        "Clear conversation history"
    }

    async fn execute(&self, _args: &str, context: &CommandContext) -> Result<CommandResult> {
        self.store.clear(&context.sender).await;
        tracing::info!(user_id = %context.sender, channel = %context.channel, "History cleared");
        Ok(CommandResult::text(
            "🧹 Conversation history cleared! We're starting fresh. 😊",
        ))
    }
}

/// `/history`: turn count plus previews of the latest turns.
pub struct HistoryCommand {
    store: Arc<dyn SessionStore>,
}

impl HistoryCommand {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SlashCommandHandler for HistoryCommand {
    fn command(&self) -> &str {
        "/history"
    }

    fn description(&self) -> &str {
        "View conversation summary"
    }

    async fn execute(&self, _args: &str, context: &CommandContext) -> Result<CommandResult> {
        let summary = self.store.summarize(&context.sender).await;
        Ok(CommandResult::text(format!(
            "📚 *Conversation History:*\n\n{}",
            render_summary(&summary)
        )))
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > HISTORY_PREVIEW_CHARS {
        let head: String = text.chars().take(HISTORY_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Human-readable rendering of a session summary.
pub fn render_summary(summary: &SessionSummary) -> String {
    if summary.is_empty() {
        return "No conversation history.".to_string();
    }

    let mut out = format!("Conversation has {} messages:\n", summary.turn_count);
    for (i, turn) in summary.recent.iter().enumerate() {
        let who = match turn.role {
            Role::User => "You",
            Role::Assistant => "Bot",
        };
        let _ = writeln!(out, "{}. {who}: {}", i + 1, preview(&turn.text));
    }
    out
}

/// `/about`: bot name and model.
pub struct AboutCommand {
    bot_name: String,
    model: String,
}

impl AboutCommand {
    pub fn new(bot_name: &str, model: &str) -> Self {
        Self {
            bot_name: bot_name.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl SlashCommandHandler for AboutCommand {
    fn command(&self) -> &str {
        "/about"
    }

    fn description(&self) -> &str {
        "About this bot"
    }

    async fn execute(&self, _args: &str, _context: &CommandContext) -> Result<CommandResult> {
        Ok(CommandResult::text(about_text(&self.bot_name, &self.model)))
    }
}

pub(crate) fn about_text(bot_name: &str, model: &str) -> String {
    format!(
        "🤖 *About This Bot*\n\n\
         *Name:* {bot_name}\n\
         *AI Model:* {model}\n\n\
         *Features:*\n\
         • Context-aware conversations\n\
         • Multi-user support\n\
         • Conversation history management"
    )
}

/// Text that replaces the menu message when one of its buttons is pressed.
pub fn callback_text(data: &str, bot_name: &str, model: &str) -> Option<String> {
    match data {
        CALLBACK_START_CHAT => Some(
            "💬 Great! Just send me a message and I'll respond. What would you like to chat about?"
                .to_string(),
        ),
        CALLBACK_HELP => Some(
            "🤖 *Bot Commands:*\n\n\
             • Send any message to chat\n\
             • `/help` - Show help\n\
             • `/clear` - Clear history\n\
             • `/history` - View history\n\
             • `/about` - About bot"
                .to_string(),
        ),
        CALLBACK_ABOUT => Some(format!(
            "🤖 *About {bot_name}*\n\nPowered by {model}\nFeatures: AI chat, context awareness, multi-user support"
        )),
        _ => None,
    }
}

/// The standard command set, with `/help` listing all of them.
pub fn default_commands(
    store: Arc<dyn SessionStore>,
    bot_name: &str,
    model: &str,
) -> Vec<Box<dyn SlashCommandHandler>> {
    let mut commands: Vec<Box<dyn SlashCommandHandler>> = vec![
        Box::new(StartCommand::new(bot_name)),
        Box::new(ClearCommand::new(Arc::clone(&store))),
        Box::new(HistoryCommand::new(store)),
        Box::new(AboutCommand::new(bot_name, model)),
    ];

    let mut listing: Vec<(String, String)> = commands
        .iter()
        .map(|c| (c.command().to_string(), c.description().to_string()))
        .collect();
    listing.insert(1, ("/help".to_string(), "Show available commands".to_string()));

    commands.insert(1, Box::new(HelpCommand::new(listing)));
    commands
}
