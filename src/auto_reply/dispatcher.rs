use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::commands::{callback_text, default_commands};
use super::parser::parse_command;
use super::traits::{
    CommandContext, DispatchResult, Dispatcher, InboundMessage, SlashCommandHandler,
};
use crate::providers::{ChatMessage, Provider};
use crate::sessions::{Role, SessionStore};

/// Sent instead of a completion when the provider fails.
pub const APOLOGY_TEXT: &str =
    "❌ Sorry, I encountered an error processing your message. Please try again.";

pub const UNKNOWN_COMMAND_TEXT: &str = "❌ Unknown command. Type /help for available commands.";

/// Completion settings the dispatcher applies to every chat turn.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub bot_name: String,
    pub model: String,
    pub temperature: f64,
    pub system_prompt: Option<String>,
}

/// Default dispatcher: slash commands, menu callbacks, and the chat flow.
pub struct DefaultDispatcher {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn Provider>,
    commands: Vec<Box<dyn SlashCommandHandler>>,
    settings: ChatSettings,
}

impl DefaultDispatcher {
    /// Dispatcher with the standard command set.
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn Provider>,
        settings: ChatSettings,
    ) -> Self {
        let commands = default_commands(Arc::clone(&store), &settings.bot_name, &settings.model);
        Self::with_commands(store, provider, settings, commands)
    }

    pub fn with_commands(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn Provider>,
        settings: ChatSettings,
        commands: Vec<Box<dyn SlashCommandHandler>>,
    ) -> Self {
        Self {
            store,
            provider,
            commands,
            settings,
        }
    }

    async fn run_command(
        &self,
        message: &InboundMessage,
        command: &str,
        args: &str,
    ) -> Result<DispatchResult> {
        let Some(handler) = self
            .commands
            .iter()
            .find(|h| h.command().eq_ignore_ascii_case(command))
        else {
            tracing::debug!(user_id = %message.sender, command, "Unknown command");
            return Ok(DispatchResult::CommandHandled {
                output: UNKNOWN_COMMAND_TEXT.to_string(),
            });
        };

        let context = CommandContext {
            sender: message.sender.clone(),
            sender_name: message.sender_name.clone(),
            channel: message.channel.clone(),
        };
        let result = handler.execute(args, &context).await?;

        Ok(if result.keyboard.is_empty() {
            DispatchResult::CommandHandled {
                output: result.output,
            }
        } else {
            DispatchResult::Keyboard {
                content: result.output,
                buttons: result.keyboard,
            }
        })
    }

    fn handle_callback(&self, data: &str, message_id: Option<i64>) -> DispatchResult {
        let Some(content) = callback_text(data, &self.settings.bot_name, &self.settings.model)
        else {
            tracing::debug!(data, "Ignoring unknown callback");
            return DispatchResult::Ignored;
        };

        match message_id {
            Some(message_id) => DispatchResult::Edit {
                message_id,
                content,
            },
            None => DispatchResult::CommandHandled { output: content },
        }
    }

    async fn chat(&self, user_id: &str, text: &str) -> DispatchResult {
        self.store.append(user_id, Role::User, text).await;
        let context = self.store.get_context(user_id).await;

        let mut messages = Vec::with_capacity(context.len() + 1);
        if let Some(system) = self.settings.system_prompt.as_deref() {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(context.iter().map(ChatMessage::from));

        match self
            .provider
            .chat_with_history(&messages, &self.settings.model, self.settings.temperature)
            .await
        {
            Ok(reply) => {
                self.store.append(user_id, Role::Assistant, &reply).await;
                tracing::info!(
                    user_id,
                    turns = context.len() + 1,
                    provider = self.provider.name(),
                    model = %self.settings.model,
                    "Reply generated"
                );
                DispatchResult::Reply { content: reply }
            }
            Err(e) => {
                tracing::error!(
                    user_id,
                    provider = self.provider.name(),
                    model = %self.settings.model,
                    "Completion failed: {e:#}"
                );
                DispatchResult::Reply {
                    content: APOLOGY_TEXT.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl Dispatcher for DefaultDispatcher {
    async fn dispatch(&self, message: InboundMessage) -> Result<DispatchResult> {
        if let Some(callback) = &message.callback {
            return Ok(self.handle_callback(&callback.data, callback.message_id));
        }

        if message.content.trim().is_empty() {
            return Ok(DispatchResult::Ignored);
        }

        if let Some(parsed) = parse_command(&message.content) {
            return self
                .run_command(&message, &parsed.command, &parsed.args)
                .await;
        }

        Ok(self.chat(&message.sender, &message.content).await)
    }

    fn name(&self) -> &str {
        "default"
    }
}
