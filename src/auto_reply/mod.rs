//! Inbound message routing: slash commands, menu callbacks and the chat flow.

pub mod commands;
pub mod dispatcher;
pub mod parser;
pub mod reply;
pub mod traits;

pub use commands::{
    default_commands, AboutCommand, ClearCommand, HelpCommand, HistoryCommand, StartCommand,
};
pub use dispatcher::{ChatSettings, DefaultDispatcher, APOLOGY_TEXT, UNKNOWN_COMMAND_TEXT};
pub use parser::parse_command;
pub use reply::{split_message, ChannelReplyDispatcher};
pub use traits::{
    CallbackQuery, CommandContext, CommandResult, DispatchResult, Dispatcher, InboundMessage,
    ParsedCommand, ReplyDispatcher, ReplyKind, ReplyMessage, SlashCommandHandler,
};

use crate::channels::Channel;
use crate::providers::Provider;
use crate::sessions::SessionStore;
use std::sync::Arc;

pub fn create_dispatcher(
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn Provider>,
    settings: ChatSettings,
) -> Arc<dyn Dispatcher> {
    Arc::new(DefaultDispatcher::new(store, provider, settings))
}

pub fn create_reply_dispatcher(
    channel: Arc<dyn Channel>,
    max_message_length: usize,
) -> Arc<dyn ReplyDispatcher> {
    Arc::new(ChannelReplyDispatcher::new(channel, max_message_length))
}
