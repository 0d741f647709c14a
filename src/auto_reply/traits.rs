use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::InlineButton;

/// A slash command split out of a message: `/history@MyBot full` parses to
/// command `/history`, args `full`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// Lowercased command including the leading `/`, bot mention removed.
    pub command: String,
    pub args: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub output: String,
    /// Inline buttons to attach to the output, one per row.
    pub keyboard: Vec<InlineButton>,
}

impl CommandResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            keyboard: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Stable user identity; the session key.
    pub sender: String,
    pub sender_name: Option<String>,
    pub channel: String,
}

#[async_trait]
pub trait SlashCommandHandler: Send + Sync {
    fn command(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, args: &str, context: &CommandContext) -> Result<CommandResult>;
}

/// A pressed inline button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub data: String,
    /// Message carrying the keyboard, when the platform reports it.
    pub message_id: Option<i64>,
}

/// A message received from a channel, normalized for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// User identity; one session per distinct sender.
    pub sender: String,
    /// Display name used in greetings.
    pub sender_name: Option<String>,
    /// Where replies go. Differs from `sender` in group chats.
    pub chat_id: String,
    pub content: String,
    pub channel: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Set when this message is a button press rather than text.
    pub callback: Option<CallbackQuery>,
}

impl InboundMessage {
    /// Plain text message where the chat and the sender share one id.
    pub fn text(channel: &str, sender: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            sender_name: None,
            chat_id: sender.to_string(),
            content: content.to_string(),
            channel: channel.to_string(),
            timestamp: chrono::Utc::now(),
            callback: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchResult {
    /// Completion text (or the apology when the provider failed).
    Reply { content: String },
    /// Output of a slash command.
    CommandHandled { output: String },
    /// Command output with inline buttons attached.
    Keyboard {
        content: String,
        buttons: Vec<InlineButton>,
    },
    /// Replace the text of a message the bot sent earlier.
    Edit { message_id: i64, content: String },
    /// Nothing to send.
    Ignored,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, message: InboundMessage) -> Result<DispatchResult>;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyKind {
    /// Model output, delivered verbatim.
    Plain,
    /// Bot-authored text that may carry markup.
    Text,
    Keyboard(Vec<InlineButton>),
    Edit { message_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    pub content: String,
    pub recipient: String,
    pub kind: ReplyKind,
}

impl ReplyMessage {
    /// Turn a dispatch outcome into something to deliver, if anything.
    pub fn from_dispatch(result: DispatchResult, recipient: &str) -> Option<Self> {
        let (content, kind) = match result {
            DispatchResult::Reply { content } => (content, ReplyKind::Plain),
            DispatchResult::CommandHandled { output } => (output, ReplyKind::Text),
            DispatchResult::Keyboard { content, buttons } => (content, ReplyKind::Keyboard(buttons)),
            DispatchResult::Edit {
                message_id,
                content,
            } => (content, ReplyKind::Edit { message_id }),
            DispatchResult::Ignored => return None,
        };
        Some(Self {
            content,
            recipient: recipient.to_string(),
            kind,
        })
    }
}

#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    async fn send(&self, reply: ReplyMessage) -> Result<()>;
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_result_variants_serialize() {
        let reply = DispatchResult::Reply {
            content: "hello".to_string(),
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("Reply"));

        let json = serde_json::to_string(&DispatchResult::Ignored).unwrap();
        assert!(json.contains("Ignored"));
    }

    #[test]
    fn inbound_text_uses_sender_as_chat() {
        let msg = InboundMessage::text("terminal", "terminal", "hello");
        assert_eq!(msg.chat_id, "terminal");
        assert!(msg.callback.is_none());
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn ignored_result_produces_no_reply() {
        assert!(ReplyMessage::from_dispatch(DispatchResult::Ignored, "42").is_none());
    }

    #[test]
    fn edit_result_keeps_message_id() {
        let reply = ReplyMessage::from_dispatch(
            DispatchResult::Edit {
                message_id: 7,
                content: "updated".into(),
            },
            "42",
        )
        .unwrap();
        assert_eq!(reply.kind, ReplyKind::Edit { message_id: 7 });
        assert_eq!(reply.recipient, "42");
        assert_eq!(reply.content, "updated");
    }

    #[test]
    fn completion_is_delivered_verbatim() {
        let reply = ReplyMessage::from_dispatch(
            DispatchResult::Reply {
                content: "2*3*4 and snake_case_name".into(),
            },
            "42",
        )
        .unwrap();
        assert_eq!(reply.kind, ReplyKind::Plain);
    }

    #[test]
    fn command_output_is_formatted_text_reply() {
        let reply = ReplyMessage::from_dispatch(
            DispatchResult::CommandHandled {
                output: "done".into(),
            },
            "42",
        )
        .unwrap();
        assert_eq!(reply.kind, ReplyKind::Text);
    }
}
