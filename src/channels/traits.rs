use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auto_reply::InboundMessage;

/// A single inline keyboard button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Core channel trait; implement for any messaging platform
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a message through this channel, with the platform's formatting
    async fn send(&self, message: &str, recipient: &str) -> anyhow::Result<()>;

    /// Send text exactly as given, with no markup interpretation
    async fn send_plain(&self, message: &str, recipient: &str) -> anyhow::Result<()> {
        self.send(message, recipient).await
    }

    /// Show a "typing" indicator while a reply is being generated
    async fn send_typing(&self, _recipient: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Send a message with inline buttons, one per row
    async fn send_with_keyboard(
        &self,
        message: &str,
        recipient: &str,
        _buttons: &[InlineButton],
    ) -> anyhow::Result<()> {
        self.send(message, recipient).await
    }

    /// Replace the text of an earlier message
    async fn edit_message(
        &self,
        recipient: &str,
        _message_id: i64,
        text: &str,
    ) -> anyhow::Result<()> {
        self.send(text, recipient).await
    }

    /// Acknowledge a button press
    async fn answer_callback(&self, _callback_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once every reply to one inbound message has been delivered
    async fn flush(&self, _recipient: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Start listening for incoming messages (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()>;

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }
}
