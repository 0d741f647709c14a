use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::traits::{ReplyDispatcher, ReplyKind, ReplyMessage};
use crate::channels::Channel;

/// Split `text` into chunks of at most `limit` characters.
///
/// A chunk ends just after the last newline inside its window when there is
/// one; otherwise it is cut at exactly `limit` characters. Cuts always land on
/// char boundaries and the chunks concatenate back to `text`.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(idx, _)| idx);
        let window = &rest[..window_end];

        let cut = match window.rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => window_end,
        };

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Delivers replies through a [`Channel`], splitting long text.
pub struct ChannelReplyDispatcher {
    channel: Arc<dyn Channel>,
    max_message_length: usize,
}

impl ChannelReplyDispatcher {
    pub fn new(channel: Arc<dyn Channel>, max_message_length: usize) -> Self {
        Self {
            channel,
            max_message_length,
        }
    }
}

#[async_trait]
impl ReplyDispatcher for ChannelReplyDispatcher {
    async fn send(&self, reply: ReplyMessage) -> Result<()> {
        let chunks = split_message(&reply.content, self.max_message_length);
        tracing::debug!(
            recipient = %reply.recipient,
            channel = self.channel.name(),
            chunks = chunks.len(),
            "dispatching reply"
        );

        let mut chunks = chunks.into_iter();
        let Some(first) = chunks.next() else {
            return Ok(());
        };

        match &reply.kind {
            ReplyKind::Plain => self.channel.send_plain(&first, &reply.recipient).await?,
            ReplyKind::Text => self.channel.send(&first, &reply.recipient).await?,
            ReplyKind::Keyboard(buttons) => {
                self.channel
                    .send_with_keyboard(&first, &reply.recipient, buttons)
                    .await?;
            }
            ReplyKind::Edit { message_id } => {
                self.channel
                    .edit_message(&reply.recipient, *message_id, &first)
                    .await?;
            }
        }

        for chunk in chunks {
            if reply.kind == ReplyKind::Plain {
                self.channel.send_plain(&chunk, &reply.recipient).await?;
            } else {
                self.channel.send(&chunk, &reply.recipient).await?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "channel"
    }
}
