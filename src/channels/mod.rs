//! Messaging channels and the loop that feeds them through the dispatcher.

pub mod telegram;
pub mod terminal;
pub mod traits;

pub use telegram::TelegramChannel;
pub use terminal::{TerminalChannel, TERMINAL_USER};
pub use traits::{Channel, InlineButton};

use crate::auto_reply::{
    create_reply_dispatcher, DispatchResult, Dispatcher, InboundMessage, ReplyDispatcher,
    ReplyMessage, APOLOGY_TEXT,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Capacity of the queue between a channel listener and the dispatcher.
const MESSAGE_QUEUE_CAPACITY: usize = 100;

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Listen on `channel` and answer every inbound message until the listener
/// stops.
///
/// Messages from one sender are handled strictly in arrival order, each one
/// finishing before the next starts. Different senders run concurrently so a
/// slow completion for one user does not hold up the others.
pub async fn run_message_loop(
    channel: Arc<dyn Channel>,
    dispatcher: Arc<dyn Dispatcher>,
    max_message_length: usize,
) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<InboundMessage>(MESSAGE_QUEUE_CAPACITY);

    let listener = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.listen(tx).await })
    };

    let replies = create_reply_dispatcher(Arc::clone(&channel), max_message_length);
    // Last task spawned per sender; the next message for that sender waits on it.
    let mut tails: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        tracing::debug!(
            channel = %msg.channel,
            user_id = %msg.sender,
            content = %truncate_with_ellipsis(&msg.content, 80),
            "Inbound message"
        );

        tails.retain(|_, task| !task.is_finished());

        let sender = msg.sender.clone();
        let previous = tails.remove(&sender);
        let task = tokio::spawn(handle_in_order(
            previous,
            Arc::clone(&channel),
            Arc::clone(&dispatcher),
            Arc::clone(&replies),
            msg,
        ));
        tails.insert(sender, task);
    }

    for (_, task) in tails {
        if let Err(e) = task.await {
            tracing::error!("Message handler task failed: {e}");
        }
    }

    listener
        .await
        .context("Channel listener task panicked")?
        .with_context(|| format!("{} listener failed", channel.name()))
}

async fn handle_in_order(
    previous: Option<JoinHandle<()>>,
    channel: Arc<dyn Channel>,
    dispatcher: Arc<dyn Dispatcher>,
    replies: Arc<dyn ReplyDispatcher>,
    msg: InboundMessage,
) {
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            tracing::error!(user_id = %msg.sender, "Previous message handler failed: {e}");
        }
    }
    handle_message(channel, dispatcher, replies, msg).await;
}

async fn handle_message(
    channel: Arc<dyn Channel>,
    dispatcher: Arc<dyn Dispatcher>,
    replies: Arc<dyn ReplyDispatcher>,
    msg: InboundMessage,
) {
    let recipient = msg.chat_id.clone();
    let user_id = msg.sender.clone();

    if let Some(callback) = &msg.callback {
        if let Err(e) = channel.answer_callback(&callback.id).await {
            tracing::warn!(%user_id, "Failed to answer callback: {e}");
        }
    } else if is_chat_text(&msg.content) {
        if let Err(e) = channel.send_typing(&recipient).await {
            tracing::debug!(%user_id, "Failed to send typing indicator: {e}");
        }
    }

    let result = match dispatcher.dispatch(msg).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(%user_id, channel = channel.name(), "Dispatch failed: {e:#}");
            DispatchResult::Reply {
                content: APOLOGY_TEXT.to_string(),
            }
        }
    };

    if let Some(reply) = ReplyMessage::from_dispatch(result, &recipient) {
        if let Err(e) = replies.send(reply).await {
            tracing::error!(%user_id, channel = channel.name(), "Failed to deliver reply: {e:#}");
        }
    }

    if let Err(e) = channel.flush(&recipient).await {
        tracing::debug!(%user_id, "Channel flush failed: {e}");
    }
}

fn is_chat_text(content: &str) -> bool {
    let trimmed = content.trim();
    !trimmed.is_empty() && !trimmed.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_reply::{CallbackQuery, ChatSettings, DefaultDispatcher};
    use crate::providers::{ChatMessage, Provider};
    use crate::sessions::{InMemorySessionStore, SessionStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Emits a fixed script of messages, then stops; records every call.
    struct ScriptedChannel {
        script: Mutex<Vec<InboundMessage>>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedChannel {
        fn new(script: Vec<InboundMessage>) -> Self {
            Self {
                script: Mutex::new(script),
                log: Mutex::new(Vec::new()),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, message: &str, recipient: &str) -> Result<()> {
            self.log.lock().push(format!("send {recipient}: {message}"));
            Ok(())
        }

        async fn send_typing(&self, recipient: &str) -> Result<()> {
            self.log.lock().push(format!("typing {recipient}"));
            Ok(())
        }

        async fn answer_callback(&self, callback_id: &str) -> Result<()> {
            self.log.lock().push(format!("answer {callback_id}"));
            Ok(())
        }

        async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> Result<()> {
            let script: Vec<InboundMessage> = std::mem::take(&mut *self.script.lock());
            for msg in script {
                tx.send(msg).await?;
            }
            Ok(())
        }
    }

    /// Replies with the uppercased text; fails on "boom".
    struct UpperDispatcher;

    #[async_trait]
    impl Dispatcher for UpperDispatcher {
        async fn dispatch(&self, message: InboundMessage) -> Result<DispatchResult> {
            if message.callback.is_some() {
                return Ok(DispatchResult::Ignored);
            }
            if message.content == "boom" {
                anyhow::bail!("dispatcher exploded");
            }
            Ok(DispatchResult::Reply {
                content: message.content.to_uppercase(),
            })
        }

        fn name(&self) -> &str {
            "upper"
        }
    }

    /// Answers `re:<last message>`; "first" takes much longer than anything else.
    #[derive(Default)]
    struct SlowProvider {
        seen: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Provider for SlowProvider {
        async fn chat_with_history(
            &self,
            messages: &[ChatMessage],
            _model: &str,
            _temperature: f64,
        ) -> Result<String> {
            self.seen
                .lock()
                .push(messages.iter().map(|m| m.content.clone()).collect());
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let delay = if last == "first" { 200 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(format!("re:{last}"))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn chat_dispatcher(
        store: Arc<dyn SessionStore>,
        provider: Arc<SlowProvider>,
    ) -> Arc<dyn Dispatcher> {
        Arc::new(DefaultDispatcher::new(
            store,
            provider,
            ChatSettings {
                bot_name: "Test Bot".into(),
                model: "test-model".into(),
                temperature: 0.7,
                system_prompt: None,
            },
        ))
    }

    fn sends(channel: &ScriptedChannel) -> Vec<String> {
        channel
            .log()
            .into_iter()
            .filter(|l| l.starts_with("send"))
            .collect()
    }

    #[tokio::test]
    async fn same_user_messages_are_handled_in_order() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(20));
        let provider = Arc::new(SlowProvider::default());
        let channel = Arc::new(ScriptedChannel::new(vec![
            InboundMessage::text("scripted", "alice", "first"),
            InboundMessage::text("scripted", "alice", "second"),
        ]));

        run_message_loop(
            channel.clone(),
            chat_dispatcher(store.clone(), provider.clone()),
            4096,
        )
        .await
        .unwrap();

        let history: Vec<String> = store
            .get_context("alice")
            .await
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(history, ["first", "re:first", "second", "re:second"]);
        assert_eq!(
            *provider.seen.lock(),
            [
                vec!["first".to_string()],
                vec!["first".into(), "re:first".into(), "second".into()],
            ]
        );
        assert_eq!(
            sends(&channel),
            ["send alice: re:first", "send alice: re:second"]
        );
    }

    #[tokio::test]
    async fn other_users_are_not_held_up() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(20));
        let provider = Arc::new(SlowProvider::default());
        let channel = Arc::new(ScriptedChannel::new(vec![
            InboundMessage::text("scripted", "alice", "first"),
            InboundMessage::text("scripted", "bob", "quick"),
        ]));

        run_message_loop(channel.clone(), chat_dispatcher(store, provider), 4096)
            .await
            .unwrap();

        assert_eq!(
            sends(&channel),
            ["send bob: re:quick", "send alice: re:first"]
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("ééééé", 2), "éé...");
    }

    #[test]
    fn only_plain_text_gets_typing_indicator() {
        assert!(is_chat_text("hello"));
        assert!(!is_chat_text("/help"));
        assert!(!is_chat_text("   "));
    }

    #[tokio::test]
    async fn loop_answers_every_message_then_returns() {
        let channel = Arc::new(ScriptedChannel::new(vec![
            InboundMessage::text("scripted", "1", "hello"),
            InboundMessage::text("scripted", "2", "boom"),
        ]));

        run_message_loop(channel.clone(), Arc::new(UpperDispatcher), 4096)
            .await
            .unwrap();

        let log = channel.log();
        assert!(log.contains(&"typing 1".to_string()));
        assert!(log.contains(&"send 1: HELLO".to_string()));
        assert!(log.contains(&format!("send 2: {APOLOGY_TEXT}")));
    }

    #[tokio::test]
    async fn long_replies_are_chunked() {
        let channel = Arc::new(ScriptedChannel::new(vec![InboundMessage::text(
            "scripted", "1", "abcdefghij",
        )]));

        run_message_loop(channel.clone(), Arc::new(UpperDispatcher), 4)
            .await
            .unwrap();

        let sends: Vec<String> = channel
            .log()
            .into_iter()
            .filter(|l| l.starts_with("send"))
            .collect();
        assert_eq!(sends, ["send 1: ABCD", "send 1: EFGH", "send 1: IJ"]);
    }

    #[tokio::test]
    async fn callbacks_are_answered_without_typing() {
        let mut msg = InboundMessage::text("scripted", "1", "");
        msg.callback = Some(CallbackQuery {
            id: "cb-9".into(),
            data: "help".into(),
            message_id: Some(3),
        });
        let channel = Arc::new(ScriptedChannel::new(vec![msg]));

        run_message_loop(channel.clone(), Arc::new(UpperDispatcher), 4096)
            .await
            .unwrap();

        assert_eq!(channel.log(), ["answer cb-9"]);
    }
}
