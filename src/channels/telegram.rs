use super::traits::{Channel, InlineButton};
use crate::auto_reply::{CallbackQuery, InboundMessage};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use uuid::Uuid;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// What to do with one entry of a `getUpdates` result.
#[derive(Debug, PartialEq)]
enum UpdateAction {
    Deliver(InboundMessage),
    Unauthorized {
        username: String,
        user_id: String,
        callback_id: Option<String>,
    },
    Skip,
}

/// Telegram channel. Long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self::with_options(bot_token, allowed_users, TELEGRAM_API_BASE, 30)
    }

    pub fn with_options(
        bot_token: String,
        allowed_users: Vec<String>,
        api_base: &str,
        poll_timeout_secs: u64,
    ) -> Self {
        // Requests must outlive the server-side long-poll timeout.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            bot_token,
            allowed_users,
            api_base: api_base.trim_end_matches('/').to_string(),
            poll_timeout_secs,
            client,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    /// POST a Bot API method; errors carry Telegram's `description`.
    async fn call(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Telegram {method} request failed: {}", e.without_url()))?;

        let status = resp.status();
        let data: serde_json::Value = resp.json().await.unwrap_or_default();

        if !status.is_success() {
            let description = data
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("no description");
            return Err(TelegramApiError {
                method: method.to_string(),
                status,
                description: description.to_string(),
            }
            .into());
        }

        Ok(data)
    }

    /// Send with Markdown, resending as plain text if Telegram rejects the markup.
    async fn call_with_markdown(
        &self,
        method: &str,
        mut body: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        body["parse_mode"] = serde_json::Value::String("Markdown".into());
        match self.call(method, &body).await {
            Ok(data) => Ok(data),
            Err(e)
                if e.downcast_ref::<TelegramApiError>()
                    .is_some_and(|api| api.status == StatusCode::BAD_REQUEST) =>
            {
                tracing::debug!("Telegram rejected Markdown, resending as plain text: {e}");
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("parse_mode");
                }
                self.call(method, &body).await
            }
            Err(e) => Err(e),
        }
    }

    /// Bot username reported by `getMe`.
    pub async fn get_me(&self) -> anyhow::Result<String> {
        let data = self.call("getMe", &serde_json::json!({})).await?;
        data.get("result")
            .and_then(|r| r.get("username"))
            .and_then(serde_json::Value::as_str)
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("Missing username in getMe response"))
    }

    fn parse_update(&self, update: &serde_json::Value) -> UpdateAction {
        if let Some(callback) = update.get("callback_query") {
            return self.parse_callback_query(callback);
        }

        let Some(message) = update.get("message") else {
            return UpdateAction::Skip;
        };

        let Some(chat_id) = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(serde_json::Value::as_i64)
            .map(|id| id.to_string())
        else {
            return UpdateAction::Skip;
        };

        let from = message.get("from");
        let username = from
            .and_then(|f| f.get("username"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        let user_id = from
            .and_then(|f| f.get("id"))
            .and_then(serde_json::Value::as_i64)
            .map_or_else(|| chat_id.clone(), |id| id.to_string());

        if !self.is_any_user_allowed([username, user_id.as_str()]) {
            return UpdateAction::Unauthorized {
                username: username.to_string(),
                user_id,
                callback_id: None,
            };
        }

        // Photos, stickers and the like are not handled.
        let Some(text) = message.get("text").and_then(serde_json::Value::as_str) else {
            return UpdateAction::Skip;
        };

        UpdateAction::Deliver(InboundMessage {
            id: Uuid::new_v4().to_string(),
            sender: user_id,
            sender_name: first_name(from),
            chat_id,
            content: text.to_string(),
            channel: "telegram".to_string(),
            timestamp: chrono::Utc::now(),
            callback: None,
        })
    }

    fn parse_callback_query(&self, callback: &serde_json::Value) -> UpdateAction {
        let Some((id, data, from, user_id, chat_id, message_id)) = callback_fields(callback)
        else {
            return UpdateAction::Skip;
        };

        let username = from
            .get("username")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");

        if !self.is_any_user_allowed([username, user_id.as_str()]) {
            return UpdateAction::Unauthorized {
                username: username.to_string(),
                user_id,
                callback_id: Some(id),
            };
        }

        UpdateAction::Deliver(InboundMessage {
            id: Uuid::new_v4().to_string(),
            sender: user_id,
            sender_name: first_name(Some(from)),
            chat_id,
            content: String::new(),
            channel: "telegram".to_string(),
            timestamp: chrono::Utc::now(),
            callback: Some(CallbackQuery {
                id,
                data,
                message_id,
            }),
        })
    }
}

#[allow(clippy::type_complexity)]
fn callback_fields(
    callback: &serde_json::Value,
) -> Option<(String, String, &serde_json::Value, String, String, Option<i64>)> {
    let id = callback.get("id")?.as_str()?.to_string();
    let data = callback.get("data")?.as_str()?.to_string();
    let from = callback.get("from")?;
    let user_id = from.get("id")?.as_i64()?.to_string();
    let message = callback.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();
    let message_id = message.get("message_id").and_then(serde_json::Value::as_i64);
    Some((id, data, from, user_id, chat_id, message_id))
}

fn first_name(from: Option<&serde_json::Value>) -> Option<String> {
    from.and_then(|f| f.get("first_name"))
        .and_then(serde_json::Value::as_str)
        .map(String::from)
}

/// A non-2xx Bot API response.
#[derive(Debug, thiserror::Error)]
#[error("Telegram {method} failed ({status}): {description}")]
pub struct TelegramApiError {
    pub method: String,
    pub status: StatusCode,
    pub description: String,
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &str, chat_id: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
        });
        self.call_with_markdown("sendMessage", body).await?;
        Ok(())
    }

    async fn send_plain(&self, message: &str, chat_id: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
        });
        self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "action": "typing",
        });
        self.call("sendChatAction", &body).await?;
        Ok(())
    }

    async fn send_with_keyboard(
        &self,
        message: &str,
        chat_id: &str,
        buttons: &[InlineButton],
    ) -> anyhow::Result<()> {
        let keyboard: Vec<Vec<serde_json::Value>> = buttons
            .iter()
            .map(|btn| {
                vec![serde_json::json!({
                    "text": btn.text,
                    "callback_data": btn.callback_data
                })]
            })
            .collect();

        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
            "reply_markup": {
                "inline_keyboard": keyboard
            }
        });

        let data = self.call_with_markdown("sendMessage", body).await?;
        let message_id = data
            .get("result")
            .and_then(|r| r.get("message_id"))
            .and_then(serde_json::Value::as_i64);
        tracing::debug!(chat_id, ?message_id, "Telegram message with inline keyboard sent");
        Ok(())
    }

    async fn edit_message(&self, chat_id: &str, message_id: i64, text: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        self.call_with_markdown("editMessageText", body).await?;
        tracing::debug!(chat_id, message_id, "Edited Telegram message");
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({ "callback_query_id": callback_id });
        self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message", "callback_query"]
            });

            let data = match self.call("getUpdates", &body).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let Some(results) = data.get("result").and_then(serde_json::Value::as_array) else {
                tracing::warn!("Telegram getUpdates response has no result array");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            };

            for update in results {
                // Advance offset past this update
                if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                    offset = uid + 1;
                }

                match self.parse_update(update) {
                    UpdateAction::Deliver(msg) => {
                        if tx.send(msg).await.is_err() {
                            return Ok(());
                        }
                    }
                    UpdateAction::Unauthorized {
                        username,
                        user_id,
                        callback_id,
                    } => {
                        tracing::warn!(
                            %username,
                            %user_id,
                            "Telegram: ignoring update from unauthorized user. \
                             Add the @username or numeric user ID to telegram.allowed_users."
                        );
                        if let Some(id) = callback_id {
                            // Still answer to remove loading state
                            let _ = self.answer_callback(&id).await;
                        }
                    }
                    UpdateAction::Skip => {}
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.get_me().await.is_ok()
    }
}
