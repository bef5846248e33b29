//! Telegram channel — long-polls the Bot API for updates.

use super::traits::{Channel, ChatKind, InboundMessage};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use uuid::Uuid;

pub struct TelegramChannel {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Send a chat action hint ("typing", "upload_photo"). Best-effort.
    pub async fn send_chat_action(&self, chat_id: &str, action: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "action": action
        });

        let resp = self
            .client
            .post(self.api_url("sendChatAction"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendChatAction failed: {err}");
        }
        Ok(())
    }

    /// Send a photo to a Telegram chat
    pub async fn send_photo(
        &self,
        chat_id: &str,
        file_path: &Path,
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("photo.jpg");

        let file_bytes = tokio::fs::read(file_path).await?;
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendPhoto failed: {err}");
        }

        tracing::info!("Telegram photo sent to {chat_id}: {file_name}");
        Ok(())
    }

    /// Parse a Telegram `update` object into an `InboundMessage`.
    ///
    /// Non-text messages and updates without a sender are skipped.
    fn parse_update(update: &serde_json::Value) -> Option<InboundMessage> {
        let message = update.get("message")?;
        let text = message.get("text")?.as_str()?.to_string();

        let chat = message.get("chat")?;
        let chat_id = chat.get("id")?.as_i64()?.to_string();
        let chat_kind = match chat.get("type").and_then(|t| t.as_str()) {
            Some("private") => ChatKind::Private,
            _ => ChatKind::Group,
        };

        let from = message.get("from")?;
        let user_id = from.get("id")?.as_i64()?;
        let display_name = from
            .get("first_name")
            .and_then(|n| n.as_str())
            .unwrap_or("friend")
            .to_string();
        let username = from
            .get("username")
            .and_then(|u| u.as_str())
            .map(String::from);

        let timestamp = message
            .get("date")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        Some(InboundMessage {
            id: Uuid::new_v4().to_string(),
            chat_id,
            chat_kind,
            user_id,
            display_name,
            username,
            text,
            timestamp,
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &str, chat_id: &str) -> anyhow::Result<()> {
        // Plain text, no parse_mode: model output regularly contains
        // characters that are invalid Telegram Markdown.
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": message
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendMessage failed: {err}");
        }
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let url = self.api_url("getUpdates");
            let body = serde_json::json!({
                "offset": offset,
                "timeout": 30,
                "allowed_updates": ["message"]
            });

            let resp = match self.client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(msg) = Self::parse_update(update) else {
                        continue;
                    };

                    if tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
