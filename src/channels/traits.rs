//! Channel abstraction.

use async_trait::async_trait;

/// Whether a message arrived one-to-one or in a multi-party chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one chat: always addressed to the bot
    Private,
    /// Group chat: the bot only responds when mentioned
    Group,
}

/// A message received from a channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub chat_id: String,
    pub chat_kind: ChatKind,
    pub user_id: i64,
    /// Requester display name, used for addressing in replies.
    pub display_name: String,
    pub username: Option<String>,
    pub text: String,
    pub timestamp: i64,
}

/// Core channel trait — implement for any messaging platform
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a message through this channel
    async fn send(&self, message: &str, chat_id: &str) -> anyhow::Result<()>;

    /// Start listening for incoming messages (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()>;

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }
}
