pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// How an outgoing message is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendOptions {
    /// Parse the text as Telegram legacy markdown
    pub markdown: bool,
    pub disable_preview: bool,
    pub reply_to: Option<i32>,
}

/// The Telegram calls the listener needs, kept narrow so it can be mocked
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Start receiving messages; the channel closes when the transport stops
    fn updates(&self) -> mpsc::Receiver<teloxide::types::Message>;

    /// Send a text message and return the id of the sent message
    async fn send(&self, chat_id: i64, text: &str, options: SendOptions) -> Result<i32>;

    /// Pin a message without notifying the chat
    async fn pin(&self, chat_id: i64, message_id: i32) -> Result<()>;

    /// Unpin the most recent pinned message of a chat
    async fn unpin(&self, chat_id: i64) -> Result<()>;
}
