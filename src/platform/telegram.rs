use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::payloads::{PinChatMessageSetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{ChatId, LinkPreviewOptions, MessageId, ParseMode, ReplyParameters};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::platform::{SendOptions, TelegramApi};

/// Telegram rejects messages above 4096 chars; keep some headroom
const MAX_MESSAGE_LEN: usize = 4000;

/// Buffered inbound messages before the dispatcher waits for the listener
const UPDATE_BUFFER: usize = 100;

/// Bot replies are written in Telegram's legacy Markdown, which teloxide marks deprecated
#[allow(deprecated)]
const LEGACY_MARKDOWN: ParseMode = ParseMode::Markdown;

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Telegram transport backed by teloxide
pub struct TelegramBot {
    bot: Bot,
}

impl TelegramBot {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    /// Check the token and log which account the bot runs as
    pub async fn authorize(&self) -> Result<()> {
        let me = self
            .bot
            .get_me()
            .await
            .context("Failed to authorize Telegram bot")?;
        info!("Authorized on account {}", me.username());
        Ok(())
    }
}

async fn forward_message(msg: Message, tx: mpsc::Sender<Message>) -> ResponseResult<()> {
    if tx.send(msg).await.is_err() {
        warn!("Listener is gone, dropping Telegram message");
    }
    Ok(())
}

#[async_trait]
impl TelegramApi for TelegramBot {
    fn updates(&self) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let bot = self.bot.clone();

        tokio::spawn(async move {
            info!("Starting Telegram dispatcher...");

            let handler = Update::filter_message().endpoint(forward_message);

            Dispatcher::builder(bot, handler)
                .dependencies(dptree::deps![tx])
                .default_handler(|upd| async move {
                    debug!("Unhandled update: {:?}", upd.id);
                })
                .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
                .build()
                .dispatch()
                .await;

            info!("Telegram dispatcher stopped");
        });

        rx
    }

    async fn send(&self, chat_id: i64, text: &str, options: SendOptions) -> Result<i32> {
        let mut first_id = None;

        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let mut req = self.bot.send_message(ChatId(chat_id), chunk);
            if options.markdown {
                req = req.parse_mode(LEGACY_MARKDOWN);
            }
            if options.disable_preview {
                req = req.link_preview_options(LinkPreviewOptions {
                    is_disabled: true,
                    url: None,
                    prefer_small_media: false,
                    prefer_large_media: false,
                    show_above_text: false,
                });
            }
            if let Some(reply_to) = options.reply_to {
                req = req.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
            }

            let sent = req
                .await
                .with_context(|| format!("Failed to send message to chat {}", chat_id))?;
            first_id.get_or_insert(sent.id.0);
        }

        first_id.context("Nothing was sent")
    }

    async fn pin(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .pin_chat_message(ChatId(chat_id), MessageId(message_id))
            .disable_notification(true)
            .await
            .with_context(|| format!("Failed to pin message {} in chat {}", message_id, chat_id))?;
        Ok(())
    }

    async fn unpin(&self, chat_id: i64) -> Result<()> {
        self.bot
            .unpin_chat_message(ChatId(chat_id))
            .await
            .with_context(|| format!("Failed to unpin message in chat {}", chat_id))?;
        Ok(())
    }
}
