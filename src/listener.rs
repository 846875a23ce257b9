use std::sync::Arc;
use std::time::Duration;

use teloxide::types::{
    Chat as TgChat, Message as TgMessage, MessageEntity, MessageEntityKind, User as TgUser,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bot::BotSet;
use crate::config::AccessDeniedMode;
use crate::message::{
    Chat, ChatType, Entity, Image, Message, ReplyTo, Response, SenderChat, User,
};
use crate::platform::{SendOptions, TelegramApi};

const DEFAULT_IDLE: Duration = Duration::from_secs(30);

/// Capacity of the channel for responses published from outside the loop
const PUBLISH_BUFFER: usize = 100;

const ACCESS_DENIED_TEXT: &str = "Access denied";

/// Why [`TelegramListener::run`] stopped
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenerError {
    #[error("update stream closed")]
    StreamClosed,
    #[error("listener cancelled")]
    Cancelled,
}

/// Listens to Telegram updates, forwards them to the bots and sends back
/// their merged responses.
///
/// Runs as a single loop: one event (update, published response or idle
/// tick) is handled completely, sends included, before the next is picked.
pub struct TelegramListener {
    api: Arc<dyn TelegramApi>,
    bots: BotSet,
    users: Vec<String>,
    access_denied: AccessDeniedMode,
    idle: Duration,
    /// Last chat a message was accepted from; target for idle and published responses
    chat_id: Option<i64>,
    publish_tx: mpsc::Sender<Response>,
    publish_rx: mpsc::Receiver<Response>,
}

impl TelegramListener {
    pub fn new(api: Arc<dyn TelegramApi>, bots: BotSet) -> Self {
        let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_BUFFER);
        Self {
            api,
            bots,
            users: Vec::new(),
            access_denied: AccessDeniedMode::default(),
            idle: DEFAULT_IDLE,
            chat_id: None,
            publish_tx,
            publish_rx,
        }
    }

    /// Restrict the bot to these usernames; empty allows everyone
    pub fn with_users(mut self, users: Vec<String>) -> Self {
        self.users = users;
        self
    }

    pub fn with_access_denied(mut self, mode: AccessDeniedMode) -> Self {
        self.access_denied = mode;
        self
    }

    /// Inactivity after which bots receive an "idle" message; zero keeps the default
    pub fn with_idle(mut self, idle: Duration) -> Self {
        if !idle.is_zero() {
            self.idle = idle;
        }
        self
    }

    /// Handle for sending responses to the last active chat from outside the loop
    pub fn publisher(&self) -> mpsc::Sender<Response> {
        self.publish_tx.clone()
    }

    /// Process events until cancelled or the update stream ends.
    ///
    /// Cancellation is only observed between events; a dispatch in progress
    /// always finishes.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), ListenerError> {
        info!("Start telegram listener for users {:?}", self.users);

        let mut updates = self.api.updates();

        loop {
            if cancel.is_cancelled() {
                return Err(ListenerError::Cancelled);
            }

            // Unbiased so a busy update stream can't starve published responses
            tokio::select! {
                _ = cancel.cancelled() => return Err(ListenerError::Cancelled),

                update = updates.recv() => match update {
                    Some(update) => self.on_update(update).await,
                    None => return Err(ListenerError::StreamClosed),
                },

                Some(resp) = self.publish_rx.recv() => {
                    self.send_response(resp, self.chat_id).await;
                }

                _ = tokio::time::sleep(self.idle) => {
                    let resp = self.bots.dispatch(Message::text("idle")).await;
                    self.send_response(resp, self.chat_id).await;
                }
            }
        }
    }

    async fn on_update(&mut self, update: TgMessage) {
        if update.text().is_none() && update.photo().is_none() {
            debug!("Empty message body");
            return;
        }

        let username = sender_username(&update);
        if !self.is_allowed(username.as_deref()) {
            warn!(
                "User {} is not allowed to use this bot",
                username.as_deref().unwrap_or("<unknown>")
            );
            if self.access_denied == AccessDeniedMode::Reply {
                let denial = Response {
                    reply_to: Some(update.id.0),
                    ..Response::reply(ACCESS_DENIED_TEXT)
                };
                self.send_response(denial, Some(update.chat.id.0)).await;
            }
            return;
        }

        let from_chat = update.chat.id.0;
        self.chat_id = Some(from_chat);

        let msg = transform(&update);
        debug!("Incoming msg: {:?}", msg);

        let resp = self.bots.dispatch(msg).await;
        self.send_response(resp, Some(from_chat)).await;
    }

    fn is_allowed(&self, username: Option<&str>) -> bool {
        if self.users.is_empty() {
            return true;
        }
        match username {
            Some(name) => self.users.iter().any(|u| u.eq_ignore_ascii_case(name)),
            None => false,
        }
    }

    /// Send a ready response, then pin or unpin as requested.
    ///
    /// Failures are logged and never stop the loop.
    async fn send_response(&self, resp: Response, chat_id: Option<i64>) {
        if !resp.ready {
            return;
        }

        let Some(chat_id) = resp.chat_id.or(chat_id) else {
            debug!("No chat to send {:?} to yet", resp.text);
            return;
        };

        debug!(
            "Bot response - {:?}, pin: {}, reply-to: {:?}",
            resp.text, resp.pin, resp.reply_to
        );

        let options = SendOptions {
            markdown: true,
            disable_preview: !resp.preview,
            reply_to: resp.reply_to,
        };
        let sent_id = match self.api.send(chat_id, &resp.text, options).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Can't send message to telegram {:?}: {:#}", resp.text, e);
                return;
            }
        };

        if resp.pin {
            if let Err(e) = self.api.pin(chat_id, sent_id).await {
                warn!("Can't pin message to telegram: {:#}", e);
            }
        }

        if resp.unpin {
            if let Err(e) = self.api.unpin(chat_id).await {
                warn!("Can't unpin message to telegram: {:#}", e);
            }
        }
    }
}

/// Username checked against the allow-list: the sender, else the chat posted on behalf of
fn sender_username(msg: &TgMessage) -> Option<String> {
    msg.from
        .as_ref()
        .and_then(|u| u.username.clone())
        .or_else(|| {
            msg.sender_chat
                .as_ref()
                .and_then(|c| c.username())
                .map(str::to_string)
        })
        .or_else(|| msg.chat.username().map(str::to_string))
}

/// Convert a Telegram message into the bots' message model
pub fn transform(msg: &TgMessage) -> Message {
    let image = msg.photo().and_then(|sizes| sizes.last()).map(|size| Image {
        file_id: size.file.id.to_string(),
        width: size.width,
        height: size.height,
        caption: msg.caption().unwrap_or_default().to_string(),
        entities: transform_entities(msg.caption_entities()),
    });

    let reply_to = msg.reply_to_message().map(|r| ReplyTo {
        text: r.text().unwrap_or_default().to_string(),
        sent: r.date,
        from: r.from.as_ref().map(transform_user),
        sender_chat: r.sender_chat.as_ref().map(transform_sender_chat),
    });

    Message {
        id: msg.id.0,
        sent: msg.date,
        text: msg.text().unwrap_or_default().to_string(),
        chat: Some(Chat {
            id: msg.chat.id.0,
            kind: chat_type(&msg.chat),
        }),
        from: msg.from.as_ref().map(transform_user).unwrap_or_default(),
        sender_chat: msg.sender_chat.as_ref().map(transform_sender_chat),
        reply_to,
        image,
        entities: transform_entities(msg.entities()),
    }
}

fn chat_type(chat: &TgChat) -> ChatType {
    if chat.is_private() {
        ChatType::Private
    } else if chat.is_group() {
        ChatType::Group
    } else if chat.is_supergroup() {
        ChatType::Supergroup
    } else {
        ChatType::Channel
    }
}

fn transform_user(user: &TgUser) -> User {
    User {
        id: user.id.0,
        username: user.username.clone().unwrap_or_default(),
        display_name: user.full_name(),
    }
}

fn transform_sender_chat(chat: &TgChat) -> SenderChat {
    SenderChat {
        id: chat.id.0,
        username: chat.username().unwrap_or_default().to_string(),
    }
}

fn transform_entities(entities: Option<&[MessageEntity]>) -> Vec<Entity> {
    entities
        .unwrap_or_default()
        .iter()
        .map(|e| {
            let (kind, url, user) = match &e.kind {
                MessageEntityKind::Mention => ("mention", None, None),
                MessageEntityKind::Hashtag => ("hashtag", None, None),
                MessageEntityKind::Cashtag => ("cashtag", None, None),
                MessageEntityKind::BotCommand => ("bot_command", None, None),
                MessageEntityKind::Url => ("url", None, None),
                MessageEntityKind::Email => ("email", None, None),
                MessageEntityKind::PhoneNumber => ("phone_number", None, None),
                MessageEntityKind::Bold => ("bold", None, None),
                MessageEntityKind::Italic => ("italic", None, None),
                MessageEntityKind::Underline => ("underline", None, None),
                MessageEntityKind::Strikethrough => ("strikethrough", None, None),
                MessageEntityKind::Spoiler => ("spoiler", None, None),
                MessageEntityKind::Code => ("code", None, None),
                MessageEntityKind::Pre { .. } => ("pre", None, None),
                MessageEntityKind::TextLink { url } => ("text_link", Some(url.to_string()), None),
                MessageEntityKind::TextMention { user } => {
                    ("text_mention", None, Some(transform_user(user)))
                }
                MessageEntityKind::CustomEmoji { .. } => ("custom_emoji", None, None),
                _ => ("other", None, None),
            };
            Entity {
                kind: kind.to_string(),
                offset: e.offset,
                length: e.length,
                url,
                user,
            }
        })
        .collect()
}
