use chrono::{DateTime, Utc};

/// Kind of chat a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatType {
    #[default]
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatType {
    /// Replies in anything but a private chat are threaded to the trigger message
    pub fn needs_reply_link(&self) -> bool {
        !matches!(self, ChatType::Private)
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatType::Private => write!(f, "private"),
            ChatType::Group => write!(f, "group"),
            ChatType::Supergroup => write!(f, "supergroup"),
            ChatType::Channel => write!(f, "channel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub display_name: String,
}

/// Chat on whose behalf a message was posted (channels, anonymous admins)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderChat {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    pub text: String,
    pub sent: DateTime<Utc>,
    pub from: Option<User>,
    pub sender_chat: Option<SenderChat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Entity tag as the platform names it, e.g. "mention", "bold", "text_link"
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    pub url: Option<String>,
    pub user: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub caption: String,
    pub entities: Vec<Entity>,
}

/// An inbound message as seen by the handlers.
///
/// Built once by the listener and shared read-only across all handler tasks
/// of a dispatch. Synthetic idle messages carry no chat and no sender.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub id: i32,
    pub sent: DateTime<Utc>,
    pub text: String,
    pub chat: Option<Chat>,
    pub from: User,
    pub sender_chat: Option<SenderChat>,
    pub reply_to: Option<ReplyTo>,
    pub image: Option<Image>,
    pub entities: Vec<Entity>,
}

impl Message {
    /// Message with only text set, used for idle ticks and tests
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.chat.as_ref().map(|c| c.id)
    }
}

/// What a handler (or the aggregator) wants sent back.
///
/// Nothing is transmitted unless `ready` is set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub text: String,
    pub ready: bool,
    pub pin: bool,
    pub unpin: bool,
    /// Show a link preview for URLs in `text`
    pub preview: bool,
    pub reply_to: Option<i32>,
    /// Send to this chat instead of the one the listener would pick
    pub chat_id: Option<i64>,
}

impl Response {
    /// A ready response carrying only text
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ready: true,
            ..Default::default()
        }
    }

    /// A response that will not be sent
    pub fn silent() -> Self {
        Self::default()
    }
}
