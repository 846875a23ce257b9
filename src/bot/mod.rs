pub mod llm_bot;
pub mod rate_limit;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::message::{Message, Response};

/// Texts that short-circuit dispatch and return the combined help
const HELP_TRIGGERS: [&str; 3] = ["help", "/help", "help!"];

/// A pluggable bot that reacts to chat messages.
///
/// Handlers select themselves: every handler sees every message and returns a
/// non-ready [`Response`] when the message is not meant for it. Failures of
/// downstream calls must be turned into a non-ready response inside the
/// handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Usage line for the combined help; empty means "not listed"
    fn help(&self) -> String;

    /// Keywords or prefixes this handler reacts on
    fn react_on(&self) -> Vec<String>;

    /// Process one message
    async fn on_message(&self, msg: &Message) -> Response;
}

/// The set of registered handlers, fixed at startup.
///
/// Dispatches every message to all handlers concurrently and merges their
/// ready responses into one.
#[derive(Clone, Default)]
pub struct BotSet {
    bots: Vec<Arc<dyn Handler>>,
}

impl BotSet {
    pub fn new(bots: Vec<Arc<dyn Handler>>) -> Self {
        Self { bots }
    }

    /// Help of all handlers in registration order, one newline-terminated entry each
    pub fn help(&self) -> String {
        let mut out = String::new();
        for bot in &self.bots {
            let help = bot.help();
            if help.is_empty() {
                continue;
            }
            out.push_str(&help);
            if !help.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    /// Keywords of all handlers
    pub fn react_on(&self) -> Vec<String> {
        self.bots.iter().flat_map(|b| b.react_on()).collect()
    }

    /// Run all handlers against `msg` and merge what they want to send.
    ///
    /// Lines are sorted so the merged text does not depend on which handler
    /// finished first. Pin and unpin are set if any ready response asked for
    /// them. `reply_to` is taken from the first ready response to complete
    /// that has one.
    pub async fn dispatch(&self, msg: Message) -> Response {
        if contains_fold(&HELP_TRIGGERS, &msg.text) {
            return Response::reply(self.help());
        }

        let msg = Arc::new(msg);
        let mut tasks = JoinSet::new();
        for bot in &self.bots {
            let bot = Arc::clone(bot);
            let msg = Arc::clone(&msg);
            tasks.spawn(async move { bot.on_message(&msg).await });
        }

        let mut lines = Vec::with_capacity(self.bots.len());
        let mut merged = Response::default();
        while let Some(joined) = tasks.join_next().await {
            let resp = match joined {
                Ok(resp) => resp,
                Err(e) => {
                    error!("Bot task failed: {}", e);
                    continue;
                }
            };
            if !resp.ready {
                continue;
            }

            debug!("Collect {:?}", resp.text);
            merged.pin |= resp.pin;
            merged.unpin |= resp.unpin;
            if merged.reply_to.is_none() {
                merged.reply_to = resp.reply_to;
            }
            lines.push(resp.text);
        }

        lines.sort();

        debug!("Answers {}, ready {}", lines.len(), !lines.is_empty());
        merged.ready = !lines.is_empty();
        merged.text = lines.join("\n");
        merged
    }
}

/// Whether `s`, trimmed, case-insensitively equals any entry of `list`
pub fn contains_fold<S: AsRef<str>>(list: &[S], s: &str) -> bool {
    let s = s.trim();
    list.iter()
        .any(|item| item.as_ref().to_lowercase() == s.to_lowercase())
}

/// Escape Telegram legacy markdown so the text is shown as-is.
///
/// Usernames with underscores would otherwise turn italic.
pub fn escape_markdown_v1(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build a help line from a handler's keywords and a description
pub fn help_line<S: AsRef<str>>(triggers: &[S], description: &str) -> String {
    let joined = triggers
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} _- {}_\n", escape_markdown_v1(&joined), description)
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::{Fixed, MockBot};
    use super::*;

    fn bot_with_help(help: &str) -> MockBot {
        let mut bot = MockBot::new();
        let help = help.to_string();
        bot.expect_help().returning(move || help.clone());
        bot.expect_react_on().returning(Vec::new);
        bot.expect_on_message().never();
        bot
    }

    fn answering(text: &str) -> Arc<dyn Handler> {
        Arc::new(Fixed::new(Response::reply(text)))
    }

    #[test]
    fn test_help_line() {
        assert_eq!(help_line(&["cmd"], "description"), "cmd _- description_\n");
        assert_eq!(
            help_line(&["ai!", "ии!"], "Ask something"),
            "ai!, ии! _- Ask something_\n"
        );
    }

    #[test]
    fn test_escape_markdown_v1() {
        assert_eq!(escape_markdown_v1("user_name"), "user\\_name");
        assert_eq!(escape_markdown_v1("*a* `b` [c]"), "\\*a\\* \\`b\\` \\[c]");
        assert_eq!(escape_markdown_v1("plain"), "plain");
    }

    #[test]
    fn test_contains_fold() {
        assert!(contains_fold(&HELP_TRIGGERS, "help"));
        assert!(contains_fold(&HELP_TRIGGERS, "  HELP!  "));
        assert!(contains_fold(&HELP_TRIGGERS, "/Help"));
        assert!(!contains_fold(&HELP_TRIGGERS, "help me"));
        assert!(!contains_fold(&HELP_TRIGGERS, ""));
    }

    #[test]
    fn test_help_concatenates_in_registration_order() {
        let bots = BotSet::new(vec![
            Arc::new(bot_with_help("b1 help")),
            Arc::new(bot_with_help("")),
            Arc::new(bot_with_help("b2 help\n")),
        ]);
        assert_eq!(bots.help(), "b1 help\nb2 help\n");
    }

    #[test]
    fn test_react_on_collects_all_keywords() {
        let mut b1 = MockBot::new();
        b1.expect_react_on()
            .returning(|| vec!["ai!".to_string(), "ии!".to_string()]);
        let mut b2 = MockBot::new();
        b2.expect_react_on().returning(|| vec!["wx!".to_string()]);

        let bots = BotSet::new(vec![Arc::new(b1), Arc::new(b2)]);
        assert_eq!(bots.react_on(), vec!["ai!", "ии!", "wx!"]);
    }

    #[tokio::test]
    async fn test_dispatch_help_skips_handlers() {
        let bots = BotSet::new(vec![Arc::new(bot_with_help("help"))]);

        let resp = bots.dispatch(Message::text("help")).await;
        assert!(resp.ready);
        assert_eq!(resp.text, "help\n");
    }

    #[tokio::test]
    async fn test_dispatch_combines_all_responses() {
        let mut b1 = MockBot::new();
        b1.expect_on_message().times(1).returning(|_| Response {
            text: "b1 resp".to_string(),
            ready: true,
            reply_to: Some(789),
            ..Default::default()
        });
        let mut b2 = MockBot::new();
        b2.expect_on_message()
            .times(1)
            .returning(|m| Response::reply(format!("b2 resp to {}", m.text)));

        let bots = BotSet::new(vec![Arc::new(b1), Arc::new(b2)]);
        let resp = bots.dispatch(Message::text("cmd")).await;

        assert!(resp.ready);
        assert_eq!(resp.text, "b1 resp\nb2 resp to cmd");
        assert_eq!(resp.reply_to, Some(789));
        assert!(!resp.pin);
        assert!(!resp.unpin);
    }

    #[tokio::test]
    async fn test_dispatch_text_ignores_registration_order() {
        let forward = BotSet::new(vec![answering("b1 resp"), answering("b2 resp")]);
        let backward = BotSet::new(vec![answering("b2 resp"), answering("b1 resp")]);

        let a = forward.dispatch(Message::text("cmd")).await;
        let b = backward.dispatch(Message::text("cmd")).await;
        assert_eq!(a.text, "b1 resp\nb2 resp");
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_sorts_regardless_of_completion_order() {
        let bots = BotSet::new(vec![
            Arc::new(Fixed::new(Response::reply("a first")).after(Duration::from_secs(3))),
            Arc::new(Fixed::new(Response::reply("c third")).after(Duration::from_secs(1))),
            Arc::new(Fixed::new(Response::reply("b second")).after(Duration::from_secs(2))),
        ]);

        let resp = bots.dispatch(Message::text("cmd")).await;
        assert_eq!(resp.text, "a first\nb second\nc third");
    }

    #[tokio::test]
    async fn test_dispatch_keeps_duplicates() {
        let bots = BotSet::new(vec![answering("same"), answering("same")]);

        let resp = bots.dispatch(Message::text("cmd")).await;
        assert_eq!(resp.text, "same\nsame");
    }

    #[tokio::test]
    async fn test_dispatch_skips_not_ready() {
        let bots = BotSet::new(vec![
            answering("only"),
            Arc::new(Fixed::new(Response {
                text: "hidden".to_string(),
                pin: true,
                reply_to: Some(1),
                ..Default::default()
            })),
        ]);

        let resp = bots.dispatch(Message::text("cmd")).await;
        assert!(resp.ready);
        assert_eq!(resp.text, "only");
        assert!(!resp.pin);
        assert_eq!(resp.reply_to, None);
    }

    struct Panicking;

    #[async_trait]
    impl Handler for Panicking {
        fn help(&self) -> String {
            String::new()
        }

        fn react_on(&self) -> Vec<String> {
            Vec::new()
        }

        async fn on_message(&self, _msg: &Message) -> Response {
            panic!("handler blew up");
        }
    }

    #[tokio::test]
    async fn test_dispatch_survives_panicking_handler() {
        let bots = BotSet::new(vec![Arc::new(Panicking), answering("ok")]);

        let resp = bots.dispatch(Message::text("cmd")).await;
        assert!(resp.ready);
        assert_eq!(resp.text, "ok");
    }

    #[tokio::test]
    async fn test_dispatch_nothing_ready() {
        let bots = BotSet::new(vec![Arc::new(Fixed::new(Response::silent()))]);

        let resp = bots.dispatch(Message::text("cmd")).await;
        assert_eq!(resp, Response::default());
    }

    #[tokio::test]
    async fn test_dispatch_without_bots() {
        let resp = BotSet::default().dispatch(Message::text("cmd")).await;
        assert!(!resp.ready);
        assert!(resp.text.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_merges_pin_and_unpin() {
        let bots = BotSet::new(vec![
            Arc::new(Fixed::new(Response {
                pin: true,
                ..Response::reply("pinned")
            })),
            Arc::new(Fixed::new(Response {
                unpin: true,
                ..Response::reply("unpinned")
            })),
            answering("plain"),
        ]);

        let resp = bots.dispatch(Message::text("cmd")).await;
        assert!(resp.pin);
        assert!(resp.unpin);
        assert_eq!(resp.text, "pinned\nplain\nunpinned");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_reply_to_from_first_completed() {
        let slow = Response {
            reply_to: Some(1),
            ..Response::reply("slow")
        };
        let fast = Response {
            reply_to: Some(2),
            ..Response::reply("fast")
        };
        let bots = BotSet::new(vec![
            Arc::new(Fixed::new(slow).after(Duration::from_secs(2))),
            Arc::new(Fixed::new(fast).after(Duration::from_secs(1))),
            Arc::new(Fixed::new(Response::reply("none"))),
        ]);

        let resp = bots.dispatch(Message::text("cmd")).await;
        assert_eq!(resp.reply_to, Some(2));
    }

    #[tokio::test]
    async fn test_dispatch_passes_message_to_every_bot() {
        let mut bots = Vec::<Arc<dyn Handler>>::new();
        for _ in 0..3 {
            let mut bot = MockBot::new();
            bot.expect_on_message()
                .withf(|m| m.text == "ai! hi" && m.id == 42)
                .times(1)
                .returning(|_| Response::silent());
            bots.push(Arc::new(bot));
        }

        let msg = Message {
            id: 42,
            ..Message::text("ai! hi")
        };
        let resp = BotSet::new(bots).dispatch(msg).await;
        assert!(!resp.ready);
    }
}
