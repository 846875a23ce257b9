use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing::{info, warn};

use crate::bot::rate_limit::Cooldown;
use crate::bot::{help_line, Handler};
use crate::llm::LanguageModel;
use crate::message::{Message, Response};

/// Bot that forwards prefixed questions to a language model.
///
/// Model calls are rate limited: after a successful answer the bot refuses
/// further questions until the cooldown window has passed.
pub struct LlmBot {
    model: Arc<dyn LanguageModel>,
    triggers: Vec<String>,
    cooldown: Cooldown,
}

impl LlmBot {
    pub fn new(model: Arc<dyn LanguageModel>, triggers: Vec<String>, window: Duration) -> Self {
        Self::with_cooldown(model, triggers, Cooldown::new(window))
    }

    pub fn with_cooldown(
        model: Arc<dyn LanguageModel>,
        triggers: Vec<String>,
        cooldown: Cooldown,
    ) -> Self {
        info!("LLM bot reacting on {:?}", triggers);
        Self {
            model,
            triggers,
            cooldown,
        }
    }

    /// The question after the first matching trigger prefix
    fn request<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.triggers
            .iter()
            .filter(|t| !t.is_empty())
            .find_map(|t| text.strip_prefix(t.as_str()))
            .map(str::trim)
    }
}

#[async_trait]
impl Handler for LlmBot {
    fn help(&self) -> String {
        help_line(&self.triggers, "Ask something to ChatGPT")
    }

    fn react_on(&self) -> Vec<String> {
        self.triggers.clone()
    }

    async fn on_message(&self, msg: &Message) -> Response {
        let Some(request) = self.request(&msg.text) else {
            return Response::silent();
        };

        if let Some(left) = self.cooldown.remaining() {
            warn!(
                "LLM bot is too busy, last request was {}s ago, {} has to wait",
                self.cooldown
                    .since_last()
                    .map(|d| d.num_seconds())
                    .unwrap_or(0),
                msg.from.username
            );
            return Response {
                reply_to: Some(msg.id),
                ..Response::reply(format!(
                    "Too many requests, the next request can be made in {} minutes.",
                    left.num_minutes()
                ))
            };
        }

        let key = format!("{}:{}", msg.from.id, msg.chat_id().unwrap_or_default());
        let answer = match self.model.generate(&key, request).await {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => {
                warn!("Empty answer from model for {:?}", request);
                return Response::silent();
            }
            Err(e) => {
                warn!("Failed to get an answer for {:?}: {:#}", request, e);
                return Response::silent();
            }
        };

        self.cooldown.mark();

        let in_private = msg
            .chat
            .as_ref()
            .map(|c| !c.kind.needs_reply_link())
            .unwrap_or(false);

        Response {
            reply_to: if in_private { None } else { Some(msg.id) },
            ..Response::reply(answer)
        }
    }
}
