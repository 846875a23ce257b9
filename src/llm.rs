use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::LlmConfig;

/// System directive every conversation starts with
const BREVITY_DIRECTIVE: &str = "You answer with no more than 50 words";

/// Requests longer than this many bytes are cut
const MAX_REQUEST_LEN: usize = 14000;

/// User and assistant messages kept per conversation, on top of the system seed
const MAX_HISTORY_TURNS: usize = 20;

/// A language model that keeps its own conversation history per key
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Answer `request` in the conversation identified by `key`
    async fn generate(&self, key: &str, request: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
///
/// History lives in memory only and is lost on restart.
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    histories: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        debug!(
            "LLM client with model={}, prompt={:?}, max_tokens={}",
            config.model, config.prompt, config.max_tokens
        );

        Ok(Self {
            client,
            config,
            histories: RwLock::new(HashMap::new()),
        })
    }

    fn seed_history(&self) -> Vec<ChatMessage> {
        let mut history = vec![ChatMessage::new("system", BREVITY_DIRECTIVE)];
        if !self.config.prompt.is_empty() {
            history.push(ChatMessage::new("system", self.config.prompt.as_str()));
        }
        history
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        debug!("Sending request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion API error ({}): {}", status, error_body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .context("No choices in response")?
            .message
            .content
            .unwrap_or_default();

        if content.is_empty() {
            anyhow::bail!("Empty response");
        }

        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn generate(&self, key: &str, request: &str) -> Result<String> {
        let existing = self.histories.read().await.get(key).cloned();
        let mut history = existing.unwrap_or_else(|| self.seed_history());

        history.push(ChatMessage::new("user", truncate(request, MAX_REQUEST_LEN)));

        let answer = self.chat(&history).await?;

        history.push(ChatMessage::new("assistant", answer.as_str()));
        trim_history(&mut history, MAX_HISTORY_TURNS);
        self.histories
            .write()
            .await
            .insert(key.to_string(), history);

        Ok(answer)
    }
}

/// Drop the oldest exchanges so at most `max_turns` messages follow the system seed
fn trim_history(history: &mut Vec<ChatMessage>, max_turns: usize) {
    let seed = history.iter().take_while(|m| m.role == "system").count();
    let excess = history.len().saturating_sub(seed + max_turns);
    if excess > 0 {
        history.drain(seed..seed + excess);
    }
}

/// Cut `text` to at most `max_len` bytes without splitting a character
fn truncate(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
