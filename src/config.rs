use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the listener does with messages from users outside the allow-list
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AccessDeniedMode {
    /// Drop the message and only log it
    #[default]
    Ignore,
    /// Answer with an "Access denied" reply
    Reply,
}

impl std::fmt::Display for AccessDeniedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessDeniedMode::Ignore => write!(f, "ignore"),
            AccessDeniedMode::Reply => write!(f, "reply"),
        }
    }
}

/// Command line and environment overrides for the config file
#[derive(Parser, Debug, Default)]
#[command(version, about = "Relays Telegram messages to a set of bots")]
pub struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Telegram bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    /// API key of the chat completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Comma separated usernames allowed to use the bot; unset means everyone
    #[arg(long, env = "BOT_USERS")]
    pub users: Option<String>,

    /// Reaction to users outside the allow-list
    #[arg(long, env = "BOT_ACCESS_DENIED", value_enum)]
    pub access_denied: Option<AccessDeniedMode>,

    /// Verbose logging
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Usernames allowed to talk to the bot; empty allows everyone
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub access_denied: AccessDeniedMode,
    /// Seconds without activity before bots get an "idle" message
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    #[serde(default)]
    pub debug: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_users: Vec::new(),
            access_denied: AccessDeniedMode::default(),
            idle_seconds: default_idle_seconds(),
            debug: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Extra system prompt added to every new conversation
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            prompt: String::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Minimum minutes between two model calls
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            triggers: default_triggers(),
        }
    }
}

fn default_idle_seconds() -> u64 {
    30
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_cooldown_minutes() -> i64 {
    30
}

fn default_triggers() -> Vec<String> {
    vec!["ai!".to_string(), "ии!".to_string()]
}

/// Split a comma separated user list, dropping blanks and leading '@'
pub fn parse_users(users: &str) -> Vec<String> {
    users
        .split(',')
        .map(|u| u.trim().trim_start_matches('@'))
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load the config file if it exists, otherwise start from defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Command line and environment win over the file
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(token) = &args.bot_token {
            self.telegram.bot_token = token.clone();
        }
        if let Some(key) = &args.api_key {
            self.llm.api_key = key.clone();
        }
        if let Some(users) = &args.users {
            self.telegram.allowed_users = parse_users(users);
        }
        if let Some(mode) = args.access_denied {
            self.telegram.access_denied = mode;
        }
        if args.debug {
            self.telegram.debug = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("Telegram bot token is empty");
        }
        if self.llm.api_key.trim().is_empty() {
            anyhow::bail!("LLM API key is empty");
        }
        if self.telegram.idle_seconds == 0 {
            anyhow::bail!("Idle interval must be at least one second");
        }
        if self.llm.max_tokens == 0 {
            anyhow::bail!("LLM max tokens must be positive");
        }
        if self.bot.cooldown_minutes < 0 {
            anyhow::bail!("Cooldown must not be negative");
        }
        if chrono::TimeDelta::try_minutes(self.bot.cooldown_minutes).is_none() {
            anyhow::bail!("Cooldown of {} minutes is out of range", self.bot.cooldown_minutes);
        }
        if self.bot.triggers.iter().all(|t| t.trim().is_empty()) {
            anyhow::bail!("At least one bot trigger is required");
        }
        Ok(())
    }
}
