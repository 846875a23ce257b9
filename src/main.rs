mod bot;
mod config;
mod listener;
mod llm;
mod message;
mod platform;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::llm_bot::LlmBot;
use crate::bot::BotSet;
use crate::config::{Args, Config};
use crate::listener::{ListenerError, TelegramListener};
use crate::llm::LlmClient;
use crate::platform::telegram::TelegramBot;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    config.apply_args(&args);

    // Initialize logging
    let default_filter = if config.telegram.debug {
        "info,relaybot=debug"
    } else {
        "info,relaybot=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;

    info!("Configuration loaded from: {}", args.config.display());
    info!("  Model: {}", config.llm.model);
    info!("  Allowed users: {:?}", config.telegram.allowed_users);
    info!("  Access denied: {}", config.telegram.access_denied);
    info!("  Idle interval: {}s", config.telegram.idle_seconds);

    let model = Arc::new(LlmClient::new(config.llm.clone())?);
    let cooldown = chrono::Duration::try_minutes(config.bot.cooldown_minutes)
        .context("Cooldown is out of range")?;
    let llm_bot = LlmBot::new(model, config.bot.triggers.clone(), cooldown);
    let bots = BotSet::new(vec![Arc::new(llm_bot)]);
    info!("Bots react on {:?}", bots.react_on());

    let telegram = TelegramBot::new(&config.telegram.bot_token);
    telegram.authorize().await?;

    let mut listener = TelegramListener::new(Arc::new(telegram), bots)
        .with_users(config.telegram.allowed_users.clone())
        .with_access_denied(config.telegram.access_denied)
        .with_idle(Duration::from_secs(config.telegram.idle_seconds));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("Shutting down...");
        shutdown.cancel();
    });

    info!("Bot is starting...");
    match listener.run(cancel).await {
        Ok(()) | Err(ListenerError::Cancelled) => Ok(()),
        Err(e) => Err(e).context("Telegram listener stopped"),
    }
}
