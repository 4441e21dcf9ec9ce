mod config;
mod platform;
mod relay;
mod scheduler;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::platform::telegram::{self, TelegramMessenger};
use crate::relay::{Relay, RelaySettings};
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = config::load_dotenv()? {
        info!("Loaded environment from: {}", path.display());
    }

    // An explicit path must exist; the default one is optional.
    let explicit = std::env::args().nth(1).map(PathBuf::from);
    let required = explicit.is_some();
    let config_path = explicit.unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path, required)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let store = store::open(&config.store)?;

    info!("Configuration loaded successfully");
    info!("  Forward chat: {}", config.forward_chat_id());
    info!(
        "  Store: {} ({} record(s))",
        store.backend(),
        store.len().await?
    );
    info!("  Retention: {:?} hour(s)", config.store.retention_hours);

    let mut scheduler = match config.retention()? {
        Some(retention) => {
            let scheduler = Scheduler::new().await?;
            scheduler
                .add_prune_job(&config.store.prune_cron, store.clone(), retention)
                .await?;
            scheduler.start().await?;
            Some(scheduler)
        }
        None => None,
    };

    let bot = Bot::new(&config.telegram.bot_token);
    let bot_user_id = telegram::bot_user_id(&bot).await?;

    let relay = Arc::new(Relay::new(
        RelaySettings {
            forward_chat_id: config.forward_chat_id(),
            bot_user_id,
            greeting: config.relay.greeting.clone(),
        },
        store,
        Arc::new(TelegramMessenger::new(bot.clone())),
    ));

    info!("Bot is starting...");
    telegram::run(relay, bot).await?;

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await?;
    }

    Ok(())
}
