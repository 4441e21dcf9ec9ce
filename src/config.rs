use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::scheduler::retention_cutoff;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// The single chat every private message is relayed into.
    #[serde(default)]
    pub forward_chat_id: Option<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// SQLite file for durable correlations. Unset means in-memory only.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Records older than this are pruned. Unset keeps them forever.
    #[serde(default)]
    pub retention_hours: Option<u64>,
    #[serde(default = "default_prune_cron")]
    pub prune_cron: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_prune_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_greeting() -> String {
    "Hello! Write a message or send a photo and I will pass it on.".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retention_hours: None,
            prune_cron: default_prune_cron(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
        }
    }
}

/// Populate the process environment from `.env` in the working directory,
/// if there is one. Variables already set in the environment are kept.
pub fn load_dotenv() -> Result<Option<PathBuf>> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e).context("Failed to read .env file"),
    }
}

impl Config {
    /// Load the TOML file (if any), overlay the process environment and
    /// validate. When `required` is false a missing file is treated as empty.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        let mut config = if path.exists() || required {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Overlay values from an environment-like lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(raw) = get("FORWARD_CHAT_ID") {
            let id = raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("FORWARD_CHAT_ID is not a valid chat id: {}", raw))?;
            self.telegram.forward_chat_id = Some(id);
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.store.database_path = Some(PathBuf::from(path));
        }
        if let Some(greeting) = get("GREETING") {
            self.relay.greeting = greeting;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("Missing bot token: set BOT_TOKEN or [telegram] bot_token");
        }
        if self.telegram.forward_chat_id.is_none() {
            bail!("Missing forward chat id: set FORWARD_CHAT_ID or [telegram] forward_chat_id");
        }
        if self.store.retention_hours == Some(0) {
            bail!("[store] retention_hours must be greater than zero");
        }
        if let Some(retention) = self.retention()? {
            retention_cutoff(retention).context("[store] retention_hours is too large")?;
        }
        Ok(())
    }

    /// Configured retention as a duration, if pruning is enabled.
    pub fn retention(&self) -> Result<Option<Duration>> {
        match self.store.retention_hours {
            Some(hours) => i64::try_from(hours)
                .ok()
                .and_then(Duration::try_hours)
                .map(Some)
                .context("[store] retention_hours is too large"),
            None => Ok(None),
        }
    }

    /// Only meaningful after `validate` has passed.
    pub fn forward_chat_id(&self) -> i64 {
        self.telegram.forward_chat_id.unwrap_or_default()
    }
}
