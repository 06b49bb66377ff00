//! Configuration management.
//!
//! Settings are resolved in priority order:
//! 1. Environment variables (`CHECK_INTERVAL_MINUTES`, `DISCORD_BOT_TOKEN`, ...)
//! 2. `~/.pricewatch/config.json` (or the file given with `--config`)
//! 3. Built-in defaults
//!
//! The database lives at `~/.pricewatch/data/pricewatch.db` unless
//! `--db` or `PRICEWATCH_DB` says otherwise.

use crate::error::{Error, Result};
use crate::probe::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Get the global pricewatch directory (`~/.pricewatch`).
#[must_use]
pub fn global_pricewatch_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".pricewatch"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `PRICEWATCH_DB` environment variable
/// 3. Global location: `~/.pricewatch/data/pricewatch.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("PRICEWATCH_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_pricewatch_dir().map(|dir| dir.join("data").join("pricewatch.db"))
}

/// Resolve the config file path.
fn config_path(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(path.to_path_buf());
    }
    global_pricewatch_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

/// Contents of `config.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub check_interval_minutes: Option<u64>,
    pub max_retries: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub retry_base_delay_ms: Option<u64>,
    pub walmart_max_concurrency: Option<usize>,
    pub target_max_concurrency: Option<usize>,
    pub alert_cooldown_hours: Option<u64>,
    pub discord_bot_token: Option<String>,
    pub fallback_channel_id: Option<String>,
}

/// Load the config file. A missing file yields the defaults.
///
/// # Errors
///
/// Returns `Config` if the file exists but cannot be read or parsed.
pub fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = config_path(explicit_path)?;

    if !path.exists() {
        if explicit_path.is_some() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(FileConfig::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub check_interval: Duration,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub retry_base_delay: Duration,
    pub walmart_max_concurrency: usize,
    pub target_max_concurrency: usize,
    pub alert_cooldown: Duration,
    pub discord_bot_token: Option<String>,
    pub fallback_channel_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5 * 60),
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_millis(1000),
            walmart_max_concurrency: 4,
            target_max_concurrency: 2,
            alert_cooldown: Duration::from_secs(24 * 60 * 60),
            discord_bot_token: None,
            fallback_channel_id: None,
        }
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match env(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
    }
}

fn env_string(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key).filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Resolve settings from the process environment and config file.
    ///
    /// # Errors
    ///
    /// Returns `Config` for unreadable files or unparseable values.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let file = load_file_config(config_file)?;
        Self::from_sources(&file, |key| std::env::var(key).ok())
    }

    /// Merge an environment lookup over a file config over defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` for unparseable or out-of-range values.
    pub fn from_sources(file: &FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let interval_minutes = env_parse(&env, "CHECK_INTERVAL_MINUTES")?
            .or(file.check_interval_minutes)
            .unwrap_or(defaults.check_interval.as_secs() / 60);
        if interval_minutes == 0 {
            return Err(Error::Config(
                "CHECK_INTERVAL_MINUTES must be at least 1".into(),
            ));
        }

        let timeout_secs = env_parse(&env, "REQUEST_TIMEOUT")?
            .or(file.request_timeout_secs)
            .unwrap_or(defaults.request_timeout.as_secs());
        if timeout_secs == 0 {
            return Err(Error::Config("REQUEST_TIMEOUT must be at least 1".into()));
        }

        Ok(Self {
            check_interval: Duration::from_secs(interval_minutes * 60),
            max_retries: env_parse(&env, "MAX_RETRIES")?
                .or(file.max_retries)
                .unwrap_or(defaults.max_retries),
            request_timeout: Duration::from_secs(timeout_secs),
            retry_base_delay: env_parse(&env, "RETRY_BASE_DELAY_MS")?
                .or(file.retry_base_delay_ms)
                .map_or(defaults.retry_base_delay, Duration::from_millis),
            walmart_max_concurrency: env_parse(&env, "WALMART_MAX_CONCURRENCY")?
                .or(file.walmart_max_concurrency)
                .unwrap_or(defaults.walmart_max_concurrency)
                .max(1),
            target_max_concurrency: env_parse(&env, "TARGET_MAX_CONCURRENCY")?
                .or(file.target_max_concurrency)
                .unwrap_or(defaults.target_max_concurrency)
                .max(1),
            alert_cooldown: env_parse(&env, "ALERT_COOLDOWN_HOURS")?
                .or(file.alert_cooldown_hours)
                .map_or(defaults.alert_cooldown, |h: u64| Duration::from_secs(h * 3600)),
            discord_bot_token: env_string(&env, "DISCORD_BOT_TOKEN")
                .or_else(|| file.discord_bot_token.clone()),
            fallback_channel_id: env_string(&env, "FALLBACK_CHANNEL_ID")
                .or_else(|| file.fallback_channel_id.clone()),
        })
    }

    /// Retry policy for probes: `MAX_RETRIES` attempts with exponential
    /// backoff from `RETRY_BASE_DELAY_MS`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: self.retry_base_delay,
            max_delay: self.request_timeout,
            jitter: true,
        }
    }
}
