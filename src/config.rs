//! Configuration loader and validator for the summary relay.
use crate::ledger::BatchLimits;
use crate::model::Destination;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub retry: Retry,
    pub generation: Generation,
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub telegram: Option<Telegram>,
    #[serde(default)]
    pub socialbu: Option<SocialBu>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_min_batch")]
    pub min_batch: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_one")]
    pub max_batches_per_cycle: usize,
    #[serde(default = "default_batch_pause")]
    pub batch_pause_seconds: u64,
    /// Time budget spread across the items posted in one cycle.
    #[serde(default = "default_posting_window")]
    pub posting_window_seconds: u64,
    #[serde(default = "default_destination_pause")]
    pub destination_pause_seconds: u64,
    /// Stop retrying a destination for an item after this many failed
    /// delivery cycles. `0` retries forever.
    #[serde(default = "default_abandon_after")]
    pub abandon_after_failures: u32,
}

/// Fixed-count, fixed-delay retry settings for network calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retry {
    pub attempts: u32,
    pub delay_seconds: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_seconds: 5,
        }
    }
}

/// Text generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Generation {
    pub api_key: String,
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub style: Option<String>,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Numeric chat ids or `@channel` usernames.
    pub chat_ids: Vec<String>,
}

/// SocialBu account used for the twitter and facebook destinations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocialBu {
    #[serde(default = "default_socialbu_base_url")]
    pub base_url: String,
    pub email: String,
    pub password: String,
}

fn default_min_batch() -> usize {
    2
}
fn default_max_batch() -> usize {
    5
}
fn default_one() -> usize {
    1
}
fn default_batch_pause() -> u64 {
    30
}
fn default_posting_window() -> u64 {
    20 * 60
}
fn default_destination_pause() -> u64 {
    2
}
fn default_abandon_after() -> u32 {
    10
}
fn default_generation_base_url() -> String {
    "https://api.anthropic.com/".into()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_socialbu_base_url() -> String {
    "https://socialbu.com/api/v1/".into()
}

impl Config {
    /// Ensure the data directory tree exists.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [
            self.data_dir(),
            self.summaries_dir(),
            self.salvage_dir(),
            self.raw_responses_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.data_dir)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir().join("queue.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir().join("ledger.json")
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.data_dir().join("summaries")
    }

    pub fn salvage_dir(&self) -> PathBuf {
        self.data_dir().join("salvage")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    pub fn daily_log_path(&self) -> PathBuf {
        self.logs_dir().join("daily_log.json")
    }

    pub fn raw_responses_dir(&self) -> PathBuf {
        self.logs_dir().join("raw_responses")
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            min: self.app.min_batch,
            max: self.app.max_batch,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.attempts,
            Duration::from_secs(self.retry.delay_seconds),
        )
    }

    /// Replace secrets with values from the environment when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("GENERATION_API_KEY") {
            self.generation.api_key = v;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            if let Some(tg) = self.telegram.as_mut() {
                tg.bot_token = v;
            }
        }
        if let Some(sb) = self.socialbu.as_mut() {
            if let Some(v) = get("SOCIALBU_EMAIL") {
                sb.email = v;
            }
            if let Some(v) = get("SOCIALBU_PASSWORD") {
                sb.password = v;
            }
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides, and
/// validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.min_batch == 0 {
        return Err(ConfigError::Invalid("app.min_batch must be > 0"));
    }
    if cfg.app.max_batch < cfg.app.min_batch {
        return Err(ConfigError::Invalid("app.max_batch must be >= app.min_batch"));
    }
    if cfg.retry.attempts == 0 {
        return Err(ConfigError::Invalid("retry.attempts must be > 0"));
    }

    if cfg.generation.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("generation.api_key must be non-empty"));
    }
    if cfg.generation.model.trim().is_empty() {
        return Err(ConfigError::Invalid("generation.model must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.generation.base_url).is_err() {
        return Err(ConfigError::Invalid("generation.base_url must be a valid URL"));
    }

    if cfg.destinations.is_empty() {
        return Err(ConfigError::Invalid("destinations must list at least one destination"));
    }
    if cfg.destinations.contains(&Destination::Telegram) {
        let Some(tg) = cfg.telegram.as_ref() else {
            return Err(ConfigError::Invalid("telegram section is required for the telegram destination"));
        };
        if tg.bot_token.trim().is_empty() {
            return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
        }
        if tg.chat_ids.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid("telegram.chat_ids must list at least one chat"));
        }
    }
    let needs_socialbu = cfg
        .destinations
        .iter()
        .any(|d| matches!(d, Destination::Twitter | Destination::Facebook));
    if needs_socialbu {
        let Some(sb) = cfg.socialbu.as_ref() else {
            return Err(ConfigError::Invalid("socialbu section is required for twitter/facebook"));
        };
        if sb.email.trim().is_empty() {
            return Err(ConfigError::Invalid("socialbu.email must be non-empty"));
        }
        if sb.password.trim().is_empty() {
            return Err(ConfigError::Invalid("socialbu.password must be non-empty"));
        }
        if reqwest::Url::parse(&sb.base_url).is_err() {
            return Err(ConfigError::Invalid("socialbu.base_url must be a valid URL"));
        }
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  min_batch: 2
  max_batch: 5
  max_batches_per_cycle: 1
  batch_pause_seconds: 30
  posting_window_seconds: 1200
  destination_pause_seconds: 2
  abandon_after_failures: 10

retry:
  attempts: 3
  delay_seconds: 5

generation:
  api_key: "YOUR_GENERATION_API_KEY"
  base_url: "https://api.anthropic.com/"
  model: "claude-3-7-sonnet-20250219"
  max_tokens: 4000
  temperature: 0.7
  style: "casual"

destinations:
  - telegram
  - twitter
  - facebook

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  chat_ids:
    - "-1001234567890"
    - "@my_channel"

socialbu:
  base_url: "https://socialbu.com/api/v1/"
  email: "you@example.com"
  password: "YOUR_SOCIALBU_PASSWORD"
"#
}
