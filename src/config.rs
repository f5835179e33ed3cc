//! Configuration loader and validator for the feedsync daemon.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
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

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub inoreader: Inoreader,
    pub sync: Sync,
    pub extraction: Extraction,
    pub summarizer: Summarizer,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub bind_addr: String,
    /// Times of day (24h "HH:MM", local time) at which scheduled syncs run.
    pub sync_times: Vec<String>,
}

/// Remote reader API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inoreader {
    pub base_url: String,
    /// Path to the file holding the OAuth access token.
    pub token_file: String,
    pub app_id: String,
    pub app_key: String,
}

/// Sync policy knobs. Retry figures are policy, not contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sync {
    /// Global ceiling on articles imported per pass.
    pub max_articles: usize,
    /// Per-feed ceiling within one pass.
    pub max_articles_per_feed: usize,
    /// Item identifiers per batched edit-tag call.
    pub queue_batch_size: usize,
    /// First retry delay for a failed queue entry, doubled per attempt.
    pub retry_base_minutes: i64,
    /// Attempts after which an entry is parked (kept, never auto-retried).
    pub max_retry_attempts: i32,
    /// Daily call budgets tracked per remote quota zone.
    pub zone1_daily_limit: i64,
    pub zone2_daily_limit: i64,
}

/// Content extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Extraction {
    /// Base URL of the external readability service.
    pub service_url: String,
    pub timeout_seconds: u64,
}

/// Hosted LLM summarizer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summarizer {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }
    if cfg.app.sync_times.is_empty() {
        return Err(ConfigError::Invalid("app.sync_times must not be empty"));
    }
    for t in &cfg.app.sync_times {
        if parse_time_of_day(t).is_none() {
            return Err(ConfigError::Invalid("app.sync_times entries must be HH:MM"));
        }
    }

    if cfg.inoreader.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("inoreader.base_url must be non-empty"));
    }
    if cfg.inoreader.token_file.trim().is_empty() {
        return Err(ConfigError::Invalid("inoreader.token_file must be non-empty"));
    }
    if cfg.inoreader.app_id.trim().is_empty() {
        return Err(ConfigError::Invalid("inoreader.app_id must be non-empty"));
    }
    if cfg.inoreader.app_key.trim().is_empty() {
        return Err(ConfigError::Invalid("inoreader.app_key must be non-empty"));
    }

    if cfg.sync.max_articles == 0 {
        return Err(ConfigError::Invalid("sync.max_articles must be > 0"));
    }
    if cfg.sync.max_articles_per_feed == 0 {
        return Err(ConfigError::Invalid("sync.max_articles_per_feed must be > 0"));
    }
    if cfg.sync.queue_batch_size == 0 {
        return Err(ConfigError::Invalid("sync.queue_batch_size must be > 0"));
    }
    if cfg.sync.retry_base_minutes <= 0 {
        return Err(ConfigError::Invalid("sync.retry_base_minutes must be > 0"));
    }
    if cfg.sync.max_retry_attempts <= 0 {
        return Err(ConfigError::Invalid("sync.max_retry_attempts must be > 0"));
    }

    if cfg.extraction.service_url.trim().is_empty() {
        return Err(ConfigError::Invalid("extraction.service_url must be non-empty"));
    }
    if cfg.extraction.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("extraction.timeout_seconds must be > 0"));
    }

    if cfg.summarizer.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("summarizer.base_url must be non-empty"));
    }
    if cfg.summarizer.model.trim().is_empty() {
        return Err(ConfigError::Invalid("summarizer.model must be non-empty"));
    }
    if cfg.summarizer.max_tokens == 0 {
        return Err(ConfigError::Invalid("summarizer.max_tokens must be > 0"));
    }
    // summarizer.api_key may be empty; summarize requests then fail with a
    // typed missing-key error instead of refusing to boot the daemon.

    Ok(())
}

/// Parse "HH:MM" into (hour, minute). Returns None when out of range.
pub fn parse_time_of_day(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// Returns a complete example YAML document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "127.0.0.1:8080"
  sync_times:
    - "02:00"
    - "14:00"

inoreader:
  base_url: "https://www.inoreader.com/reader/api/0/"
  token_file: "./data/inoreader_token"
  app_id: "YOUR_APP_ID"
  app_key: "YOUR_APP_KEY"

sync:
  max_articles: 100
  max_articles_per_feed: 10
  queue_batch_size: 50
  retry_base_minutes: 10
  max_retry_attempts: 3
  zone1_daily_limit: 100
  zone2_daily_limit: 100

extraction:
  service_url: "http://127.0.0.1:3000/extract"
  timeout_seconds: 10

summarizer:
  base_url: "https://api.anthropic.com/"
  api_key: "YOUR_API_KEY"
  model: "claude-sonnet-4-20250514"
  max_tokens: 400
  timeout_seconds: 30
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_sync_times() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.sync_times = vec!["25:00".into()];
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("sync_times")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.sync_times.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_inoreader_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.inoreader.app_id = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("app_id")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.inoreader.token_file = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_sync_policy() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.max_articles = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.max_retry_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.queue_batch_size = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_api_key_is_allowed() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.summarizer.api_key = "".into();
        validate(&cfg).unwrap();
    }

    #[test]
    fn parse_time_of_day_bounds() {
        assert_eq!(parse_time_of_day("02:00"), Some((2, 0)));
        assert_eq!(parse_time_of_day("23:59"), Some((23, 59)));
        assert_eq!(parse_time_of_day("24:00"), None);
        assert_eq!(parse_time_of_day("12:60"), None);
        assert_eq!(parse_time_of_day("noon"), None);
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.sync.max_articles_per_feed, 10);
    }
}
