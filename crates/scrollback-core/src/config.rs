//! Configuration schema and loading.
//!
//! Settings live in a TOML file at `<data dir>/scrollback.toml`. A missing
//! file yields the defaults; `SCROLLBACK_TOKEN` and `SCROLLBACK_API_BASE`
//! override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ArchiveError;
use crate::scheduler::SchedulerConfig;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10/";
/// The service never returns more than this many messages per page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filesystem locations used by the CLI.
#[derive(Debug, Clone)]
pub struct ScrollbackPaths {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
}

impl ScrollbackPaths {
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os("SCROLLBACK_DATA_DIR") {
            return Self::from_base(PathBuf::from(dir));
        }
        if let Some(dirs) = directories::ProjectDirs::from("dev", "scrollback", "scrollback") {
            return Self::from_base(dirs.config_dir().to_path_buf());
        }
        Self::from_base(PathBuf::from(".scrollback"))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let config_path = base_dir.join("scrollback.toml");
        Self {
            base_dir,
            config_path,
        }
    }
}

/// User-facing settings, as stored in `scrollback.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the REST API, including the version segment.
    pub api_base_url: String,
    /// Account token. Prompted for when absent.
    pub token: Option<String>,
    /// Messages requested per page (1-100).
    pub page_size: u32,
    /// Pause after every successful page.
    pub request_delay_ms: u64,
    /// Newly inserted records between checkpoints.
    pub checkpoint_threshold: usize,
    /// Attempts for connection-level failures before a cursor gives up.
    pub max_transient_retries: u32,
    /// Cumulative rate-limit sleep a single cursor tolerates.
    pub max_rate_limit_wait_secs: u64,
    /// Where archives are written and searched.
    pub archive_dir: PathBuf,
    /// Merge into an existing archive with the same label.
    pub resume: bool,
    /// Stop the two walks from refetching each other's range.
    pub join_walks: bool,
    /// Poll interval for `tail`.
    pub tail_interval_secs: u64,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            token: None,
            page_size: MAX_PAGE_SIZE,
            request_delay_ms: 100,
            checkpoint_threshold: 200,
            max_transient_retries: 3,
            max_rate_limit_wait_secs: 600,
            archive_dir: PathBuf::from("."),
            resume: true,
            join_walks: true,
            tail_interval_secs: 10,
            user_agent: format!("scrollback/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from `path` and apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut settings = Self::load(path)?;
        settings.apply_env();
        Ok(settings)
    }

    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("SCROLLBACK_TOKEN") {
            if !token.trim().is_empty() {
                self.token = Some(token.trim().to_string());
            }
        }
        if let Ok(base) = std::env::var("SCROLLBACK_API_BASE") {
            if !base.trim().is_empty() {
                self.api_base_url = base.trim().to_string();
            }
        }
    }

    /// Build the client configuration. Fails on a missing token or bad URL.
    pub fn client_config(&self) -> std::result::Result<ClientConfig, ArchiveError> {
        let token = self
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ArchiveError::Config("missing API token".to_string()))?;

        let mut config = ClientConfig::new(&self.api_base_url, token)?;
        config.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        config.request_delay = Duration::from_millis(self.request_delay_ms);
        config.max_transient_retries = self.max_transient_retries;
        config.max_rate_limit_wait = Duration::from_secs(self.max_rate_limit_wait_secs);
        config.user_agent = self.user_agent.clone();
        config.request_timeout = Duration::from_secs(self.request_timeout_secs.max(1));
        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            checkpoint_threshold: self.checkpoint_threshold.max(1),
            resume: self.resume,
            join_walks: self.join_walks,
        }
    }

    /// Token with everything but the last four characters hidden.
    pub fn masked_token(&self) -> String {
        match self.token.as_deref() {
            None => "(not set)".to_string(),
            Some(t) if t.chars().count() <= 4 => "****".to_string(),
            Some(t) => {
                let tail: String = t.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
                format!("****{}", tail)
            }
        }
    }
}

/// Connection and pacing parameters for [`crate::client::RateLimitedClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub token: String,
    pub page_size: u32,
    pub request_delay: Duration,
    pub max_transient_retries: u32,
    pub max_rate_limit_wait: Duration,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str, token: impl Into<String>) -> std::result::Result<Self, ArchiveError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|e| ArchiveError::Config(format!("invalid API base URL {:?}: {}", base_url, e)))?;

        let defaults = Settings::default();
        Ok(Self {
            base_url,
            token: token.into(),
            page_size: defaults.page_size,
            request_delay: Duration::from_millis(defaults.request_delay_ms),
            max_transient_retries: defaults.max_transient_retries,
            max_rate_limit_wait: Duration::from_secs(defaults.max_rate_limit_wait_secs),
            user_agent: defaults.user_agent,
            request_timeout: Duration::from_secs(defaults.request_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.page_size, 100);
        assert_eq!(settings.request_delay_ms, 100);
        assert_eq!(settings.checkpoint_threshold, 200);
        assert!(settings.resume);
        assert!(settings.join_walks);
        assert!(settings.token.is_none());
    }

    #[test]
    fn test_parse_toml_partial() {
        let toml = r#"
token = "abc123"
checkpoint_threshold = 50
archive_dir = "/tmp/archives"
join_walks = false
"#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.token.as_deref(), Some("abc123"));
        assert_eq!(settings.checkpoint_threshold, 50);
        assert_eq!(settings.archive_dir, PathBuf::from("/tmp/archives"));
        assert!(!settings.scheduler_config().join_walks);
        // Unspecified fields keep their defaults.
        assert_eq!(settings.page_size, 100);
        assert!(settings.resume);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(&temp_dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings.api_base_url, DEFAULT_API_BASE);
    }

    #[test]
    fn test_load_invalid_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scrollback.toml");
        std::fs::write(&path, "page_size = \"lots\"").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_client_config_requires_token() {
        let settings = Settings::default();
        let err = settings.client_config().unwrap_err();
        assert!(matches!(err, ArchiveError::Config(_)));
    }

    #[test]
    fn test_client_config_clamps_page_size_and_normalizes_url() {
        let settings = Settings {
            token: Some("tok".into()),
            page_size: 500,
            api_base_url: "http://127.0.0.1:9000/api".into(),
            ..Settings::default()
        };
        let config = settings.client_config().unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:9000/api/");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = ClientConfig::new("not a url", "tok").unwrap_err();
        assert!(err.to_string().contains("invalid API base URL"));
    }

    #[test]
    fn test_masked_token() {
        let mut settings = Settings::default();
        assert_eq!(settings.masked_token(), "(not set)");
        settings.token = Some("abcdefgh".into());
        assert_eq!(settings.masked_token(), "****efgh");
    }
}
