pub mod config;
pub mod fetch;
pub mod list;
pub mod search;
pub mod serve;
pub mod tail;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use scrollback_core::{RateLimitedClient, ScrollbackPaths, Settings};
use tokio::sync::watch;

use crate::ui;

/// Settings from the config file plus environment overrides.
pub fn load_settings() -> Result<Settings> {
    let paths = ScrollbackPaths::from_env();
    Settings::load_with_env(&paths.config_path)
}

/// Make sure a token is available, prompting for one if needed.
pub fn ensure_token(settings: &mut Settings) -> Result<()> {
    if settings.token.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        return Ok(());
    }
    let token = ui::prompt_password("API token")?;
    if token.trim().is_empty() {
        return Err(anyhow!("An API token is required (set SCROLLBACK_TOKEN or token in the config file)"));
    }
    settings.token = Some(token.trim().to_string());
    Ok(())
}

/// HTTP client for the configured API, prompting for a token if needed.
pub fn connect(settings: &mut Settings) -> Result<RateLimitedClient> {
    ensure_token(settings)?;
    let config = settings.client_config().context("Invalid configuration")?;
    RateLimitedClient::http(config).context("Failed to create HTTP client")
}

pub fn archive_dir(settings: &Settings, dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| settings.archive_dir.clone())
}

/// Stop signal that flips to `true` on the first Ctrl-C.
pub fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
        // Hold the sender so receivers never see a closed channel.
        tx.closed().await;
    });
    rx
}
