use anyhow::Result;
use scrollback_core::ScrollbackPaths;

use crate::commands;
use crate::ui;

pub fn run() -> Result<()> {
    let paths = ScrollbackPaths::from_env();
    let settings = commands::load_settings()?;

    ui::header("Configuration");
    let source = if paths.config_path.exists() {
        paths.config_path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", paths.config_path.display())
    };
    ui::info(&format!("config file:      {}", source));
    ui::info(&format!("token:            {}", settings.masked_token()));

    // Everything except the token, in the same shape as the file.
    let mut shown = settings.clone();
    shown.token = None;
    let rendered = toml::to_string_pretty(&shown)?;
    println!();
    for line in rendered.lines() {
        ui::info(line);
    }
    Ok(())
}
