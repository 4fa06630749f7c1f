use std::path::PathBuf;

use anyhow::{Context, Result};
use console::style;
use scrollback_core::{ArchiveIndex, MAX_RESULTS};

use crate::commands;
use crate::ui;

pub fn run(query: &str, dir: Option<PathBuf>, json: bool) -> Result<()> {
    let settings = commands::load_settings()?;
    let dir = commands::archive_dir(&settings, dir);
    let index = ArchiveIndex::load_dir(&dir)
        .with_context(|| format!("Failed to read archives in {}", dir.display()))?;

    let results = index.search(query);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        ui::info(&format!(
            "No matches in {} messages across {} archives",
            index.len(),
            index.files().len()
        ));
        return Ok(());
    }

    for hit in &results {
        let record = &hit.record;
        println!(
            "{} {} {}",
            style(&record.sent_at).dim(),
            style(&record.author).cyan().bold(),
            style(format!("[{}]", hit.source)).dim()
        );
        if !record.body.is_empty() {
            println!("    {}", record.body);
        }
        if let Some(url) = &record.attachment_url {
            println!("    {}", style(url).underlined());
        }
    }

    println!();
    if results.len() == MAX_RESULTS {
        ui::info(&format!("Showing the first {} matches; narrow the query for more", MAX_RESULTS));
    } else {
        ui::info(&format!("{} matches", results.len()));
    }
    Ok(())
}
