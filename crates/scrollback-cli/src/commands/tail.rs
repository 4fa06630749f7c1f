use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use console::style;
use scrollback_core::{ArchiveSink, JsonFileSink, Snowflake, Tailer};

use crate::commands;
use crate::ui;

pub async fn run(
    channel: &str,
    label: &str,
    dir: Option<PathBuf>,
    interval: Option<u64>,
) -> Result<()> {
    let channel_id: Snowflake = channel
        .parse()
        .map_err(|_| anyhow!("Invalid channel id: {}", channel))?;

    let mut settings = commands::load_settings()?;
    let client = commands::connect(&mut settings)?;
    let interval = Duration::from_secs(interval.unwrap_or(settings.tail_interval_secs).max(1));
    let sink = JsonFileSink::for_label(commands::archive_dir(&settings, dir), label);
    let path = sink.path().to_path_buf();

    let mut tailer = Tailer::new(client, sink, channel_id, interval);
    let archived = tailer.prime().context("Failed to read existing archive")?;
    ui::info(&format!(
        "Following {} into {} ({} archived). Ctrl-C to stop.",
        channel_id,
        path.display(),
        tailer.store().len()
    ));
    if archived.is_none() {
        ui::info("Archive is empty; starting from the newest page.");
    }

    let stop = commands::stop_on_ctrl_c();
    let summary = tailer
        .run(stop, |fresh| {
            for record in fresh {
                println!(
                    "{} {} {}",
                    style(&record.sent_at).dim(),
                    style(&record.author).cyan().bold(),
                    record.body
                );
            }
        })
        .await
        .context("Tail stopped")?;

    ui::success(&format!(
        "{} new messages, {} total in {}",
        summary.inserted,
        summary.total_records,
        path.display()
    ));
    Ok(())
}
