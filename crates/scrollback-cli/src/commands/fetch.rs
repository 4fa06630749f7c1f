use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use scrollback_core::{
    Discovery, FetchPlan, JsonFileSink, RateLimitedClient, RunOutcome, Scheduler, Snowflake,
    TimeFrame,
};

use crate::commands;
use crate::ui;

pub struct FetchArgs {
    pub channel: Option<String>,
    pub since: Option<String>,
    pub label: Option<String>,
    pub dir: Option<PathBuf>,
    pub no_resume: bool,
}

struct Target {
    channel_id: Snowflake,
    /// Suggested archive label.
    label: Option<String>,
    /// DMs ask for a name; servers use `<server>_<channel>` as is.
    ask_label: bool,
}

pub async fn run(args: FetchArgs) -> Result<()> {
    let mut settings = commands::load_settings()?;
    let client = commands::connect(&mut settings)?;

    let target = match &args.channel {
        Some(id) => Target {
            channel_id: id
                .parse()
                .map_err(|_| anyhow!("Invalid channel id: {}", id))?,
            label: None,
            ask_label: true,
        },
        None => pick_target(&client).await?,
    };

    let since = match args.since {
        Some(since) => since,
        None => ui::prompt_input("Time frame (e.g. 12h, 7d, 2m)")?,
    };
    let cutoff = TimeFrame::parse(&since)?.cutoff()?;

    let label = match (args.label, target.label) {
        (Some(label), _) => label,
        (None, Some(suggested)) if !target.ask_label => suggested,
        (None, Some(suggested)) => ui::prompt_input_default("Archive name", &suggested)?,
        (None, None) => ui::prompt_input("Archive name")?,
    };

    let dir = commands::archive_dir(&settings, args.dir);
    let sink = JsonFileSink::for_label(&dir, &label);
    let mut config = settings.scheduler_config();
    if args.no_resume {
        config.resume = false;
    }

    let spinner = ui::spinner(&format!("Fetching messages since {}", cutoff.format("%Y-%m-%d %H:%M UTC")));
    let pb = spinner.clone();
    let mut scheduler = Scheduler::new(client, sink, config).with_progress(move |update| {
        pb.set_message(format!(
            "{} messages archived ({} new)",
            update.total_records, update.inserted
        ));
    });

    let stop = commands::stop_on_ctrl_c();
    let result = scheduler
        .run(FetchPlan::since(target.channel_id, cutoff), stop)
        .await;
    spinner.finish_and_clear();

    let summary = result.context("Fetch failed")?;
    let path = summary.archive_path.display().to_string();

    match summary.outcome {
        RunOutcome::Cancelled => {
            ui::warn(&format!(
                "Cancelled. Partial archive with {} messages saved to {}",
                summary.total_records, path
            ));
        }
        RunOutcome::Complete => {
            ui::success(&format!("{} messages saved to {}", summary.total_records, path));
            if summary.seeded > 0 {
                ui::info(&format!(
                    "{} new, {} were already archived",
                    summary.inserted, summary.seeded
                ));
            }
        }
    }

    if let Some(gap) = summary.gap {
        ui::warn(&format!(
            "Archive may be incomplete: nothing fetched between ids {} and {}",
            gap.after, gap.before
        ));
    }
    for report in [&summary.forward, &summary.backward].into_iter().flatten() {
        if let scrollback_core::CursorOutcome::Failed(reason) = &report.outcome {
            ui::error(&format!("{} walk stopped early: {}", report.direction.as_str(), reason));
        }
    }

    Ok(())
}

async fn pick_target(client: &RateLimitedClient) -> Result<Target> {
    let discovery = Discovery::new(client.clone());
    let kind = ui::prompt_choice("Fetch from", &["Direct messages", "Server channel"])?;

    if kind == 0 {
        let spinner = ui::spinner("Loading direct messages...");
        let dms = discovery.list_dms().await;
        spinner.finish_and_clear();
        let dms = dms.context("Failed to list direct messages")?;
        if dms.is_empty() {
            return Err(anyhow!("No direct message channels found"));
        }

        let labels: Vec<String> = dms.iter().map(|d| d.label.clone()).collect();
        let index = ui::prompt_select("Conversation", &labels)?;
        return Ok(Target {
            channel_id: dms[index].id,
            label: Some(dms[index].label.clone()),
            ask_label: true,
        });
    }

    let spinner = ui::spinner("Loading servers...");
    let servers = discovery.list_servers().await;
    spinner.finish_and_clear();
    let servers = servers.context("Failed to list servers")?;
    if servers.is_empty() {
        return Err(anyhow!("No servers found"));
    }
    let names: Vec<String> = servers.iter().map(|g| g.name.clone()).collect();
    let server = &servers[ui::prompt_select("Server", &names)?];

    let spinner = ui::spinner("Loading channels...");
    let channels = discovery.list_channels(server.id).await;
    spinner.finish_and_clear();
    let channels: Vec<_> = channels
        .context("Failed to list channels")?
        .into_iter()
        .filter(|c| !c.is_category())
        .collect();
    if channels.is_empty() {
        return Err(anyhow!("{} has no channels", server.name));
    }
    let names: Vec<String> = channels.iter().map(|c| format!("#{}", c.name)).collect();
    let channel = &channels[ui::prompt_select("Channel", &names)?];

    Ok(Target {
        channel_id: channel.id,
        label: Some(format!("{}_{}", server.name, channel.name)),
        ask_label: false,
    })
}
