use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "scrollback")]
#[command(about = "Archive and search channel history.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a channel's history into a JSON archive
    Fetch {
        /// Channel id. If omitted, shows an interactive picker.
        #[arg(long, value_name = "ID")]
        channel: Option<String>,

        /// How far back to go: <number><h|d|m>, e.g. 12h, 7d, 2m
        #[arg(long, value_name = "FRAME")]
        since: Option<String>,

        /// Archive name (sanitized into the filename)
        #[arg(long)]
        label: Option<String>,

        /// Directory for the archive (defaults to archive_dir from config)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Ignore an existing archive instead of merging into it
        #[arg(long)]
        no_resume: bool,
    },

    /// List direct message channels
    Dms,

    /// List servers
    Servers,

    /// List the channels of a server
    Channels {
        #[arg(value_name = "SERVER_ID")]
        guild_id: String,
    },

    /// Follow a channel and append new messages to its archive
    Tail {
        #[arg(long, value_name = "ID")]
        channel: String,

        #[arg(long)]
        label: String,

        #[arg(long)]
        dir: Option<PathBuf>,

        /// Seconds between polls (defaults to tail_interval_secs from config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Search archived messages
    Search {
        /// Query, e.g. `from:alice contains:(release notes) has:image_true`
        #[arg(value_name = "QUERY")]
        query: Vec<String>,

        #[arg(long)]
        dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve archive search over HTTP
    Serve {
        #[arg(long)]
        dir: Option<PathBuf>,

        #[arg(long, default_value = "5000")]
        port: u16,
    },

    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so archives piped from stdout stay clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            channel,
            since,
            label,
            dir,
            no_resume,
        } => {
            commands::fetch::run(commands::fetch::FetchArgs {
                channel,
                since,
                label,
                dir,
                no_resume,
            })
            .await
        }
        Commands::Dms => commands::list::dms().await,
        Commands::Servers => commands::list::servers().await,
        Commands::Channels { guild_id } => commands::list::channels(&guild_id).await,
        Commands::Tail {
            channel,
            label,
            dir,
            interval,
        } => commands::tail::run(&channel, &label, dir, interval).await,
        Commands::Search { query, dir, json } => {
            commands::search::run(&query.join(" "), dir, json)
        }
        Commands::Serve { dir, port } => commands::serve::run(dir, port),
        Commands::Config => commands::config::run(),
    }
}
