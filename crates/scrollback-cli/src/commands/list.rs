use anyhow::{anyhow, Context, Result};
use scrollback_core::{Discovery, Snowflake};

use crate::commands;
use crate::ui;

async fn discovery() -> Result<Discovery> {
    let mut settings = commands::load_settings()?;
    let client = commands::connect(&mut settings)?;
    Ok(Discovery::new(client))
}

pub async fn dms() -> Result<()> {
    let dms = discovery()
        .await?
        .list_dms()
        .await
        .context("Failed to list direct messages")?;

    ui::header("Direct messages");
    for (i, dm) in dms.iter().enumerate() {
        ui::row(i, &dm.label, &dm.id.to_string());
    }
    Ok(())
}

pub async fn servers() -> Result<()> {
    let servers = discovery()
        .await?
        .list_servers()
        .await
        .context("Failed to list servers")?;

    ui::header("Servers");
    for (i, guild) in servers.iter().enumerate() {
        ui::row(i, &guild.name, &guild.id.to_string());
    }
    Ok(())
}

pub async fn channels(guild_id: &str) -> Result<()> {
    let guild_id: Snowflake = guild_id
        .parse()
        .map_err(|_| anyhow!("Invalid server id: {}", guild_id))?;
    let channels = discovery()
        .await?
        .list_channels(guild_id)
        .await
        .context("Failed to list channels")?;

    ui::header("Channels");
    for (i, channel) in channels.iter().filter(|c| !c.is_category()).enumerate() {
        ui::row(i, &format!("#{}", channel.name), &channel.id.to_string());
    }
    Ok(())
}
