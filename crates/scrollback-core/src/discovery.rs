//! Listing the conversations an account can read.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::RateLimitedClient;
use crate::error::Result;
use crate::snowflake::Snowflake;

const CHANNEL_TYPE_DM: u8 = 1;
const CHANNEL_TYPE_CATEGORY: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DmChannel {
    pub id: Snowflake,
    /// Recipient for one-to-one DMs, the group name (or "Group DM") otherwise.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildChannel {
    pub id: Snowflake,
    pub name: String,
    pub kind: u8,
}

impl GuildChannel {
    /// Categories only group other channels and hold no messages.
    pub fn is_category(&self) -> bool {
        self.kind == CHANNEL_TYPE_CATEGORY
    }
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    id: Snowflake,
    #[serde(rename = "type", default)]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    recipients: Vec<RawRecipient>,
}

#[derive(Debug, Deserialize)]
struct RawRecipient {
    username: String,
}

impl RawChannel {
    fn dm_label(&self) -> String {
        if self.kind == CHANNEL_TYPE_DM {
            if let Some(recipient) = self.recipients.first() {
                return recipient.username.clone();
            }
        }
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => "Group DM".to_string(),
        }
    }
}

/// Account-level listing calls, sharing the fetch client's retry policy.
#[derive(Clone)]
pub struct Discovery {
    client: RateLimitedClient,
}

impl Discovery {
    pub fn new(client: RateLimitedClient) -> Self {
        Self { client }
    }

    pub async fn list_dms(&self) -> Result<Vec<DmChannel>> {
        let raw: Vec<RawChannel> = self.client.get_json("users/@me/channels").await?;
        debug!(count = raw.len(), "listed DM channels");
        Ok(raw
            .into_iter()
            .map(|c| DmChannel {
                id: c.id,
                label: c.dm_label(),
            })
            .collect())
    }

    pub async fn list_servers(&self) -> Result<Vec<Guild>> {
        let guilds: Vec<Guild> = self.client.get_json("users/@me/guilds").await?;
        debug!(count = guilds.len(), "listed servers");
        Ok(guilds)
    }

    pub async fn list_channels(&self, guild_id: Snowflake) -> Result<Vec<GuildChannel>> {
        let raw: Vec<RawChannel> = self
            .client
            .get_json(&format!("guilds/{}/channels", guild_id))
            .await?;
        debug!(guild = %guild_id, count = raw.len(), "listed channels");
        Ok(raw
            .into_iter()
            .map(|c| GuildChannel {
                id: c.id,
                name: c.name.unwrap_or_else(|| c.id.to_string()),
                kind: c.kind,
            })
            .collect())
    }
}
