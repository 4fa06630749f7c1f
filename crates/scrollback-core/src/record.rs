//! Archived message records and the raw API shapes they are built from.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::snowflake::Snowflake;

/// One archived message.
///
/// Field names on disk follow the archive format consumed by the search
/// front end: `{id, username, message, img, time_sent}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Snowflake,
    /// Display name at capture time.
    #[serde(rename = "username")]
    pub author: String,
    #[serde(rename = "message", default)]
    pub body: String,
    /// First attachment only. `None` is written as `null`.
    #[serde(rename = "img", default)]
    pub attachment_url: Option<String>,
    /// ISO-8601 timestamp as sent by the service.
    #[serde(rename = "time_sent")]
    pub sent_at: String,
}

impl MessageRecord {
    /// Parsed `sent_at`, if it is valid RFC 3339.
    pub fn sent_instant(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.sent_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment_url.is_some()
    }
}

// --- Raw API types ---

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: Option<Snowflake>,
    pub author: Option<RawAuthor>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAuthor {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAttachment {
    pub url: String,
}

impl RawMessage {
    /// Normalize into an archive record.
    ///
    /// Returns `None` when the message lacks an id, author or timestamp.
    pub fn into_record(self) -> Option<MessageRecord> {
        let id = self.id?;
        let author = self.author?.username;
        let sent_at = self.timestamp?;
        Some(MessageRecord {
            id,
            author,
            body: self.content.unwrap_or_default(),
            attachment_url: self.attachments.into_iter().next().map(|a| a.url),
            sent_at,
        })
    }
}

static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\-]").expect("static regex"));

/// Archive filename for a user-supplied label.
///
/// Every character outside `[A-Za-z0-9_-]` is replaced with `_`, one for one,
/// and `.json` is appended once.
pub fn archive_filename(label: &str) -> String {
    let stem = label.strip_suffix(".json").unwrap_or(label);
    let sanitized = DISALLOWED.replace_all(stem, "_");
    if sanitized.is_empty() {
        "archive.json".to_string()
    } else {
        format!("{}.json", sanitized)
    }
}
