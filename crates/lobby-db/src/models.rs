//! Database row types. These map directly to SQLite rows and are converted
//! into `lobby_types::models::Message` at the edge of the crate.

use anyhow::{Result, anyhow};
use chrono::DateTime;
use rusqlite::Row;
use uuid::Uuid;

use lobby_types::models::{Message, Reaction};

pub const MESSAGE_COLUMNS: &str = "id, channel_id, user_id, user_name, user_badge, content, \
     timestamp_us, edited, deleted, reply_to, reactions";

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_badge: Option<String>,
    pub content: String,
    pub timestamp_us: i64,
    pub edited: bool,
    pub deleted: bool,
    pub reply_to: Option<String>,
    pub reactions: String,
}

impl MessageRow {
    /// Read a row selected with [`MESSAGE_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            user_id: row.get(2)?,
            user_name: row.get(3)?,
            user_badge: row.get(4)?,
            content: row.get(5)?,
            timestamp_us: row.get(6)?,
            edited: row.get(7)?,
            deleted: row.get(8)?,
            reply_to: row.get(9)?,
            reactions: row.get(10)?,
        })
    }

    pub fn into_message(self) -> Result<Message> {
        let id: Uuid = self
            .id
            .parse()
            .map_err(|e| anyhow!("Corrupt message id '{}': {}", self.id, e))?;
        let timestamp = DateTime::from_timestamp_micros(self.timestamp_us)
            .ok_or_else(|| anyhow!("Corrupt timestamp {} on message '{}'", self.timestamp_us, self.id))?;
        let reply_to = self
            .reply_to
            .as_deref()
            .map(str::parse::<Uuid>)
            .transpose()
            .map_err(|e| anyhow!("Corrupt reply_to on message '{}': {}", self.id, e))?;
        let reactions: Vec<Reaction> = serde_json::from_str(&self.reactions)
            .map_err(|e| anyhow!("Corrupt reactions on message '{}': {}", self.id, e))?;

        Ok(Message {
            id,
            channel_id: self.channel_id,
            user_id: self.user_id,
            user_name: self.user_name,
            user_badge: self.user_badge,
            content: self.content,
            timestamp,
            edited: self.edited,
            deleted: self.deleted,
            reply_to,
            reactions,
        })
    }
}
