use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

/// Upper bound on message content, counted in characters after trimming.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Upper bound on a reaction's emoji, in bytes.
pub const MAX_EMOJI_BYTES: usize = 64;

/// Content that replaces a message body once it has been deleted.
pub const REDACTED_CONTENT: &str = "[message deleted]";

/// The verified principal behind a connection or REST request.
///
/// Name and badge are a snapshot taken from the credential; messages copy them
/// at send time and never re-resolve them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
    pub badge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_ids: Vec<String>,
}

/// Whether a toggle added or removed the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_badge: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub edited: bool,
    pub deleted: bool,
    pub reply_to: Option<Uuid>,
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Build a fresh message authored by `author`. `content` must already be
    /// validated with [`validate_content`].
    pub fn new(author: &Identity, channel_id: &str, content: String, reply_to: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id: channel_id.to_string(),
            user_id: author.user_id.clone(),
            user_name: author.user_name.clone(),
            user_badge: author.badge.clone(),
            content,
            // The store keeps microseconds.
            timestamp: Utc::now().trunc_subsecs(6),
            edited: false,
            deleted: false,
            reply_to,
            reactions: Vec::new(),
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Replace the content and mark the message edited.
    pub fn edit(&mut self, content: String) {
        self.content = content;
        self.edited = true;
    }

    /// Irreversibly redact the message. Reactions are kept as history.
    pub fn redact(&mut self) {
        self.deleted = true;
        self.content = REDACTED_CONTENT.to_string();
    }

    /// Toggle `user_id`'s reaction with `emoji`.
    ///
    /// Entries keep the order in which their emoji first appeared. An entry
    /// whose last user is removed is dropped.
    pub fn toggle_reaction(&mut self, emoji: &str, user_id: &str) -> Toggle {
        match self.reactions.iter().position(|r| r.emoji == emoji) {
            None => {
                self.reactions.push(Reaction {
                    emoji: emoji.to_string(),
                    user_ids: vec![user_id.to_string()],
                });
                Toggle::Added
            }
            Some(idx) => {
                let entry = &mut self.reactions[idx];
                if let Some(pos) = entry.user_ids.iter().position(|u| u == user_id) {
                    entry.user_ids.remove(pos);
                    if entry.user_ids.is_empty() {
                        self.reactions.remove(idx);
                    }
                    Toggle::Removed
                } else {
                    entry.user_ids.push(user_id.to_string());
                    Toggle::Added
                }
            }
        }
    }
}

/// Trim and bound-check message content. Returns the trimmed text.
pub fn validate_content(content: &str) -> Result<String, ChatError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ChatError::ValidationFailed("content must not be empty".into()));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ChatError::ValidationFailed(format!(
            "content is {} characters (max {})",
            chars, MAX_CONTENT_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

/// Trim and bound-check a reaction emoji. Returns the trimmed text.
pub fn validate_emoji(emoji: &str) -> Result<String, ChatError> {
    let trimmed = emoji.trim();
    if trimmed.is_empty() {
        return Err(ChatError::ValidationFailed("emoji must not be empty".into()));
    }
    if trimmed.len() > MAX_EMOJI_BYTES {
        return Err(ChatError::ValidationFailed("emoji is too long".into()));
    }
    Ok(trimmed.to_string())
}
