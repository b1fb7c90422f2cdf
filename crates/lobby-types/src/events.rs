use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Reaction};

/// Events sent FROM server TO client over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Connection admitted
    #[serde(rename = "ready", rename_all = "camelCase")]
    Ready {
        user_id: String,
        user_name: String,
        connection_id: Uuid,
    },

    /// Join acknowledgment, sent to the joining connection only
    #[serde(rename = "channel:joined", rename_all = "camelCase")]
    ChannelJoined {
        channel_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Leave acknowledgment, sent to the leaving connection only
    #[serde(rename = "channel:left", rename_all = "camelCase")]
    ChannelLeft {
        channel_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user:joined", rename_all = "camelCase")]
    UserJoined {
        channel_id: String,
        user_id: String,
        user_name: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user:left", rename_all = "camelCase")]
    UserLeft {
        channel_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message:new")]
    MessageNew(Message),

    #[serde(rename = "message:edited", rename_all = "camelCase")]
    MessageEdited {
        message_id: Uuid,
        content: String,
        edited: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted {
        message_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "reaction:updated", rename_all = "camelCase")]
    ReactionUpdated {
        message_id: Uuid,
        reactions: Vec<Reaction>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user:typing", rename_all = "camelCase")]
    UserTyping {
        user_id: String,
        user_name: String,
        channel_id: String,
    },

    #[serde(rename = "user:stopped-typing", rename_all = "camelCase")]
    UserStoppedTyping { user_id: String, channel_id: String },

    /// A command failed. Only the originating connection receives this.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "join:channel", rename_all = "camelCase")]
    JoinChannel { channel_id: String },

    #[serde(rename = "leave:channel", rename_all = "camelCase")]
    LeaveChannel { channel_id: String },

    #[serde(rename = "message:send", rename_all = "camelCase")]
    SendMessage {
        channel_id: String,
        content: String,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },

    #[serde(rename = "message:edit", rename_all = "camelCase")]
    EditMessage { message_id: Uuid, content: String },

    #[serde(rename = "message:delete", rename_all = "camelCase")]
    DeleteMessage { message_id: Uuid },

    /// Toggles the caller's reaction despite the name.
    #[serde(rename = "reaction:add", rename_all = "camelCase")]
    AddReaction { message_id: Uuid, emoji: String },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { channel_id: String },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { channel_id: String },
}

impl ClientCommand {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChannel { .. } => "join:channel",
            Self::LeaveChannel { .. } => "leave:channel",
            Self::SendMessage { .. } => "message:send",
            Self::EditMessage { .. } => "message:edit",
            Self::DeleteMessage { .. } => "message:delete",
            Self::AddReaction { .. } => "reaction:add",
            Self::TypingStart { .. } => "typing:start",
            Self::TypingStop { .. } => "typing:stop",
        }
    }
}
