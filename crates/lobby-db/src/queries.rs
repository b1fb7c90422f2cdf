use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

use lobby_types::ChatError;
use lobby_types::models::Message;

use crate::Database;
use crate::models::{MESSAGE_COLUMNS, MessageRow};

impl Database {
    // -- Messages --

    /// Append a message to its channel's log.
    ///
    /// A `reply_to` must name a message in the same channel; otherwise the
    /// insert is refused with `ChatError::ValidationFailed`.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let reactions = serde_json::to_string(&message.reactions)?;
        self.with_conn(|conn| {
            if let Some(parent) = message.reply_to {
                let parent_channel: Option<String> = conn
                    .query_row(
                        "SELECT channel_id FROM messages WHERE id = ?1",
                        [parent.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;

                if parent_channel.as_deref() != Some(message.channel_id.as_str()) {
                    return Err(ChatError::ValidationFailed(
                        "replyTo must reference a message in the same channel".into(),
                    )
                    .into());
                }
            }

            conn.execute(
                "INSERT INTO messages (id, channel_id, user_id, user_name, user_badge, content, timestamp_us, edited, deleted, reply_to, reactions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    message.id.to_string(),
                    message.channel_id,
                    message.user_id,
                    message.user_name,
                    message.user_badge,
                    message.content,
                    message.timestamp.timestamp_micros(),
                    message.edited,
                    message.deleted,
                    message.reply_to.map(|id| id.to_string()),
                    reactions,
                ],
            )?;
            Ok(())
        })
    }

    /// One page of a channel's log, oldest first.
    ///
    /// Returns up to `limit` messages strictly older than `before` (or the
    /// newest messages when `before` is `None`). Deleted messages are included
    /// in their redacted form.
    pub fn get_messages(
        &self,
        channel_id: &str,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, channel_id, before, limit))
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Apply `f` to one message as a single atomic read-modify-write.
    ///
    /// The load, `f`, and the write-back share one IMMEDIATE transaction
    /// while the connection lock is held, so concurrent mutations of the same
    /// message are applied one after another. If `f` fails nothing is written.
    /// Only `content`, `edited`, `deleted` and `reactions` are persisted back.
    pub fn mutate_message<F, T>(&self, id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut Message) -> Result<T>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut message = query_message(&tx, id)?.ok_or(ChatError::NotFound)?;
            let outcome = f(&mut message)?;

            let reactions = serde_json::to_string(&message.reactions)?;
            tx.execute(
                "UPDATE messages SET content = ?2, edited = ?3, deleted = ?4, reactions = ?5 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    message.content,
                    message.edited,
                    message.deleted,
                    reactions,
                ],
            )?;
            tx.commit()?;

            Ok(outcome)
        })
    }
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    let row = conn
        .query_row(&sql, [id.to_string()], MessageRow::from_row)
        .optional()?;

    row.map(MessageRow::into_message).transpose()
}

fn query_messages(
    conn: &Connection,
    channel_id: &str,
    before: Option<DateTime<Utc>>,
    limit: u32,
) -> Result<Vec<Message>> {
    // Newest-first so LIMIT keeps the page adjacent to the cursor; seq breaks
    // timestamp ties in insertion order.
    let sql = format!(
        "SELECT {}
         FROM messages
         WHERE channel_id = ?1 AND (?2 IS NULL OR timestamp_us < ?2)
         ORDER BY timestamp_us DESC, seq DESC
         LIMIT ?3",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(
            rusqlite::params![channel_id, before.map(|t| t.timestamp_micros()), limit],
            MessageRow::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut messages = rows
        .into_iter()
        .map(MessageRow::into_message)
        .collect::<Result<Vec<_>>>()?;
    messages.reverse();

    Ok(messages)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
