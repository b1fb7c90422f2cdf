use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            channel_id      TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            user_name       TEXT NOT NULL,
            user_badge      TEXT,
            content         TEXT NOT NULL,
            timestamp_us    INTEGER NOT NULL,
            edited          INTEGER NOT NULL DEFAULT 0,
            deleted         INTEGER NOT NULL DEFAULT 0,
            reply_to        TEXT,
            -- JSON array of {emoji, userIds}, rewritten whole on each toggle
            reactions       TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, timestamp_us, seq);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
