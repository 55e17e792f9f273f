use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Schema for the singleton directory store. Timestamps are Unix
/// seconds throughout.
pub fn directory(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS user (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            first_name  TEXT NOT NULL,
            last_name   TEXT NOT NULL,
            avatar      TEXT,
            created_at  INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS channel (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT,
            is_private  INTEGER NOT NULL DEFAULT 0,
            created_at  INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS channel_user (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channel(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE(channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_user_user
            ON channel_user(user_id);

        CREATE TABLE IF NOT EXISTS session (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES user(id) ON DELETE CASCADE,
            created_at  INTEGER NOT NULL DEFAULT (unixepoch()),
            expires_at  INTEGER NOT NULL
        );
        ",
    )?;

    info!("directory migrations complete");
    Ok(())
}

/// Schema for one channel actor's store.
pub fn channel(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS message (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            content     TEXT NOT NULL,
            assets      TEXT NOT NULL DEFAULT '[]',
            created_at  INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE INDEX IF NOT EXISTS idx_message_channel
            ON message(channel_id, created_at);
        ",
    )?;

    info!("channel migrations complete");
    Ok(())
}
