//! Queries owned by a channel actor: that channel's message history.

use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::Database;
use crate::models::MessageRow;

impl Database {
    pub fn insert_message(
        &self,
        id: &str,
        channel_id: &str,
        user_id: &str,
        content: &str,
        assets_json: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message (id, channel_id, user_id, content, assets)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, channel_id, user_id, content, assets_json],
            )?;
            Ok(())
        })
    }

    pub fn message_by_id(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, channel_id, user_id, content, assets, created_at
                     FROM message WHERE id = ?1",
                    [id],
                    read_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Up to `limit` messages, newest first. `before` is a message id;
    /// only messages created strictly earlier are returned. The rowid
    /// tie-break keeps paging stable when several messages share one
    /// Unix second.
    pub fn list_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.channel_id, m.user_id, m.content, m.assets, m.created_at
                 FROM message m
                 WHERE m.channel_id = ?1
                   AND (?2 IS NULL OR (m.created_at, m.rowid) <
                        (SELECT created_at, rowid FROM message WHERE id = ?2))
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![channel_id, before, limit], read_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn read_message(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        assets: row.get(4)?,
        created_at: row.get(5)?,
    })
}
