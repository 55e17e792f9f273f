//! Queries owned by the directory actor: users, sessions, channels,
//! memberships.

use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::Database;
use crate::models::{ChannelRow, UserRow};

const USER_COLUMNS: &str = "id, email, password, first_name, last_name, avatar, created_at";

const CHANNEL_SUMMARY: &str = "
    SELECT
        c.id, c.name, c.description, c.is_private, c.created_at,
        COUNT(DISTINCT cu2.user_id) AS member_count,
        GROUP_CONCAT(cu2.user_id) AS member_ids
    FROM channel c
    LEFT JOIN channel_user cu2 ON c.id = cu2.channel_id
    WHERE c.id = ?1
    GROUP BY c.id";

impl Database {
    // -- Users --

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM user WHERE email = ?1 LIMIT 1", [email], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        password_digest: &str,
        first_name: &str,
        last_name: &str,
        avatar: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user (id, email, password, first_name, last_name, avatar)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, email, password_digest, first_name, last_name, avatar],
            )?;
            Ok(())
        })
    }

    pub fn user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM user WHERE id = ?1");
            let row = conn.query_row(&sql, [id], read_user).optional()?;
            Ok(row)
        })
    }

    /// Login lookup: the digest is deterministic, so credentials match
    /// in a single indexed query.
    pub fn user_by_credentials(&self, email: &str, digest: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql =
                format!("SELECT {USER_COLUMNS} FROM user WHERE email = ?1 AND password = ?2 LIMIT 1");
            let row = conn.query_row(&sql, [email, digest], read_user).optional()?;
            Ok(row)
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM user ORDER BY created_at");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], read_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM user WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let bound: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(bound.as_slice(), read_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Sessions --

    pub fn create_session(&self, id: &str, user_id: &str, expires_at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session (id, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![id, user_id, expires_at],
            )?;
            Ok(())
        })
    }

    /// The user id behind a session that is still valid at `now`.
    pub fn session_user(&self, session_id: &str, now: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let user_id = conn
                .query_row(
                    "SELECT user_id FROM session WHERE id = ?1 AND expires_at > ?2 LIMIT 1",
                    params![session_id, now],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(user_id)
        })
    }

    /// The owning user regardless of expiry, for logout cleanup.
    pub fn session_owner(&self, session_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let user_id = conn
                .query_row(
                    "SELECT user_id FROM session WHERE id = ?1",
                    [session_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(user_id)
        })
    }

    /// Expire immediately. Idempotent; the row is kept for audit.
    pub fn expire_session(&self, session_id: &str, now: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE session SET expires_at = ?2 WHERE id = ?1",
                params![session_id, now],
            )?;
            Ok(())
        })
    }

    // -- Channels --

    pub fn create_channel(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        is_private: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channel (id, name, description, is_private) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, description, is_private as i64],
            )?;
            Ok(())
        })
    }

    /// Insert memberships as `(membership_id, user_id)` pairs. Existing
    /// memberships are ignored, which makes invites idempotent.
    pub fn add_members(&self, channel_id: &str, members: &[(String, String)]) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO channel_user (id, channel_id, user_id) VALUES (?1, ?2, ?3)",
            )?;
            for (id, user_id) in members {
                stmt.execute(params![id, channel_id, user_id])?;
            }
            Ok(())
        })
    }

    pub fn is_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM channel_user WHERE channel_id = ?1 AND user_id = ?2 LIMIT 1",
                    [channel_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn member_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM channel_user WHERE channel_id = ?1")?;
            let rows = stmt
                .query_map([channel_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn channel_summary(&self, channel_id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(CHANNEL_SUMMARY, [channel_id], read_channel)
                .optional()?;
            Ok(row)
        })
    }

    /// Every channel the user belongs to, newest first, annotated with
    /// member count and the full member id set.
    pub fn channels_for_user(&self, user_id: &str) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT
                    c.id, c.name, c.description, c.is_private, c.created_at,
                    COUNT(DISTINCT cu2.user_id) AS member_count,
                    GROUP_CONCAT(cu2.user_id) AS member_ids
                 FROM channel c
                 INNER JOIN channel_user cu ON c.id = cu.channel_id
                 LEFT JOIN channel_user cu2 ON c.id = cu2.channel_id
                 WHERE cu.user_id = ?1
                 GROUP BY c.id
                 ORDER BY c.created_at DESC, c.rowid DESC",
            )?;
            let rows = stmt
                .query_map([user_id], read_channel)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Remove one membership; if the channel has no members left,
    /// delete the channel in the same transaction. Returns whether the
    /// channel was deleted.
    pub fn remove_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM channel_user WHERE channel_id = ?1 AND user_id = ?2",
                [channel_id, user_id],
            )?;

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM channel_user WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )?;

            let deleted = remaining == 0;
            if deleted {
                tx.execute("DELETE FROM channel WHERE id = ?1", [channel_id])?;
            }

            tx.commit()?;
            Ok(deleted)
        })
    }
}

fn read_user(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        avatar: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn read_channel(row: &rusqlite::Row<'_>) -> std::result::Result<ChannelRow, rusqlite::Error> {
    let member_ids: Option<String> = row.get(6)?;
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_private: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        member_count: row.get(5)?,
        member_ids: member_ids
            .map(|ids| ids.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
    })
}
