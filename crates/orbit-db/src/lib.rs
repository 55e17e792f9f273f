pub mod migrations;
pub mod models;

mod directory;
mod messages;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// An embedded store owned by exactly one actor. Every statement runs
/// inside the owning actor's serialized loop; no other actor may touch
/// this file.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the directory actor's store (users, channels, memberships,
    /// sessions).
    pub fn open_directory(path: &Path) -> Result<Self> {
        Self::open_with(path, migrations::directory)
    }

    /// Open a channel actor's store (that channel's messages).
    pub fn open_channel(path: &Path) -> Result<Self> {
        Self::open_with(path, migrations::channel)
    }

    fn open_with(path: &Path, migrate: fn(&Connection) -> Result<()>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrate(&conn)?;

        info!("database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Mutable access, for statements that need a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {}", e))?;
        f(&mut conn)
    }
}
