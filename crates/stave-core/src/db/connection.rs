//! Database connection management

use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

use super::migrations;

/// Wrapper around a `SQLite` connection that is configured and migrated
/// before it becomes readable.
///
/// Opening is fatal on failure: no store handle exists until pragmas and
/// migrations (including the schema-v2 upgrade) have completed.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consume the wrapper, handing the connection to a store
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

/// Configure `SQLite` for optimal performance
fn configure(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so it can't go through pragma_update
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
