//! Database migrations

use rusqlite::{params, Connection};

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: Initial schema
///
/// Each store keeps the full record as a JSON document in `data`, with the
/// indexed fields extracted into their own columns.
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS notebooks (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notebooks_owner ON notebooks(owner_id);
        CREATE INDEX IF NOT EXISTS idx_notebooks_updated ON notebooks(updated_at DESC);
        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            notebook_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notes_notebook ON notes(notebook_id);
        CREATE INDEX IF NOT EXISTS idx_notes_position ON notes(position);
        CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at DESC);
        CREATE TABLE IF NOT EXISTS pending_changes (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_changes_entity ON pending_changes(entity_id);
        CREATE INDEX IF NOT EXISTS idx_changes_timestamp ON pending_changes(timestamp);
        CREATE INDEX IF NOT EXISTS idx_changes_synced ON pending_changes(synced);
        INSERT INTO schema_version (version) VALUES (1);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: normalize the `synced` field to boolean
///
/// Version 1 wrote `synced` into the JSON document as 0/1. Rewrite those
/// documents so the field is a real boolean, and clamp the index column to
/// 0/1. Runs before any query touches the table and is idempotent: already
/// boolean documents are left untouched.
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    let legacy: Vec<(String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT id, data FROM pending_changes
             WHERE json_type(data, '$.synced') = 'integer'",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    for (id, data) in legacy {
        let mut document: serde_json::Value = serde_json::from_str(&data)?;
        if let Some(synced) = document.get("synced").and_then(serde_json::Value::as_i64) {
            document["synced"] = serde_json::Value::Bool(synced != 0);
            tx.execute(
                "UPDATE pending_changes SET data = ?1 WHERE id = ?2",
                params![document.to_string(), id],
            )?;
        }
    }

    tx.execute_batch(
        "UPDATE pending_changes SET synced = CASE WHEN synced != 0 THEN 1 ELSE 0 END;
         INSERT INTO schema_version (version) VALUES (2);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migration_v2_normalizes_legacy_synced() {
        let mut conn = setup();
        migrate_v1(&mut conn).unwrap();

        // Simulate schema-v1 rows with numeric synced values
        conn.execute(
            "INSERT INTO pending_changes (id, entity_id, timestamp, synced, data)
             VALUES ('c1', 'e1', 1, 0, '{\"id\":\"c1\",\"synced\":0}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO pending_changes (id, entity_id, timestamp, synced, data)
             VALUES ('c2', 'e2', 2, 1, '{\"id\":\"c2\",\"synced\":1}')",
            [],
        )
        .unwrap();

        migrate_v2(&mut conn).unwrap();

        let unsynced: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT data FROM pending_changes WHERE synced = 0")
                .unwrap();
            let rows = stmt
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<rusqlite::Result<Vec<_>>>()
                .unwrap();
            rows
        };
        assert_eq!(unsynced.len(), 1);

        // Documents now hold real booleans
        let document: serde_json::Value = serde_json::from_str(&unsynced[0]).unwrap();
        assert_eq!(document["synced"], serde_json::Value::Bool(false));

        let synced_doc: String = conn
            .query_row(
                "SELECT data FROM pending_changes WHERE id = 'c2'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let document: serde_json::Value = serde_json::from_str(&synced_doc).unwrap();
        assert_eq!(document["synced"], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_migration_v2_leaves_boolean_documents_alone() {
        let mut conn = setup();
        migrate_v1(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO pending_changes (id, entity_id, timestamp, synced, data)
             VALUES ('c1', 'e1', 1, 0, '{\"id\":\"c1\",\"synced\":false}')",
            [],
        )
        .unwrap();

        migrate_v2(&mut conn).unwrap();

        let data: String = conn
            .query_row(
                "SELECT data FROM pending_changes WHERE id = 'c1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let document: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(document["synced"], serde_json::Value::Bool(false));
    }
}
