use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::OutboxError;

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) a database file and bring its schema up to date.
pub(crate) fn open_database(path: &Path) -> Result<Connection, OutboxError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    // Other handles on the same file wait for a writer instead of failing.
    conn.busy_timeout(BUSY_TIMEOUT)?;
    info!(path = %path.display(), "Opened shell storage");
    init_database(conn)
}

/// In-memory database for tests and throwaway sessions.
pub(crate) fn open_in_memory() -> Result<Connection, OutboxError> {
    init_database(Connection::open_in_memory()?)
}

fn init_database(conn: Connection) -> Result<Connection, OutboxError> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get::<_, i32>(0).map(|count| count > 0),
    )?;

    let version: i32 = if table_exists {
        conn.query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0)
    } else {
        0
    };

    if version > SCHEMA_VERSION {
        return Err(OutboxError::Schema(format!(
            "database schema {} is newer than supported {}",
            version, SCHEMA_VERSION
        )));
    }

    if version < 1 {
        create_schema_v1(&conn)?;
    }

    Ok(conn)
}

/// Create initial schema (version 1)
fn create_schema_v1(conn: &Connection) -> Result<(), OutboxError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_submissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fields TEXT NOT NULL,
            submitted_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS page_storage (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![SCHEMA_VERSION, Utc::now().timestamp()],
    )?;

    debug!(version = SCHEMA_VERSION, "Created storage schema");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("shell.db");

        drop(open_database(&path).unwrap());
        let conn = open_database(&path).unwrap();

        let rows: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.db");
        let conn = open_database(&path).unwrap();
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();
        drop(conn);

        assert!(matches!(open_database(&path), Err(OutboxError::Schema(_))));
    }
}
