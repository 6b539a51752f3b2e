//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use mh_core::{Error, Result};

/// V1: canonical records keyed by normalized lookup key.
const V1_RECORDS: &str = r#"
CREATE TABLE records (
    lookup_key    TEXT PRIMARY KEY,
    fields        TEXT NOT NULL,
    field_sources TEXT NOT NULL,
    sources       TEXT NOT NULL CHECK (json_array_length(sources) > 0),
    updated_at    INTEGER NOT NULL
);
"#;

/// V2: newest-first listing.
const V2_UPDATED_INDEX: &str = r#"
CREATE INDEX idx_records_updated_at ON records(updated_at DESC, lookup_key);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_RECORDS), (2, V2_UPDATED_INDEX)];

/// Highest schema version this build knows about.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|&(v, _)| v).unwrap_or(0)
}

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::store(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::store(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::store(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::store(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::store(e.to_string()))?;

        tx.commit().map_err(|e| Error::store(e.to_string()))?;

        tracing::info!(version, "Applied schema migration");
    }

    Ok(())
}

/// Highest applied schema version, or `None` if nothing was ever migrated.
pub fn current_version(conn: &Connection) -> Result<Option<i64>> {
    let tracked: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_migrations'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::store(e.to_string()))?;
    if !tracked {
        return Ok(None);
    }

    conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .map_err(|e| Error::store(e.to_string()))
}
