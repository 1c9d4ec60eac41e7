//! Database schema migrations.
//!
//! Applies the ticket label schema and tracks applied versions in the
//! schema_migrations table.

use rusqlite::Connection;
use tracing::info;

use triage_core::error::TriageError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), TriageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| TriageError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| TriageError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: ticket_labels");
    }

    Ok(())
}

/// Version 1: ticket labels keyed by index name and vector id.
fn apply_v1(conn: &Connection) -> Result<(), TriageError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tickets (
            vector_id       TEXT NOT NULL,
            index_name      TEXT NOT NULL,
            text            TEXT NOT NULL,
            category        TEXT NOT NULL,
            priority        TEXT NOT NULL
                            CHECK (priority IN ('Low', 'Medium', 'High', 'Critical')),
            indexed_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (index_name, vector_id)
        );

        CREATE INDEX IF NOT EXISTS idx_tickets_index_category
            ON tickets (index_name, category);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'ticket_labels');
        ",
    )
    .map_err(|e| TriageError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
