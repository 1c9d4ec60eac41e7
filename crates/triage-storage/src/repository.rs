//! Ticket label repository.
//!
//! Stores `{text, category, priority}` for every vector id pushed into the
//! external index so search hits can be joined back to their labels.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;

use triage_core::error::TriageError;
use triage_core::types::{Priority, TicketMetadata};

use crate::db::Database;

/// A label row as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTicket {
    pub vector_id: String,
    pub metadata: TicketMetadata,
    pub indexed_at: DateTime<Utc>,
}

/// Repository for ticket labels, scoped per index name.
#[derive(Debug, Clone)]
pub struct TicketRepository {
    db: Arc<Database>,
}

impl TicketRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace labels for a batch of vector ids in one transaction.
    ///
    /// Returns the number of rows written.
    pub fn upsert_many(
        &self,
        index_name: &str,
        entries: &[(String, TicketMetadata)],
    ) -> Result<usize, TriageError> {
        self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| TriageError::Storage(format!("Failed to begin transaction: {}", e)))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO tickets (vector_id, index_name, text, category, priority, indexed_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))
                         ON CONFLICT(index_name, vector_id) DO UPDATE SET
                             text = excluded.text,
                             category = excluded.category,
                             priority = excluded.priority,
                             indexed_at = excluded.indexed_at",
                    )
                    .map_err(|e| TriageError::Storage(e.to_string()))?;

                for (vector_id, meta) in entries {
                    stmt.execute(rusqlite::params![
                        vector_id,
                        index_name,
                        meta.text,
                        meta.category,
                        meta.priority.as_str(),
                    ])
                    .map_err(|e| {
                        TriageError::Storage(format!("Failed to save ticket {}: {}", vector_id, e))
                    })?;
                }
            }
            tx.commit()
                .map_err(|e| TriageError::Storage(format!("Failed to commit labels: {}", e)))?;
            Ok(entries.len())
        })
    }

    /// Find one ticket by vector id.
    pub fn find_by_id(
        &self,
        index_name: &str,
        vector_id: &str,
    ) -> Result<Option<StoredTicket>, TriageError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT vector_id, text, category, priority, indexed_at
                     FROM tickets WHERE index_name = ?1 AND vector_id = ?2",
                )
                .map_err(|e| TriageError::Storage(e.to_string()))?;

            let row = stmt
                .query_row(rusqlite::params![index_name, vector_id], |row| {
                    Ok(row_to_stored_ticket(row))
                })
                .optional()
                .map_err(|e| TriageError::Storage(e.to_string()))?;

            row.transpose()
        })
    }

    /// Look up labels for many vector ids at once.
    ///
    /// Ids without a stored row are simply absent from the returned map.
    pub fn find_many(
        &self,
        index_name: &str,
        vector_ids: &[String],
    ) -> Result<HashMap<String, TicketMetadata>, TriageError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT vector_id, text, category, priority, indexed_at
                     FROM tickets WHERE index_name = ?1 AND vector_id = ?2",
                )
                .map_err(|e| TriageError::Storage(e.to_string()))?;

            let mut found = HashMap::with_capacity(vector_ids.len());
            for id in vector_ids {
                let row = stmt
                    .query_row(rusqlite::params![index_name, id], |row| {
                        Ok(row_to_stored_ticket(row))
                    })
                    .optional()
                    .map_err(|e| TriageError::Storage(e.to_string()))?;
                if let Some(ticket) = row.transpose()? {
                    found.insert(ticket.vector_id, ticket.metadata);
                }
            }
            Ok(found)
        })
    }

    /// Count labeled tickets in an index.
    pub fn count(&self, index_name: &str) -> Result<u64, TriageError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM tickets WHERE index_name = ?1",
                    rusqlite::params![index_name],
                    |row| row.get(0),
                )
                .map_err(|e| TriageError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Ticket counts per category, most frequent first.
    pub fn category_counts(&self, index_name: &str) -> Result<Vec<(String, u64)>, TriageError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT category, COUNT(*) AS n FROM tickets
                     WHERE index_name = ?1
                     GROUP BY category
                     ORDER BY n DESC, category ASC",
                )
                .map_err(|e| TriageError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![index_name], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })
                .map_err(|e| TriageError::Storage(e.to_string()))?;

            let mut counts = Vec::new();
            for row in rows {
                counts.push(row.map_err(|e| TriageError::Storage(e.to_string()))?);
            }
            Ok(counts)
        })
    }

    /// Remove every label belonging to an index. Returns rows deleted.
    pub fn clear_index(&self, index_name: &str) -> Result<u64, TriageError> {
        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    "DELETE FROM tickets WHERE index_name = ?1",
                    rusqlite::params![index_name],
                )
                .map_err(|e| TriageError::Storage(format!("Failed to clear labels: {}", e)))?;
            Ok(n as u64)
        })
    }
}

fn row_to_stored_ticket(row: &rusqlite::Row<'_>) -> Result<StoredTicket, TriageError> {
    let vector_id: String = row.get(0).map_err(|e| TriageError::Storage(e.to_string()))?;
    let text: String = row.get(1).map_err(|e| TriageError::Storage(e.to_string()))?;
    let category: String = row.get(2).map_err(|e| TriageError::Storage(e.to_string()))?;
    let priority: String = row.get(3).map_err(|e| TriageError::Storage(e.to_string()))?;
    let indexed_at: i64 = row.get(4).map_err(|e| TriageError::Storage(e.to_string()))?;

    let priority: Priority = priority
        .parse()
        .map_err(|e| TriageError::Storage(format!("Corrupt priority for {}: {}", vector_id, e)))?;
    let indexed_at = Utc.timestamp_opt(indexed_at, 0).single().ok_or_else(|| {
        TriageError::Storage(format!("Corrupt indexed_at for {}: {}", vector_id, indexed_at))
    })?;

    Ok(StoredTicket {
        vector_id,
        metadata: TicketMetadata {
            category,
            priority,
            text,
        },
        indexed_at,
    })
}
