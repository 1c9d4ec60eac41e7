//! Triage storage crate - SQLite persistence for ticket labels.
//!
//! The external vector index stores only `{id, vector}`. Category, priority
//! and text for each indexed ticket live here, keyed by the same vector id,
//! and are joined back onto search hits at classification time.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{StoredTicket, TicketRepository};
