//! Persistence layer
//!
//! Targets are kept in a key-value `settings` table of a local libsql
//! database, serialized as one JSON document.

pub mod migrations;
pub mod repository;

pub use repository::{DatabaseImpl, TARGETS_KEY, TargetRepository};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
