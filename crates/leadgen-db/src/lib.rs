//! Leadgen Database Layer
//!
//! `SQLite` storage for the reveal pipeline: revealed contacts, synced by
//! identifier, and a summary row per completed reveal run. Uses `SQLx` with
//! embedded migrations.
//!
//! # Example
//!
//! ```ignore
//! use leadgen_db::Database;
//!
//! let db = Database::open("leadgen.db").await?;
//! db.run_migrations().await?;
//! let summary = leadgen_reveal::publish_report(&report, &cache, &db).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod contacts;
pub mod error;
pub mod migrations;
pub mod runs;

// Re-export commonly used types
pub use contacts::StoredContact;
pub use error::{DatabaseError, Result};
pub use runs::RevealRun;

use async_trait::async_trait;
use leadgen_reveal::{sink_error, ContactRecord, RecordSink};
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// Database handle.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (or create) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let pool = connection::open_pool(path).await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(connection::MEMORY).await
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Highest applied migration version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Underlying pool for custom queries.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close all connections.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("database pool closed");
    }
}

#[async_trait]
impl RecordSink for Database {
    async fn upsert(&self, record: &ContactRecord) -> leadgen_reveal::Result<()> {
        contacts::upsert_contact(&self.pool, record)
            .await
            .map_err(sink_error)
    }
}
