//! Connection pool setup.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

/// In-memory database path.
pub const MEMORY: &str = ":memory:";

/// Open a `SQLite` pool at `path`, creating the file if needed.
///
/// `:memory:` gets a single connection, since every connection to an
/// in-memory database sees its own empty database.
pub async fn open_pool(path: impl AsRef<Path>) -> Result<Pool<Sqlite>> {
    let path_str = path.as_ref().to_str().ok_or_else(|| {
        DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
    })?;
    let in_memory = path_str == MEMORY;

    if !in_memory {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(path_str)
        .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
        .foreign_keys(true)
        .create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Open(format!("failed to open {path_str}: {e}")))?;

    tracing::info!(path = path_str, "database pool created");
    Ok(pool)
}
