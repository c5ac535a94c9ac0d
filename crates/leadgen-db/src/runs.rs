//! Reveal run history.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use leadgen_reveal::Report;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// One completed bulk reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRun {
    /// Row id
    pub id: String,
    /// Id of the batch handle that produced the report
    pub batch_id: String,
    /// When the run was submitted
    pub started_at: DateTime<Utc>,
    /// When the report was collected
    pub completed_at: DateTime<Utc>,
    /// Unique identifiers requested
    pub requested: u32,
    /// Revealed
    pub revealed: u32,
    /// Failed
    pub failed: u32,
    /// Timed out
    pub timed_out: u32,
    /// Out of credits
    pub credits_exhausted: u32,
    /// Duplicate queries
    pub duplicate_queries: u32,
    /// Served from cache
    pub skipped: u32,
    /// Never submitted
    pub cancelled: u32,
    /// Still waiting when collected
    pub pending: u32,
    /// Credits spent
    pub credits_used: u32,
    /// Whether the run was cancelled early
    pub cancelled_while_pending: bool,
}

type RunRow = (
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
);

fn to_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_count(column: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("invalid {column} count: {value}")))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{value}': {e}")))
}

fn from_row(row: RunRow) -> Result<RevealRun> {
    let (
        id,
        batch_id,
        started_at,
        completed_at,
        requested,
        revealed,
        failed,
        timed_out,
        credits_exhausted,
        duplicate_queries,
        skipped,
        cancelled,
        pending,
        credits_used,
        cancelled_while_pending,
    ) = row;

    Ok(RevealRun {
        id,
        batch_id,
        started_at: parse_time(&started_at)?,
        completed_at: parse_time(&completed_at)?,
        requested: from_count("requested", requested)?,
        revealed: from_count("revealed", revealed)?,
        failed: from_count("failed", failed)?,
        timed_out: from_count("timed_out", timed_out)?,
        credits_exhausted: from_count("credits_exhausted", credits_exhausted)?,
        duplicate_queries: from_count("duplicate_queries", duplicate_queries)?,
        skipped: from_count("skipped", skipped)?,
        cancelled: from_count("cancelled", cancelled)?,
        pending: from_count("pending", pending)?,
        credits_used: from_count("credits_used", credits_used)?,
        cancelled_while_pending: cancelled_while_pending != 0,
    })
}

/// Record the summary of a collected report. Returns the new row id.
pub async fn record_run(
    pool: &SqlitePool,
    report: &Report,
    started_at: DateTime<Utc>,
) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO reveal_runs (id, batch_id, started_at, completed_at, requested, revealed, failed,
             timed_out, credits_exhausted, duplicate_queries, skipped, cancelled, pending, credits_used,
             cancelled_while_pending)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(report.batch_id.to_string())
    .bind(started_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(to_count(report.requested))
    .bind(to_count(report.revealed))
    .bind(to_count(report.failed))
    .bind(to_count(report.timed_out))
    .bind(to_count(report.credits_exhausted))
    .bind(to_count(report.duplicate_queries))
    .bind(to_count(report.skipped))
    .bind(to_count(report.cancelled))
    .bind(to_count(report.pending))
    .bind(to_count(report.credits_used))
    .bind(report.cancelled_while_pending)
    .execute(pool)
    .await?;

    tracing::info!(run_id = %id, batch_id = %report.batch_id, "recorded reveal run");
    Ok(id)
}

/// Most recent runs first.
pub async fn list_runs(pool: &SqlitePool, limit: u32) -> Result<Vec<RevealRun>> {
    let rows = sqlx::query_as::<_, RunRow>(
        "SELECT id, batch_id, started_at, completed_at, requested, revealed, failed, timed_out,
                credits_exhausted, duplicate_queries, skipped, cancelled, pending, credits_used,
                cancelled_while_pending
         FROM reveal_runs ORDER BY started_at DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

/// Total credits spent by runs started at or after `since`.
pub async fn credits_used_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<u32> {
    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(credits_used), 0) FROM reveal_runs WHERE started_at >= ?",
    )
    .bind(since.to_rfc3339())
    .fetch_one(pool)
    .await?;

    from_count("credits_used", total)
}
