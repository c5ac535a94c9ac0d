//! Revealed contacts, the sync target of the reveal pipeline.
//!
//! Rows are keyed by identifier; a second reveal of the same identifier
//! updates the existing row in place.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use leadgen_reveal::{Contact, ContactRecord};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A contact row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredContact {
    /// Identifier the contact was revealed for
    pub identifier: String,
    /// Correlation key of the delivering sub-batch
    pub request_id: Option<String>,
    /// Provider UID
    pub uid: Option<String>,
    /// Full name
    pub full_name: Option<String>,
    /// Email addresses
    pub emails: Vec<String>,
    /// Phone numbers
    pub phones: Vec<String>,
    /// Raw candidate object
    pub contact: Contact,
    /// When the contact was revealed
    pub revealed_at: DateTime<Utc>,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

type ContactRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    String,
    String,
);

const SELECT_COLUMNS: &str = "SELECT identifier, request_id, uid, full_name, emails, phones, contact, revealed_at, updated_at FROM contacts";

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{value}': {e}")))
}

fn from_row(row: ContactRow) -> Result<StoredContact> {
    let (identifier, request_id, uid, full_name, emails, phones, contact, revealed_at, updated_at) =
        row;
    Ok(StoredContact {
        identifier,
        request_id,
        uid,
        full_name,
        emails: serde_json::from_str(&emails)?,
        phones: serde_json::from_str(&phones)?,
        contact: serde_json::from_str(&contact)?,
        revealed_at: parse_time(&revealed_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

/// Insert a contact or update the row for its identifier.
pub async fn upsert_contact(pool: &SqlitePool, record: &ContactRecord) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO contacts (identifier, request_id, uid, full_name, emails, phones, contact, revealed_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(identifier) DO UPDATE SET
             request_id = excluded.request_id,
             uid = excluded.uid,
             full_name = excluded.full_name,
             emails = excluded.emails,
             phones = excluded.phones,
             contact = excluded.contact,
             revealed_at = excluded.revealed_at,
             updated_at = excluded.updated_at",
    )
    .bind(record.identifier.as_str())
    .bind(record.request_id.as_ref().map(|k| k.as_str().to_string()))
    .bind(&record.uid)
    .bind(&record.full_name)
    .bind(serde_json::to_string(&record.emails)?)
    .bind(serde_json::to_string(&record.phones)?)
    .bind(serde_json::to_string(&record.contact)?)
    .bind(record.revealed_at.to_rfc3339())
    .bind(&now)
    .execute(pool)
    .await?;

    tracing::debug!(identifier = %record.identifier, "upserted contact");
    Ok(())
}

/// Fetch the contact stored for `identifier`.
pub async fn get_contact(pool: &SqlitePool, identifier: &str) -> Result<Option<StoredContact>> {
    let row = sqlx::query_as::<_, ContactRow>(&format!("{SELECT_COLUMNS} WHERE identifier = ?"))
        .bind(identifier)
        .fetch_optional(pool)
        .await?;

    row.map(from_row).transpose()
}

/// Most recently revealed contacts first.
pub async fn list_contacts(pool: &SqlitePool, limit: u32) -> Result<Vec<StoredContact>> {
    let rows = sqlx::query_as::<_, ContactRow>(&format!(
        "{SELECT_COLUMNS} ORDER BY revealed_at DESC, identifier LIMIT ?"
    ))
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

/// Number of stored contacts.
pub async fn count_contacts(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM contacts")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Delete the contact stored for `identifier`.
pub async fn delete_contact(pool: &SqlitePool, identifier: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM contacts WHERE identifier = ?")
        .bind(identifier)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound(format!(
            "contact '{identifier}' not found"
        )));
    }
    Ok(())
}
