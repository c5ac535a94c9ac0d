//! Collaborators around the reveal pipeline: the contact cache consulted
//! before submitting, and the record sink revealed contacts are synced into.

use crate::aggregator::Report;
use crate::error::{Result, RevealError};
use crate::model::{CallbackItem, Contact, RevealOutcome};
use async_trait::async_trait;
use leadgen_core::{CorrelationKey, Identifier, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Cache of previously revealed identifiers.
#[async_trait]
pub trait ContactCache: Send + Sync {
    /// Cached result for `identifier`, if any.
    async fn get(&self, identifier: &Identifier) -> Result<Option<CallbackItem>>;

    /// Store the result for `identifier`.
    async fn put(&self, identifier: &Identifier, item: &CallbackItem) -> Result<()>;
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Identifier, CallbackItem>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContactCache for MemoryCache {
    async fn get(&self, identifier: &Identifier) -> Result<Option<CallbackItem>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(identifier).cloned())
    }

    async fn put(&self, identifier: &Identifier, item: &CallbackItem) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(identifier.clone(), item.clone());
        Ok(())
    }
}

/// Write-through cache persisted as a JSON file.
///
/// Every `put` rewrites the file through a temporary sibling and a rename, so
/// a crash never leaves a half-written cache behind.
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    entries: Mutex<HashMap<Identifier, CallbackItem>>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    entries: Vec<CallbackItem>,
}

impl JsonFileCache {
    /// Open the cache at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read and `Serialization` if it is
    /// not a valid cache file.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: CacheFile = serde_json::from_slice(&bytes)?;
                file.entries
                    .into_iter()
                    .map(|item| (item.identifier.clone(), item))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "opened contact cache");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &HashMap<Identifier, CallbackItem>) -> Result<()> {
        let mut items: Vec<CallbackItem> = entries.values().cloned().collect();
        items.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let bytes = serde_json::to_vec_pretty(&CacheFile { entries: items })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ContactCache for JsonFileCache {
    async fn get(&self, identifier: &Identifier) -> Result<Option<CallbackItem>> {
        Ok(self.entries.lock().await.get(identifier).cloned())
    }

    async fn put(&self, identifier: &Identifier, item: &CallbackItem) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(identifier.clone(), item.clone());
        self.persist(&entries).await
    }
}

/// Flat record of a revealed contact, as written to the sync target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Identifier the contact was revealed for
    pub identifier: Identifier,
    /// Correlation key of the delivering sub-batch
    pub request_id: Option<CorrelationKey>,
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
    /// When the record was produced
    pub revealed_at: Timestamp,
}

impl ContactRecord {
    /// Flatten a revealed contact.
    #[must_use]
    pub fn new(identifier: Identifier, request_id: Option<CorrelationKey>, contact: Contact) -> Self {
        Self {
            identifier,
            request_id,
            uid: contact.uid().map(str::to_string),
            full_name: contact.full_name().map(str::to_string),
            emails: contact.emails().into_iter().map(str::to_string).collect(),
            phones: contact.phones().into_iter().map(str::to_string).collect(),
            contact,
            revealed_at: Timestamp::now(),
        }
    }
}

/// Downstream store revealed contacts are synced into.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert or update the record keyed by its identifier.
    async fn upsert(&self, record: &ContactRecord) -> Result<()>;
}

/// Outcome of [`publish_report`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    /// Records written to the sink
    pub upserted: usize,
    /// Records the sink rejected
    pub failed: usize,
    /// Cache entries written
    pub cached: usize,
}

/// Sync the revealed contacts of `report` into `sink` and `cache`.
///
/// Only items revealed in this run are written; cache hits were synced when
/// they were first revealed. Sink and cache failures are logged and counted,
/// never fatal.
pub async fn publish_report(
    report: &Report,
    cache: &dyn ContactCache,
    sink: &dyn RecordSink,
) -> PublishSummary {
    let mut summary = PublishSummary::default();

    for item in report.revealed_items() {
        let Some(contact) = item.contact.clone() else {
            continue;
        };
        let record = ContactRecord::new(item.identifier.clone(), item.request_id.clone(), contact);
        match sink.upsert(&record).await {
            Ok(()) => summary.upserted += 1,
            Err(e) => {
                warn!(identifier = %item.identifier, error = %e, "failed to sync contact");
                summary.failed += 1;
                continue;
            }
        }

        let cached = CallbackItem::new(
            item.identifier.clone(),
            RevealOutcome::Success {
                contact: record.contact,
            },
        );
        match cache.put(&item.identifier, &cached).await {
            Ok(()) => summary.cached += 1,
            Err(e) => warn!(identifier = %item.identifier, error = %e, "failed to cache contact"),
        }
    }

    info!(
        batch_id = %report.batch_id,
        upserted = summary.upserted,
        failed = summary.failed,
        "published reveal report"
    );
    summary
}

/// Map any displayable sink error into a [`RevealError`].
pub fn sink_error(e: impl std::fmt::Display) -> RevealError {
    RevealError::Sink(e.to_string())
}
