//! Pending reveal batches awaiting webhook delivery.
//!
//! The table maps a provider correlation key to the state of one in-flight
//! sub-batch. Webhook deliveries are applied with [`PendingRequestTable::resolve`],
//! which is idempotent per identifier, and overdue batches are force-completed
//! by [`PendingRequestTable::sweep`]. Every batch's completion handler runs
//! exactly once: it is taken out of the entry under the table lock and invoked
//! after the lock is released.
//!
//! Completed entries stay in the table until removed or until the retention
//! window elapses, so late duplicate deliveries are recognised as duplicates
//! and a provider replaying a key cannot register it twice.

use crate::error::{Result, RevealError};
use crate::model::{BatchStatus, CallbackItem, CompletedBatch};
use leadgen_core::{CorrelationKey, Identifier, Timestamp};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback invoked once when a batch resolves or times out.
pub type CompletionHandler = Box<dyn FnOnce(CompletedBatch) + Send + 'static>;

/// Result of applying one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOutcome {
    /// Batch status after the delivery, `None` when the key is unknown
    pub status: Option<BatchStatus>,
    /// Items recorded as new terminal results
    pub applied: usize,
    /// Items ignored because the identifier was already terminal
    pub duplicates: usize,
    /// Items naming an identifier that was never submitted under this key
    pub unknown: usize,
    /// Whether this delivery completed the batch
    pub completed: bool,
}

impl ResolveOutcome {
    fn unknown_key() -> Self {
        Self {
            status: None,
            applied: 0,
            duplicates: 0,
            unknown: 0,
            completed: false,
        }
    }

    /// Whether the batch is still waiting for results.
    #[must_use]
    pub fn still_pending(&self) -> bool {
        matches!(
            self.status,
            Some(BatchStatus::Pending | BatchStatus::Partial)
        )
    }

    /// Whether the key was not tracked.
    #[must_use]
    pub fn is_unknown_key(&self) -> bool {
        self.status.is_none()
    }
}

struct PendingEntry {
    identifiers: Vec<Identifier>,
    results: HashMap<Identifier, CallbackItem>,
    submitted_at: Timestamp,
    deadline: Instant,
    status: BatchStatus,
    on_complete: Option<CompletionHandler>,
    completed_at: Option<Instant>,
}

impl PendingEntry {
    /// Find the submitted identifier a provider echo refers to.
    ///
    /// An exact match wins. Otherwise the case-insensitive match is used only
    /// when it is unambiguous.
    fn match_identifier(&self, echo: &Identifier) -> Option<Identifier> {
        if self.identifiers.contains(echo) {
            return Some(echo.clone());
        }
        let mut candidates = self
            .identifiers
            .iter()
            .filter(|id| id.matches_echo(echo.as_str()));
        match (candidates.next(), candidates.next()) {
            (Some(id), None) => Some(id.clone()),
            _ => None,
        }
    }

    /// Mark the entry terminal and hand out its completion handler.
    fn finish(
        &mut self,
        key: &CorrelationKey,
        status: BatchStatus,
        now: Instant,
    ) -> Option<(CompletionHandler, CompletedBatch)> {
        self.status = status;
        self.completed_at = Some(now);

        let mut items = Vec::with_capacity(self.results.len());
        let mut missing = Vec::new();
        for id in &self.identifiers {
            match self.results.get(id) {
                Some(item) => items.push(item.clone()),
                None => missing.push(id.clone()),
            }
        }

        let handler = self.on_complete.take()?;
        Some((
            handler,
            CompletedBatch {
                key: key.clone(),
                status,
                items,
                missing,
                submitted_at: self.submitted_at,
                completed_at: Timestamp::now(),
            },
        ))
    }
}

/// In-memory table of in-flight reveal batches.
pub struct PendingRequestTable {
    entries: Mutex<HashMap<CorrelationKey, PendingEntry>>,
    retention: Duration,
}

impl PendingRequestTable {
    /// Create an empty table that keeps completed entries for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Start tracking a submitted batch.
    ///
    /// Duplicate identifiers are collapsed, keeping the first occurrence.
    ///
    /// # Errors
    /// Returns `DuplicateKey` if `key` is still tracked, and `InvalidOptions`
    /// if `identifiers` is empty.
    pub fn register(
        &self,
        key: CorrelationKey,
        identifiers: Vec<Identifier>,
        deadline: Instant,
        on_complete: impl FnOnce(CompletedBatch) + Send + 'static,
    ) -> Result<()> {
        if identifiers.is_empty() {
            return Err(RevealError::InvalidOptions(format!(
                "batch {key} has no identifiers"
            )));
        }

        let mut seen = HashSet::new();
        let identifiers: Vec<Identifier> = identifiers
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut entries = self.lock();
        if entries.contains_key(&key) {
            warn!(request_id = %key, "rejected duplicate correlation key");
            return Err(RevealError::DuplicateKey { key });
        }

        debug!(request_id = %key, identifiers = identifiers.len(), "registered reveal batch");
        entries.insert(
            key,
            PendingEntry {
                identifiers,
                results: HashMap::new(),
                submitted_at: Timestamp::now(),
                deadline,
                status: BatchStatus::Pending,
                on_complete: Some(Box::new(on_complete)),
                completed_at: None,
            },
        );
        Ok(())
    }

    /// Apply a webhook delivery to the batch registered under `key`.
    ///
    /// Safe to call concurrently for the same key. Unknown keys, unknown
    /// identifiers and repeated items are logged and otherwise ignored.
    pub fn resolve(&self, key: &CorrelationKey, items: Vec<CallbackItem>) -> ResolveOutcome {
        let (outcome, completion) = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(key) else {
                warn!(
                    request_id = %key,
                    items = items.len(),
                    "discarding delivery for unregistered correlation key"
                );
                return ResolveOutcome::unknown_key();
            };

            if entry.status.is_terminal() {
                debug!(
                    request_id = %key,
                    status = %entry.status,
                    items = items.len(),
                    "ignoring delivery for completed batch"
                );
                return ResolveOutcome {
                    status: Some(entry.status),
                    applied: 0,
                    duplicates: items.len(),
                    unknown: 0,
                    completed: false,
                };
            }

            let mut applied = 0;
            let mut duplicates = 0;
            let mut unknown = 0;
            for item in items {
                let Some(identifier) = entry.match_identifier(&item.identifier) else {
                    warn!(
                        request_id = %key,
                        identifier = %item.identifier,
                        "dropping result for identifier not in batch"
                    );
                    unknown += 1;
                    continue;
                };

                if entry.results.contains_key(&identifier) {
                    debug!(request_id = %key, %identifier, "duplicate result ignored");
                    duplicates += 1;
                    continue;
                }

                entry.results.insert(
                    identifier.clone(),
                    CallbackItem::new(identifier, item.outcome),
                );
                applied += 1;
            }

            let mut completion = None;
            if entry.results.len() == entry.identifiers.len() {
                completion = entry.finish(key, BatchStatus::Resolved, Instant::now());
                info!(request_id = %key, results = entry.results.len(), "reveal batch resolved");
            } else if !entry.results.is_empty() {
                entry.status = BatchStatus::Partial;
            }

            (
                ResolveOutcome {
                    status: Some(entry.status),
                    applied,
                    duplicates,
                    unknown,
                    completed: completion.is_some(),
                },
                completion,
            )
        };

        if let Some((handler, batch)) = completion {
            handler(batch);
        }
        outcome
    }

    /// Time out overdue batches and evict expired completed ones.
    ///
    /// Returns the keys that timed out in this pass.
    pub fn sweep(&self, now: Instant) -> Vec<CorrelationKey> {
        let mut expired = Vec::new();
        let mut completions = Vec::new();
        {
            let mut entries = self.lock();
            for (key, entry) in entries.iter_mut() {
                if entry.status.is_terminal() || now < entry.deadline {
                    continue;
                }
                warn!(
                    request_id = %key,
                    received = entry.results.len(),
                    expected = entry.identifiers.len(),
                    "reveal batch deadline elapsed"
                );
                if let Some(completion) = entry.finish(key, BatchStatus::TimedOut, now) {
                    completions.push(completion);
                }
                expired.push(key.clone());
            }

            let retention = self.retention;
            let before = entries.len();
            entries.retain(|_, entry| {
                entry
                    .completed_at
                    .map_or(true, |done| now.saturating_duration_since(done) < retention)
            });
            let evicted = before - entries.len();
            if evicted > 0 {
                debug!(evicted, "evicted completed reveal batches");
            }
        }

        for (handler, batch) in completions {
            handler(batch);
        }
        expired
    }

    /// Stop tracking `key`. Returns whether it was tracked.
    pub fn remove(&self, key: &CorrelationKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Current status of the batch registered under `key`.
    #[must_use]
    pub fn status(&self, key: &CorrelationKey) -> Option<BatchStatus> {
        self.lock().get(key).map(|entry| entry.status)
    }

    /// Number of tracked entries, completed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table tracks nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of entries still waiting for results.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationKey, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run [`PendingRequestTable::sweep`] every `interval` until `cancel` fires.
pub fn spawn_sweeper(
    table: Arc<PendingRequestTable>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let expired = table.sweep(Instant::now());
                    if !expired.is_empty() {
                        info!(count = expired.len(), "timed out reveal batches");
                    }
                }
            }
        }
        debug!("pending table sweeper stopped");
    })
}
