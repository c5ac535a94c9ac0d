//! Final report for a bulk reveal.

use crate::model::{CallbackItem, Contact, RevealOutcome};
use crate::orchestrator::{BatchHandle, BatchSnapshot, SubBatch, SubBatchStatus};
use leadgen_core::{CorrelationKey, Identifier, IdentifierKind};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// What happened to one requested identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Contact details were revealed
    Revealed,
    /// Provider could not reveal it, or the submission failed
    Failed,
    /// No result before the deadline, or provider-side timeout
    TimedOut,
    /// Out of credits, locally or at the provider
    CreditsExhausted,
    /// Provider reported a duplicate query
    DuplicateQuery,
    /// Served from the contact cache
    Skipped,
    /// Never submitted because the run was cancelled
    Cancelled,
    /// Submitted, still waiting
    Pending,
}

impl Disposition {
    fn from_outcome(outcome: &RevealOutcome) -> Self {
        match outcome {
            RevealOutcome::Success { .. } => Self::Revealed,
            RevealOutcome::Failed => Self::Failed,
            RevealOutcome::CreditsExhausted => Self::CreditsExhausted,
            RevealOutcome::Timeout => Self::TimedOut,
            RevealOutcome::DuplicateQuery => Self::DuplicateQuery,
        }
    }
}

/// Per-identifier line of a [`Report`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportItem {
    /// Identifier as submitted
    pub identifier: Identifier,
    /// Email, profile URL or UID
    pub kind: IdentifierKind,
    /// Final disposition
    pub disposition: Disposition,
    /// Correlation key of the sub-batch that carried it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<CorrelationKey>,
    /// Revealed contact, for `Revealed` and `Skipped` items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
}

/// Summary of a bulk reveal.
///
/// `requested` always equals the sum of the per-disposition counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Handle id
    pub batch_id: Uuid,
    /// Unique identifiers requested
    pub requested: usize,
    /// Revealed
    pub revealed: usize,
    /// Failed
    pub failed: usize,
    /// Timed out
    pub timed_out: usize,
    /// Out of credits
    pub credits_exhausted: usize,
    /// Duplicate queries
    pub duplicate_queries: usize,
    /// Served from cache
    pub skipped: usize,
    /// Never submitted because of cancellation
    pub cancelled: usize,
    /// Still waiting
    pub pending: usize,
    /// Identifiers in sub-batches the provider accepted
    pub credits_used: usize,
    /// Whether the run was cancelled before it completed
    pub cancelled_while_pending: bool,
    /// One line per requested identifier, in input order
    pub items: Vec<ReportItem>,
}

impl Report {
    /// Sum of all per-disposition counters.
    #[must_use]
    pub fn accounted(&self) -> usize {
        self.revealed
            + self.failed
            + self.timed_out
            + self.credits_exhausted
            + self.duplicate_queries
            + self.skipped
            + self.cancelled
            + self.pending
    }

    /// Revealed items that did not come from the cache.
    pub fn revealed_items(&self) -> impl Iterator<Item = &ReportItem> {
        self.items
            .iter()
            .filter(|item| item.disposition == Disposition::Revealed)
    }

    fn count(&mut self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Revealed => &mut self.revealed,
            Disposition::Failed => &mut self.failed,
            Disposition::TimedOut => &mut self.timed_out,
            Disposition::CreditsExhausted => &mut self.credits_exhausted,
            Disposition::DuplicateQuery => &mut self.duplicate_queries,
            Disposition::Skipped => &mut self.skipped,
            Disposition::Cancelled => &mut self.cancelled,
            Disposition::Pending => &mut self.pending,
        };
        *counter += 1;
    }
}

/// Builds [`Report`]s from batch handles.
///
/// Collection reads a snapshot and never mutates the handle, so it can be
/// called any number of times.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Report on the current state of `handle`.
    #[must_use]
    pub fn collect(handle: &BatchHandle) -> Report {
        Self::summarize(&handle.snapshot())
    }

    /// Report on a snapshot.
    #[must_use]
    pub fn summarize(snapshot: &BatchSnapshot) -> Report {
        let mut lines: HashMap<Identifier, ReportItem> = HashMap::new();

        for item in &snapshot.skipped {
            lines.insert(
                item.identifier.clone(),
                ReportItem {
                    identifier: item.identifier.clone(),
                    kind: item.identifier.kind(),
                    disposition: Disposition::Skipped,
                    request_id: None,
                    contact: item.contact().cloned(),
                },
            );
        }

        let mut credits_used = 0;
        for batch in &snapshot.sub_batches {
            if batch.accepted() {
                credits_used += batch.identifiers.len();
            }
            for line in sub_batch_lines(batch) {
                lines.insert(line.identifier.clone(), line);
            }
        }

        let mut report = Report {
            batch_id: snapshot.id,
            requested: snapshot.requested.len(),
            revealed: 0,
            failed: 0,
            timed_out: 0,
            credits_exhausted: 0,
            duplicate_queries: 0,
            skipped: 0,
            cancelled: 0,
            pending: 0,
            credits_used,
            cancelled_while_pending: snapshot.cancelled_while_pending,
            items: Vec::with_capacity(snapshot.requested.len()),
        };

        for identifier in &snapshot.requested {
            let line = lines.remove(identifier).unwrap_or_else(|| ReportItem {
                identifier: identifier.clone(),
                kind: identifier.kind(),
                disposition: Disposition::Pending,
                request_id: None,
                contact: None,
            });
            report.count(line.disposition);
            report.items.push(line);
        }

        report
    }
}

fn sub_batch_lines(batch: &SubBatch) -> Vec<ReportItem> {
    let uniform = |disposition: Disposition| -> Vec<ReportItem> {
        batch
            .identifiers
            .iter()
            .map(|id| ReportItem {
                identifier: id.clone(),
                kind: id.kind(),
                disposition,
                request_id: batch.key.clone(),
                contact: None,
            })
            .collect()
    };

    match &batch.status {
        SubBatchStatus::Queued | SubBatchStatus::Submitted => uniform(Disposition::Pending),
        SubBatchStatus::Failed(_) => uniform(Disposition::Failed),
        SubBatchStatus::QuotaExceeded => uniform(Disposition::CreditsExhausted),
        SubBatchStatus::Cancelled => uniform(Disposition::Cancelled),
        SubBatchStatus::Resolved | SubBatchStatus::TimedOut => {
            let results: HashMap<&Identifier, &CallbackItem> = batch
                .items
                .iter()
                .map(|item| (&item.identifier, item))
                .collect();
            batch
                .identifiers
                .iter()
                .map(|id| match results.get(id) {
                    Some(item) => ReportItem {
                        identifier: id.clone(),
                        kind: id.kind(),
                        disposition: Disposition::from_outcome(&item.outcome),
                        request_id: batch.key.clone(),
                        contact: item.contact().cloned(),
                    },
                    None => ReportItem {
                        identifier: id.clone(),
                        kind: id.kind(),
                        disposition: Disposition::TimedOut,
                        request_id: batch.key.clone(),
                        contact: None,
                    },
                })
                .collect()
        }
    }
}
