//! Bulk reveal orchestration.
//!
//! [`RevealOrchestrator::submit`] splits a list of identifiers into
//! provider-sized sub-batches and returns a [`BatchHandle`] immediately. A
//! background task then submits the sub-batches one by one, each gated by the
//! rate limiter and the daily quota, and registers every accepted sub-batch in
//! the [`PendingRequestTable`]. Webhook deliveries and the timeout sweep feed
//! results back into the handle through the table's completion handlers.

use crate::collab::ContactCache;
use crate::error::{Result, RevealError};
use crate::limiter::{QuotaState, RateLimiter};
use crate::model::{BatchStatus, CallbackItem, CompletedBatch};
use crate::pending::PendingRequestTable;
use crate::provider::RevealProvider;
use crate::retry::RetryPolicy;
use leadgen_core::{CorrelationKey, Identifier, IdentifierKind, ProviderConfig, RevealConfig};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Options for one bulk reveal.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Largest sub-batch to submit; further capped by the provider maximum
    pub max_batch_size: usize,
    /// How long each sub-batch may wait for its webhook
    pub timeout: Duration,
    /// Cancels submission and waiting when fired
    pub cancel: Option<CancellationToken>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            timeout: Duration::from_secs(300),
            cancel: None,
        }
    }
}

impl BatchOptions {
    /// Options from configuration.
    #[must_use]
    pub fn from_config(provider: &ProviderConfig, reveal: &RevealConfig) -> Self {
        Self {
            max_batch_size: provider.max_batch_size,
            timeout: Duration::from_secs(reveal.batch_timeout_secs),
            cancel: None,
        }
    }

    /// Set the sub-batch size.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set the per-sub-batch timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(RevealError::InvalidOptions(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(RevealError::InvalidOptions(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where one sub-batch is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubBatchStatus {
    /// Not submitted yet
    Queued,
    /// Accepted by the provider, waiting for webhooks
    Submitted,
    /// Every identifier received a terminal result
    Resolved,
    /// Deadline elapsed; `items` holds what arrived
    TimedOut,
    /// Submission or registration failed
    Failed(String),
    /// Not submitted because the daily quota was short
    QuotaExceeded,
    /// Not submitted because the run was cancelled
    Cancelled,
}

impl SubBatchStatus {
    /// Whether the sub-batch will not change any more.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Submitted)
    }
}

impl fmt::Display for SubBatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Submitted => write!(f, "submitted"),
            Self::Resolved => write!(f, "resolved"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::QuotaExceeded => write!(f, "quota_exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One provider-sized slice of a bulk reveal.
#[derive(Debug, Clone)]
pub struct SubBatch {
    /// Position in submission order
    pub index: usize,
    /// Identifiers in this slice
    pub identifiers: Vec<Identifier>,
    /// Correlation key once the provider accepted the slice
    pub key: Option<CorrelationKey>,
    /// Whether `key` is tracked in the pending table on behalf of this run
    pub registered: bool,
    /// Whether the provider accepted (and charged for) the slice
    pub billed: bool,
    /// Lifecycle status
    pub status: SubBatchStatus,
    /// Terminal items delivered for this slice
    pub items: Vec<CallbackItem>,
}

impl SubBatch {
    fn new(index: usize, identifiers: Vec<Identifier>) -> Self {
        Self {
            index,
            identifiers,
            key: None,
            registered: false,
            billed: false,
            status: SubBatchStatus::Queued,
            items: Vec::new(),
        }
    }

    /// Whether the provider accepted (and billed) this slice.
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.billed
    }
}

/// Point-in-time view of a bulk reveal.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    /// Handle id
    pub id: Uuid,
    /// De-duplicated identifiers in input order
    pub requested: Vec<Identifier>,
    /// Results served from the contact cache
    pub skipped: Vec<CallbackItem>,
    /// Provider sub-batches
    pub sub_batches: Vec<SubBatch>,
    /// Whether the submission task has finished
    pub submission_finished: bool,
    /// Whether the run was cancelled before every sub-batch completed
    pub cancelled_while_pending: bool,
}

impl BatchSnapshot {
    /// Whether every sub-batch is terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.submission_finished && self.sub_batches.iter().all(|b| b.status.is_terminal())
    }
}

struct HandleShared {
    state: Mutex<BatchSnapshot>,
    changed: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl HandleShared {
    fn lock(&self) -> MutexGuard<'_, BatchSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut BatchSnapshot)) {
        {
            let mut state = self.lock();
            f(&mut state);
        }
        self.changed.send_modify(|version| *version += 1);
    }

    fn set_status(&self, index: usize, status: SubBatchStatus) {
        self.update(|state| {
            if let Some(batch) = state.sub_batches.get_mut(index) {
                batch.status = status;
            }
        });
    }

    fn complete_sub_batch(&self, index: usize, completed: CompletedBatch) {
        let status = match completed.status {
            BatchStatus::TimedOut => SubBatchStatus::TimedOut,
            _ => SubBatchStatus::Resolved,
        };
        self.update(|state| {
            if let Some(batch) = state.sub_batches.get_mut(index) {
                batch.items = completed.items;
                batch.status = status;
            }
        });
    }

    fn mark_cancelled(&self) {
        self.update(|state| {
            if !state.is_complete() {
                state.cancelled_while_pending = true;
            }
        });
    }
}

/// Handle to a running bulk reveal.
///
/// Cloning is cheap; all clones observe the same run.
#[derive(Clone)]
pub struct BatchHandle {
    shared: Arc<HandleShared>,
}

impl BatchHandle {
    /// Unique id of this run.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.lock().id
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> BatchSnapshot {
        self.shared.lock().clone()
    }

    /// Whether every sub-batch is terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared.lock().is_complete()
    }

    /// Correlation keys this run registered in the pending table.
    ///
    /// A key the provider returned but another run already tracks is not
    /// included.
    #[must_use]
    pub fn keys(&self) -> Vec<CorrelationKey> {
        self.shared
            .lock()
            .sub_batches
            .iter()
            .filter(|b| b.registered)
            .filter_map(|b| b.key.clone())
            .collect()
    }

    /// Cancel submission and waiting. Work the provider already accepted is
    /// not recalled.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Wait until every sub-batch is terminal or the run is cancelled.
    ///
    /// Returns `true` if the run completed.
    pub async fn wait(&self) -> bool {
        let mut changes = self.shared.changed.subscribe();
        loop {
            if self.is_complete() {
                return true;
            }
            tokio::select! {
                () = self.shared.cancel.cancelled() => {
                    self.shared.mark_cancelled();
                    return self.is_complete();
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        return self.is_complete();
                    }
                }
            }
        }
    }
}

impl fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("BatchHandle")
            .field("id", &state.id)
            .field("sub_batches", &state.sub_batches.len())
            .field("complete", &state.is_complete())
            .finish_non_exhaustive()
    }
}

/// Fans bulk reveals out to the provider.
#[derive(Clone)]
pub struct RevealOrchestrator {
    provider: Arc<dyn RevealProvider>,
    limiter: Arc<RateLimiter>,
    table: Arc<PendingRequestTable>,
    cache: Option<Arc<dyn ContactCache>>,
    callback_url: String,
    retry: RetryPolicy,
}

impl RevealOrchestrator {
    /// Create an orchestrator.
    ///
    /// `callback_url` is the public URL of this process's webhook receiver.
    #[must_use]
    pub fn new(
        provider: Arc<dyn RevealProvider>,
        limiter: Arc<RateLimiter>,
        table: Arc<PendingRequestTable>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            limiter,
            table,
            cache: None,
            callback_url: callback_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Serve already-revealed identifiers from `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ContactCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Retry policy for the credits check.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The limiter gating submissions.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Start a bulk reveal and return its handle without waiting.
    ///
    /// # Errors
    /// Returns `InvalidOptions` for a zero batch size or timeout. Failures of
    /// individual sub-batches are recorded in the handle instead.
    pub async fn submit(
        &self,
        identifiers: Vec<Identifier>,
        options: BatchOptions,
    ) -> Result<BatchHandle> {
        options.validate()?;

        let mut seen = HashSet::new();
        let requested: Vec<Identifier> = identifiers
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut skipped = Vec::new();
        let mut to_reveal = Vec::with_capacity(requested.len());
        for identifier in &requested {
            match self.cached(identifier).await {
                Some(item) => skipped.push(item),
                None => to_reveal.push(identifier.clone()),
            }
        }

        let size = options
            .max_batch_size
            .min(self.provider.max_batch_size())
            .max(1);
        let sub_batches: Vec<SubBatch> = to_reveal
            .chunks(size)
            .enumerate()
            .map(|(index, chunk)| SubBatch::new(index, chunk.to_vec()))
            .collect();

        let id = Uuid::new_v4();
        let kind_count =
            |kind: IdentifierKind| to_reveal.iter().filter(|i| i.kind() == kind).count();
        info!(
            batch_id = %id,
            provider = self.provider.provider_id(),
            requested = requested.len(),
            cached = skipped.len(),
            emails = kind_count(IdentifierKind::Email),
            profile_urls = kind_count(IdentifierKind::ProfileUrl),
            uids = kind_count(IdentifierKind::Uid),
            sub_batches = sub_batches.len(),
            batch_size = size,
            "starting bulk reveal"
        );

        let (changed, _) = watch::channel(0);
        let shared = Arc::new(HandleShared {
            state: Mutex::new(BatchSnapshot {
                id,
                requested,
                skipped,
                sub_batches: sub_batches.clone(),
                submission_finished: false,
                cancelled_while_pending: false,
            }),
            changed,
            cancel: options.cancel.unwrap_or_default(),
        });

        let orchestrator = self.clone();
        let task_shared = shared.clone();
        let timeout = options.timeout;
        tokio::spawn(async move {
            orchestrator
                .run_submissions(task_shared, sub_batches, timeout)
                .await;
        });

        Ok(BatchHandle { shared })
    }

    async fn cached(&self, identifier: &Identifier) -> Option<CallbackItem> {
        let cache = self.cache.as_ref()?;
        match cache.get(identifier).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(%identifier, error = %e, "contact cache lookup failed, revealing");
                None
            }
        }
    }

    async fn run_submissions(
        &self,
        shared: Arc<HandleShared>,
        sub_batches: Vec<SubBatch>,
        timeout: Duration,
    ) {
        let cancel = shared.cancel.clone();
        let mut batches = sub_batches.into_iter();

        while let Some(batch) = batches.next() {
            let index = batch.index;
            match self.limiter.acquire(1, &cancel).await {
                Ok(()) => {}
                Err(RevealError::Cancelled) => {
                    info!(index, "reveal cancelled, remaining sub-batches not submitted");
                    shared.set_status(index, SubBatchStatus::Cancelled);
                    for rest in batches.by_ref() {
                        shared.set_status(rest.index, SubBatchStatus::Cancelled);
                    }
                    shared.mark_cancelled();
                    break;
                }
                Err(e) => {
                    error!(index, error = %e, "rate limiter rejected sub-batch");
                    shared.set_status(index, SubBatchStatus::Failed(e.to_string()));
                    continue;
                }
            }

            self.submit_one(&shared, batch, timeout).await;
        }

        shared.update(|state| state.submission_finished = true);
        debug!("submission task finished");
    }

    async fn submit_one(&self, shared: &Arc<HandleShared>, batch: SubBatch, timeout: Duration) {
        let index = batch.index;
        let credits = u32::try_from(batch.identifiers.len()).unwrap_or(u32::MAX);

        if let Err(e) = self.limiter.record_consumption(credits) {
            warn!(index, credits, error = %e, "skipping sub-batch, daily quota exhausted");
            shared.set_status(index, SubBatchStatus::QuotaExceeded);
            return;
        }

        let key = match self
            .provider
            .submit(&batch.identifiers, &self.callback_url)
            .await
        {
            Ok(key) => key,
            Err(e) if e.provider_accepted() => {
                error!(index, credits, error = %e, "sub-batch accepted but not trackable");
                shared.update(|state| {
                    if let Some(sb) = state.sub_batches.get_mut(index) {
                        sb.billed = true;
                        sb.status = SubBatchStatus::Failed(e.to_string());
                    }
                });
                return;
            }
            Err(e) => {
                self.limiter.refund(credits);
                error!(index, credits, error = %e, "sub-batch submission failed");
                shared.set_status(index, SubBatchStatus::Failed(e.to_string()));
                return;
            }
        };

        // Register while holding the handle state: a delivery completing the
        // batch blocks on the same lock until the sub-batch reads Submitted.
        let handler_shared = shared.clone();
        let mut registered = Ok(());
        shared.update(|state| {
            let Some(sb) = state.sub_batches.get_mut(index) else {
                return;
            };
            sb.key = Some(key.clone());
            sb.billed = true;
            registered = self.table.register(
                key.clone(),
                batch.identifiers,
                Instant::now() + timeout,
                move |completed| handler_shared.complete_sub_batch(index, completed),
            );
            match &registered {
                Ok(()) => {
                    sb.registered = true;
                    sb.status = SubBatchStatus::Submitted;
                }
                Err(e) => sb.status = SubBatchStatus::Failed(e.to_string()),
            }
        });

        match registered {
            Ok(()) => info!(index, request_id = %key, credits, "sub-batch submitted"),
            Err(e) => error!(index, request_id = %key, error = %e, "failed to track sub-batch"),
        }
    }

    /// Reconcile the daily quota with the provider's credits endpoint.
    ///
    /// Transient failures are retried with backoff.
    pub async fn refresh_quota(&self) -> Result<QuotaState> {
        let provider = &self.provider;
        let remaining = self
            .retry
            .run("remaining_credits", move || provider.remaining_credits())
            .await?;
        self.limiter.sync_remaining(remaining);
        Ok(self.limiter.quota())
    }

    /// Stop tracking the handle's correlation keys. Returns how many were
    /// removed.
    pub fn release(&self, handle: &BatchHandle) -> usize {
        let removed = handle
            .keys()
            .iter()
            .filter(|key| self.table.remove(key))
            .count();
        debug!(batch_id = %handle.id(), removed, "released reveal batch");
        removed
    }
}
