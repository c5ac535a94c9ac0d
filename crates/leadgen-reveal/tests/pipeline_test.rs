use async_trait::async_trait;
use leadgen_core::{CorrelationKey, Identifier};
use leadgen_reveal::{
    publish_report, BatchHandle, BatchOptions, CallbackItem, Contact, ContactCache,
    ContactRecord, MemoryCache, PendingRequestTable, RateLimiter, RecordSink, ResultAggregator,
    RetryPolicy, RevealError, RevealOrchestrator, RevealOutcome, RevealProvider, SubBatchStatus,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Provider double that hands out sequential keys and records every call.
struct ScriptedProvider {
    next_key: AtomicU64,
    submissions: Mutex<Vec<Vec<Identifier>>>,
    fail_submission: Option<usize>,
    unreadable_submission: Option<usize>,
    fixed_key: Option<&'static str>,
    credits: u32,
    max_batch: usize,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            next_key: AtomicU64::new(1000),
            submissions: Mutex::new(Vec::new()),
            fail_submission: None,
            unreadable_submission: None,
            fixed_key: None,
            credits: 5000,
            max_batch: 100,
        }
    }

    fn failing_at(index: usize) -> Self {
        Self {
            fail_submission: Some(index),
            ..Self::new()
        }
    }

    fn submissions(&self) -> Vec<Vec<Identifier>> {
        self.submissions.lock().expect("lock submissions").clone()
    }
}

#[async_trait]
impl RevealProvider for ScriptedProvider {
    async fn submit(
        &self,
        identifiers: &[Identifier],
        callback_url: &str,
    ) -> leadgen_reveal::Result<CorrelationKey> {
        assert_eq!(callback_url, "http://localhost:8787/signalhire/callback");
        let index = {
            let mut submissions = self.submissions.lock().expect("lock submissions");
            submissions.push(identifiers.to_vec());
            submissions.len() - 1
        };

        if self.fail_submission == Some(index) {
            return Err(RevealError::Transport {
                status: Some(500),
                message: "internal server error".to_string(),
            });
        }

        if self.unreadable_submission == Some(index) {
            return Err(RevealError::UnreadableAcceptance(
                "missing field `requestId`".to_string(),
            ));
        }

        let key = match self.fixed_key {
            Some(key) => key.to_string(),
            None => self.next_key.fetch_add(1, Ordering::SeqCst).to_string(),
        };
        Ok(CorrelationKey::new(key).expect("valid key"))
    }

    async fn remaining_credits(&self) -> leadgen_reveal::Result<u32> {
        Ok(self.credits)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch
    }

    fn provider_id(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ContactRecord>>,
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn upsert(&self, record: &ContactRecord) -> leadgen_reveal::Result<()> {
        self.records
            .lock()
            .expect("lock records")
            .push(record.clone());
        Ok(())
    }
}

struct Harness {
    provider: Arc<ScriptedProvider>,
    limiter: Arc<RateLimiter>,
    table: Arc<PendingRequestTable>,
    orchestrator: RevealOrchestrator,
}

fn harness_with(provider: ScriptedProvider, limiter: RateLimiter) -> Harness {
    let provider = Arc::new(provider);
    let limiter = Arc::new(limiter);
    let table = Arc::new(PendingRequestTable::new(Duration::from_secs(3600)));
    let orchestrator = RevealOrchestrator::new(
        provider.clone(),
        limiter.clone(),
        table.clone(),
        "http://localhost:8787/signalhire/callback",
    )
    .with_retry_policy(RetryPolicy::none());

    Harness {
        provider,
        limiter,
        table,
        orchestrator,
    }
}

fn limiter(daily_limit: u32) -> RateLimiter {
    RateLimiter::with_params(
        5,
        1.0,
        daily_limit,
        chrono::Utc::now() + chrono::Duration::days(1),
    )
}

fn harness() -> Harness {
    harness_with(ScriptedProvider::new(), limiter(5000))
}

fn ids(values: &[&str]) -> Vec<Identifier> {
    values
        .iter()
        .map(|v| Identifier::new(*v).expect("valid identifier"))
        .collect()
}

fn success(identifier: &Identifier) -> CallbackItem {
    let Value::Object(fields) = json!({ "fullName": identifier.as_str().to_uppercase() }) else {
        unreachable!();
    };
    CallbackItem::new(
        identifier.clone(),
        RevealOutcome::Success {
            contact: Contact::new(fields),
        },
    )
}

/// Wait until the submission task has settled every sub-batch.
async fn submissions_settled(handle: &BatchHandle) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = handle.snapshot();
            if snapshot.submission_finished {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("submission task finishes");
}

#[tokio::test]
async fn test_three_identifiers_batch_size_two() {
    let h = harness();
    let input = ids(&["a@example.com", "b@example.com", "c@example.com"]);

    let handle = h
        .orchestrator
        .submit(input.clone(), BatchOptions::default().with_max_batch_size(2))
        .await
        .expect("submit");
    submissions_settled(&handle).await;

    let submissions = h.provider.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0], input[..2].to_vec());
    assert_eq!(submissions[1], input[2..].to_vec());

    let keys = handle.keys();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
    assert_eq!(h.table.pending_count(), 2);

    h.table
        .resolve(&keys[0], vec![success(&input[0]), success(&input[1])]);
    h.table.resolve(&keys[1], vec![success(&input[2])]);

    assert!(handle.wait().await);
    let report = ResultAggregator::collect(&handle);
    assert_eq!(report.requested, 3);
    assert_eq!(report.revealed, 3);
    assert_eq!(report.credits_used, 3);
    assert_eq!(report.accounted(), report.requested);
    assert_eq!(h.limiter.quota().consumed, 3);

    assert_eq!(h.orchestrator.release(&handle), 2);
    assert!(h.table.is_empty());
}

#[tokio::test]
async fn test_partition_covers_every_identifier_once() {
    let h = harness();
    let values: Vec<String> = (0..23).map(|i| format!("user{i}@example.com")).collect();
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let input = ids(&refs);

    let handle = h
        .orchestrator
        .submit(input.clone(), BatchOptions::default().with_max_batch_size(5))
        .await
        .expect("submit");
    submissions_settled(&handle).await;

    let submissions = h.provider.submissions();
    assert_eq!(submissions.len(), 5);
    assert!(submissions.iter().all(|batch| batch.len() <= 5));
    let flattened: Vec<Identifier> = submissions.into_iter().flatten().collect();
    assert_eq!(flattened, input);
}

#[tokio::test]
async fn test_provider_maximum_caps_batch_size() {
    let provider = ScriptedProvider {
        max_batch: 2,
        ..ScriptedProvider::new()
    };
    let h = harness_with(provider, limiter(5000));

    let handle = h
        .orchestrator
        .submit(
            ids(&["a@example.com", "b@example.com", "c@example.com"]),
            BatchOptions::default().with_max_batch_size(50),
        )
        .await
        .expect("submit");
    submissions_settled(&handle).await;

    assert_eq!(h.provider.submissions().len(), 2);
}

#[tokio::test]
async fn test_duplicate_input_is_submitted_once() {
    let h = harness();
    let handle = h
        .orchestrator
        .submit(
            ids(&["a@example.com", "b@example.com", "a@example.com"]),
            BatchOptions::default(),
        )
        .await
        .expect("submit");
    submissions_settled(&handle).await;

    assert_eq!(
        h.provider.submissions(),
        vec![ids(&["a@example.com", "b@example.com"])]
    );
    assert_eq!(ResultAggregator::collect(&handle).requested, 2);
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let h = harness();
    let result = h
        .orchestrator
        .submit(
            ids(&["a@example.com"]),
            BatchOptions::default().with_max_batch_size(0),
        )
        .await;

    assert!(matches!(result, Err(RevealError::InvalidOptions(_))));
    assert!(h.provider.submissions().is_empty());
}

#[tokio::test]
async fn test_quota_shortfall_skips_api_call() {
    let h = harness_with(ScriptedProvider::new(), limiter(3));
    let input = ids(&[
        "a@example.com",
        "b@example.com",
        "c@example.com",
        "d@example.com",
        "e@example.com",
    ]);

    let handle = h
        .orchestrator
        .submit(input.clone(), BatchOptions::default().with_max_batch_size(2))
        .await
        .expect("submit");
    submissions_settled(&handle).await;

    // [a, b] fits, [c, d] does not, [e] uses the last credit
    let submissions = h.provider.submissions();
    assert_eq!(submissions, vec![input[..2].to_vec(), input[4..].to_vec()]);
    assert_eq!(handle.snapshot().sub_batches[1].status, SubBatchStatus::QuotaExceeded);

    let quota = h.limiter.quota();
    assert_eq!(quota.consumed, 3);
    assert!(quota.consumed <= quota.limit);

    let report = ResultAggregator::collect(&handle);
    assert_eq!(report.credits_exhausted, 2);
    assert_eq!(report.credits_used, 3);
}

#[tokio::test]
async fn test_failed_submission_is_refunded_and_not_retried() {
    let h = harness_with(ScriptedProvider::failing_at(0), limiter(100));
    let input = ids(&["a@example.com", "b@example.com", "c@example.com"]);

    let handle = h
        .orchestrator
        .submit(input, BatchOptions::default().with_max_batch_size(2))
        .await
        .expect("submit");
    submissions_settled(&handle).await;

    assert_eq!(h.provider.submissions().len(), 2);
    assert_eq!(h.limiter.quota().consumed, 1);
    assert!(matches!(
        handle.snapshot().sub_batches[0].status,
        SubBatchStatus::Failed(_)
    ));

    let report = ResultAggregator::collect(&handle);
    assert_eq!(report.failed, 2);
    assert_eq!(report.pending, 1);
    assert_eq!(report.credits_used, 1);
}

#[tokio::test]
async fn test_unreadable_acceptance_keeps_credits_spent() {
    let provider = ScriptedProvider {
        unreadable_submission: Some(0),
        ..ScriptedProvider::new()
    };
    let h = harness_with(provider, limiter(100));
    let input = ids(&["a@example.com", "b@example.com", "c@example.com"]);

    let handle = h
        .orchestrator
        .submit(input, BatchOptions::default().with_max_batch_size(2))
        .await
        .expect("submit");
    submissions_settled(&handle).await;

    // The provider charged for [a, b] even though no key came back
    assert_eq!(h.limiter.quota().consumed, 3);
    let snapshot = handle.snapshot();
    assert!(matches!(snapshot.sub_batches[0].status, SubBatchStatus::Failed(_)));
    assert!(snapshot.sub_batches[0].key.is_none());
    assert_eq!(handle.keys().len(), 1);

    let report = ResultAggregator::collect(&handle);
    assert_eq!(report.failed, 2);
    assert_eq!(report.credits_used, 3);
}

#[tokio::test]
async fn test_repeated_provider_key_fails_only_the_newcomer() {
    let provider = ScriptedProvider {
        fixed_key: Some("777"),
        ..ScriptedProvider::new()
    };
    let h = harness_with(provider, limiter(100));
    let first_input = ids(&["a@example.com"]);

    let first = h
        .orchestrator
        .submit(
            first_input.clone(),
            BatchOptions::default().with_timeout(Duration::from_secs(60)),
        )
        .await
        .expect("submit first");
    submissions_settled(&first).await;

    let second = h
        .orchestrator
        .submit(ids(&["b@example.com"]), BatchOptions::default())
        .await
        .expect("submit second");
    submissions_settled(&second).await;

    let sub_batch = second.snapshot().sub_batches.remove(0);
    let SubBatchStatus::Failed(reason) = &sub_batch.status else {
        panic!("expected failed sub-batch, got {}", sub_batch.status);
    };
    assert!(reason.contains("already registered"), "reason: {reason}");
    assert_eq!(sub_batch.key.as_ref().map(CorrelationKey::as_str), Some("777"));
    assert!(second.keys().is_empty());
    assert!(second.is_complete());

    // Releasing the newcomer leaves the first run's entry alone
    assert_eq!(h.orchestrator.release(&second), 0);
    let key = CorrelationKey::new("777").expect("valid key");
    assert_eq!(h.table.len(), 1);
    assert_eq!(h.table.status(&key), Some(leadgen_reveal::BatchStatus::Pending));

    h.table.resolve(&key, vec![success(&first_input[0])]);
    let completed = tokio::time::timeout(Duration::from_secs(2), first.wait())
        .await
        .expect("first run completes");
    assert!(completed);

    let report = ResultAggregator::collect(&second);
    assert_eq!(report.failed, 1);
    assert_eq!(report.credits_used, 1);
    assert_eq!(ResultAggregator::collect(&first).revealed, 1);
    assert_eq!(h.limiter.quota().consumed, 2);
    assert_eq!(h.orchestrator.release(&first), 1);
    assert!(h.table.is_empty());
}

#[tokio::test]
async fn test_deadline_keeps_partial_results() {
    let h = harness();
    let input = ids(&["a@example.com", "b@example.com"]);

    let handle = h
        .orchestrator
        .submit(
            input.clone(),
            BatchOptions::default().with_timeout(Duration::from_secs(60)),
        )
        .await
        .expect("submit");
    submissions_settled(&handle).await;
    let key = handle.keys().remove(0);

    let outcome = h.table.resolve(&key, vec![success(&input[0])]);
    assert!(outcome.still_pending());

    // Nothing times out before the deadline
    assert!(h.table.sweep(Instant::now()).is_empty());
    assert!(!handle.is_complete());

    let expired = h.table.sweep(Instant::now() + Duration::from_secs(61));
    assert_eq!(expired, vec![key.clone()]);
    assert!(handle.wait().await);

    let report = ResultAggregator::collect(&handle);
    assert_eq!(report.revealed, 1);
    assert_eq!(report.timed_out, 1);
    assert_eq!(
        handle.snapshot().sub_batches[0].status,
        SubBatchStatus::TimedOut
    );

    // A late delivery after the timeout changes nothing
    let late = h.table.resolve(&key, vec![success(&input[1])]);
    assert_eq!(late.applied, 0);
    assert_eq!(ResultAggregator::collect(&handle), report);
}

#[tokio::test]
async fn test_duplicate_delivery_does_not_double_count() {
    let h = harness();
    let input = ids(&["a@example.com", "b@example.com"]);

    let handle = h
        .orchestrator
        .submit(input.clone(), BatchOptions::default())
        .await
        .expect("submit");
    submissions_settled(&handle).await;
    let key = handle.keys().remove(0);

    h.table.resolve(&key, vec![success(&input[0])]);
    let repeat = h.table.resolve(&key, vec![success(&input[0])]);
    assert_eq!(repeat.duplicates, 1);
    h.table.resolve(
        &key,
        vec![CallbackItem::new(input[1].clone(), RevealOutcome::DuplicateQuery)],
    );

    assert!(handle.wait().await);
    let report = ResultAggregator::collect(&handle);
    assert_eq!(report.revealed, 1);
    assert_eq!(report.duplicate_queries, 1);
    assert_eq!(report.accounted(), 2);
}

#[tokio::test]
async fn test_cancel_stops_submission() {
    // One token, refilled roughly every 17 minutes
    let slow = RateLimiter::with_params(
        1,
        0.001,
        5000,
        chrono::Utc::now() + chrono::Duration::days(1),
    );
    let h = harness_with(ScriptedProvider::new(), slow);
    let cancel = CancellationToken::new();

    let handle = h
        .orchestrator
        .submit(
            ids(&["a@example.com", "b@example.com", "c@example.com"]),
            BatchOptions::default()
                .with_max_batch_size(1)
                .with_cancel(cancel.clone()),
        )
        .await
        .expect("submit");

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.provider.submissions().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first sub-batch submitted");

    cancel.cancel();
    assert!(!handle.wait().await);
    submissions_settled(&handle).await;

    assert_eq!(h.provider.submissions().len(), 1);
    let report = ResultAggregator::collect(&handle);
    assert!(report.cancelled_while_pending);
    assert_eq!(report.pending, 1);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.accounted(), 3);
}

#[tokio::test]
async fn test_cached_identifiers_are_skipped() {
    let cache = Arc::new(MemoryCache::new());
    let cached_id = Identifier::new("a@example.com").expect("valid identifier");
    cache
        .put(&cached_id, &success(&cached_id))
        .await
        .expect("seed cache");

    let h = harness();
    let orchestrator = h.orchestrator.clone().with_cache(cache.clone());
    let input = ids(&["a@example.com", "b@example.com"]);

    let handle = orchestrator
        .submit(input.clone(), BatchOptions::default())
        .await
        .expect("submit");
    submissions_settled(&handle).await;
    assert_eq!(h.provider.submissions(), vec![input[1..].to_vec()]);

    let key = handle.keys().remove(0);
    h.table.resolve(&key, vec![success(&input[1])]);
    assert!(handle.wait().await);

    let report = ResultAggregator::collect(&handle);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.revealed, 1);
    assert_eq!(report.credits_used, 1);

    let sink = RecordingSink::default();
    let summary = publish_report(&report, cache.as_ref(), &sink).await;
    assert_eq!(summary.upserted, 1);
    assert_eq!(summary.cached, 1);

    let records = sink.records.lock().expect("lock records").clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identifier, input[1]);
    assert_eq!(records[0].request_id, Some(key));
    assert_eq!(records[0].full_name.as_deref(), Some("B@EXAMPLE.COM"));
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_refresh_quota_reconciles_limiter() {
    let provider = ScriptedProvider {
        credits: 40,
        ..ScriptedProvider::new()
    };
    let h = harness_with(provider, limiter(100));

    let quota = h.orchestrator.refresh_quota().await.expect("refresh quota");
    assert_eq!(quota.remaining(), 40);
    assert_eq!(h.limiter.daily_remaining(), 40);
}
