//! Outbound request rate and daily reveal quota.
//!
//! Two independent gates guard every billable submission:
//!
//! - a token bucket bounding the request rate (capacity `C`, refill `R`
//!   tokens per second, refilled lazily on each call), and
//! - a daily counter bounding total reveal credits, reset atomically when the
//!   clock passes `reset_at`, which advances by exactly one day per rollover.
//!
//! Waiting for tokens happens outside the bucket lock so a sleeping caller
//! never blocks the others. The daily quota never waits: it either grants the
//! reservation or fails with [`RevealError::QuotaExceeded`].

use crate::error::{Result, RevealError};
use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveTime, Utc};
use leadgen_core::LimiterConfig;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shortest sleep between refill checks.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Snapshot of the daily quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    /// Credits consumed in the current window
    pub consumed: u32,
    /// Credits allowed per window
    pub limit: u32,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
}

impl QuotaState {
    /// Credits left in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.consumed)
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed
            .mul_add(self.refill_per_sec, self.tokens)
            .min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Take `n` tokens, or report how long until they would be available.
    fn take(&mut self, n: u32, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(now);
        let wanted = f64::from(n);
        if self.tokens >= wanted {
            self.tokens -= wanted;
            Ok(())
        } else {
            let deficit = wanted - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec).max(MIN_WAIT))
        }
    }
}

#[derive(Debug)]
struct DailyQuota {
    limit: u32,
    consumed: u32,
    reset_at: DateTime<Utc>,
}

impl DailyQuota {
    fn roll(&mut self, now: DateTime<Utc>) {
        if now < self.reset_at {
            return;
        }
        while now >= self.reset_at {
            self.reset_at += ChronoDuration::days(1);
        }
        info!(
            previous_consumed = self.consumed,
            next_reset = %self.reset_at,
            "daily reveal quota reset"
        );
        self.consumed = 0;
    }

    fn state(&self) -> QuotaState {
        QuotaState {
            consumed: self.consumed,
            limit: self.limit,
            reset_at: self.reset_at,
        }
    }
}

/// Token-bucket rate limiter with an independent daily quota.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    quota: Mutex<DailyQuota>,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    ///
    /// The first quota window ends at the next UTC midnight.
    #[must_use]
    pub fn new(config: &LimiterConfig) -> Self {
        Self::with_params(
            config.bucket_capacity,
            config.refill_per_sec,
            config.daily_limit,
            next_utc_midnight(Utc::now()),
        )
    }

    /// Create a limiter with explicit parameters.
    ///
    /// The bucket starts full.
    #[must_use]
    pub fn with_params(
        capacity: u32,
        refill_per_sec: f64,
        daily_limit: u32,
        reset_at: DateTime<Utc>,
    ) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket {
                capacity,
                refill_per_sec,
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
            quota: Mutex::new(DailyQuota {
                limit: daily_limit,
                consumed: 0,
                reset_at,
            }),
        }
    }

    /// Bucket capacity.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.lock_bucket().capacity
    }

    /// Take `n` tokens without waiting.
    ///
    /// # Errors
    /// Returns `CapacityExceeded` if `n` is larger than the bucket.
    pub fn try_acquire(&self, n: u32) -> Result<bool> {
        let mut bucket = self.lock_bucket();
        check_capacity(&bucket, n)?;
        Ok(bucket.take(n, Instant::now()).is_ok())
    }

    /// Wait until `n` tokens are available and take them.
    ///
    /// # Errors
    /// Returns `CapacityExceeded` if `n` is larger than the bucket and
    /// `Cancelled` if `cancel` fires while waiting.
    pub async fn acquire(&self, n: u32, cancel: &CancellationToken) -> Result<()> {
        loop {
            let wait = {
                let mut bucket = self.lock_bucket();
                check_capacity(&bucket, n)?;
                match bucket.take(n, Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            debug!(tokens = n, ?wait, "waiting for rate limit tokens");
            tokio::select! {
                () = cancel.cancelled() => return Err(RevealError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Credits left in the current daily window.
    #[must_use]
    pub fn daily_remaining(&self) -> u32 {
        self.daily_remaining_at(Utc::now())
    }

    /// Credits left at an explicit time.
    #[must_use]
    pub fn daily_remaining_at(&self, now: DateTime<Utc>) -> u32 {
        self.quota_at(now).remaining()
    }

    /// Reserve `n` credits from the daily quota.
    ///
    /// # Errors
    /// Returns `QuotaExceeded` without consuming anything if fewer than `n`
    /// credits remain.
    pub fn record_consumption(&self, n: u32) -> Result<()> {
        self.record_consumption_at(n, Utc::now())
    }

    /// Reserve `n` credits at an explicit time.
    pub fn record_consumption_at(&self, n: u32, now: DateTime<Utc>) -> Result<()> {
        let mut quota = self.lock_quota();
        quota.roll(now);
        let remaining = quota.limit.saturating_sub(quota.consumed);
        if n > remaining {
            return Err(RevealError::QuotaExceeded {
                requested: n,
                remaining,
            });
        }
        quota.consumed += n;
        debug!(consumed = quota.consumed, limit = quota.limit, "recorded reveal credits");
        Ok(())
    }

    /// Give back credits reserved for a submission the provider rejected.
    pub fn refund(&self, n: u32) {
        let mut quota = self.lock_quota();
        quota.roll(Utc::now());
        quota.consumed = quota.consumed.saturating_sub(n);
    }

    /// Reconcile the local counter with the provider's remaining allowance.
    pub fn sync_remaining(&self, remaining: u32) {
        self.sync_remaining_at(remaining, Utc::now());
    }

    /// Reconcile at an explicit time.
    pub fn sync_remaining_at(&self, remaining: u32, now: DateTime<Utc>) {
        let mut quota = self.lock_quota();
        quota.roll(now);
        quota.consumed = quota.limit - remaining.min(quota.limit);
        info!(
            remaining = quota.limit - quota.consumed,
            limit = quota.limit,
            "synchronized daily quota with provider"
        );
    }

    /// Snapshot of the daily quota.
    #[must_use]
    pub fn quota(&self) -> QuotaState {
        self.quota_at(Utc::now())
    }

    /// Snapshot at an explicit time.
    #[must_use]
    pub fn quota_at(&self, now: DateTime<Utc>) -> QuotaState {
        let mut quota = self.lock_quota();
        quota.roll(now);
        quota.state()
    }

    fn lock_bucket(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_quota(&self) -> MutexGuard<'_, DailyQuota> {
        self.quota.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_capacity(bucket: &TokenBucket, n: u32) -> Result<()> {
    if n > bucket.capacity {
        return Err(RevealError::CapacityExceeded {
            requested: n,
            capacity: bucket.capacity,
        });
    }
    Ok(())
}

/// Start of the next UTC day after `now`.
#[must_use]
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or(now.date_naive());
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}
