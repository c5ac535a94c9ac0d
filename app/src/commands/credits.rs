//! `leadgen credits`: remaining daily allowance.

use crate::state::open_database;
use anyhow::Context;
use leadgen_core::AppConfig;
use leadgen_reveal::{RateLimiter, RetryPolicy, RevealProvider, SignalHireClient};

/// Print the provider's remaining credits and local usage for today.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let client =
        SignalHireClient::new(&config.provider).context("failed to create provider client")?;
    let limiter = RateLimiter::new(&config.limiter);

    let remaining = RetryPolicy::default()
        .run("remaining_credits", || client.remaining_credits())
        .await
        .context("failed to query remaining credits")?;
    limiter.sync_remaining(remaining);
    let quota = limiter.quota();

    let db = open_database(&config).await?;
    let today = quota.reset_at - chrono::Duration::days(1);
    let used = leadgen_db::runs::credits_used_since(db.pool(), today).await?;
    db.close().await;

    println!("remaining credits: {}", quota.remaining());
    println!("daily limit:       {}", quota.limit);
    println!("used by runs today: {used}");
    println!("resets at:         {}", quota.reset_at.to_rfc3339());
    Ok(())
}
