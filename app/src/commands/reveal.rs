//! `leadgen reveal`: bulk reveal from an identifier file.

use crate::cli::RevealArgs;
use crate::input::read_identifiers;
use crate::state::{open_database, Pipeline};
use anyhow::Context;
use chrono::Utc;
use leadgen_core::AppConfig;
use leadgen_reveal::{
    publish_report, BatchOptions, Disposition, PublishSummary, Report, ResultAggregator,
};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{info, warn};

/// Run a bulk reveal and print its report.
pub async fn run(config: AppConfig, args: RevealArgs) -> anyhow::Result<()> {
    let identifiers = read_identifiers(&args.input).await?;
    if identifiers.is_empty() {
        anyhow::bail!("no identifiers in {}", args.input.display());
    }

    let db = open_database(&config).await?;
    let pipeline = Pipeline::start(&config).await?;
    info!(
        addr = %pipeline.receiver.local_addr,
        count = identifiers.len(),
        "starting reveal"
    );

    if let Err(e) = pipeline.orchestrator.refresh_quota().await {
        warn!(error = %e, "could not sync remaining credits, using local quota");
    }

    let mut options = BatchOptions::from_config(&config.provider, &config.reveal);
    if let Some(size) = args.batch_size {
        options = options.with_max_batch_size(size);
    }
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let started_at = Utc::now();
    let handle = pipeline
        .orchestrator
        .submit(identifiers, options)
        .await
        .context("failed to start reveal")?;

    tokio::select! {
        _ = handle.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling remaining submissions");
            handle.cancel();
            handle.wait().await;
        }
    }

    let report = ResultAggregator::collect(&handle);
    let published = publish_report(&report, pipeline.cache.as_ref(), &db).await;
    if let Err(e) = leadgen_db::runs::record_run(db.pool(), &report, started_at).await {
        warn!(error = %e, "failed to record reveal run");
    }
    pipeline.orchestrator.release(&handle);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report, &published));
    }

    pipeline.receiver.shutdown().await?;
    db.close().await;
    Ok(())
}

fn label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Revealed => "revealed",
        Disposition::Failed => "failed",
        Disposition::TimedOut => "timed out",
        Disposition::CreditsExhausted => "no credits",
        Disposition::DuplicateQuery => "duplicate",
        Disposition::Skipped => "cached",
        Disposition::Cancelled => "cancelled",
        Disposition::Pending => "pending",
    }
}

/// Human-readable report.
pub fn render_report(report: &Report, published: &PublishSummary) -> String {
    let mut out = String::new();

    for item in &report.items {
        let name = item
            .contact
            .as_ref()
            .and_then(|c| c.full_name())
            .unwrap_or("");
        let _ = writeln!(
            out,
            "{:<11} {} {}",
            label(item.disposition),
            item.identifier,
            name
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} requested: {} revealed, {} cached, {} failed, {} timed out, {} no credits, {} duplicate, {} cancelled, {} pending",
        report.requested,
        report.revealed,
        report.skipped,
        report.failed,
        report.timed_out,
        report.credits_exhausted,
        report.duplicate_queries,
        report.cancelled,
        report.pending,
    );
    let _ = writeln!(
        out,
        "credits used: {}, synced: {}, sync failures: {}",
        report.credits_used, published.upserted, published.failed
    );
    if report.cancelled_while_pending {
        let _ = writeln!(out, "run was cancelled before completion");
    }

    out
}
