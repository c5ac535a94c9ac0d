//! Leadgen Reveal - Asynchronous reveal pipeline.
//!
//! Reveals are submitted to the provider in batches and answered later by
//! webhook. This crate ties the two halves together:
//!
//! - [`RateLimiter`] gates submissions with a token bucket and tracks the
//!   daily credit quota
//! - [`RevealOrchestrator`] splits bulk jobs into provider-sized sub-batches
//! - [`PendingRequestTable`] correlates webhook deliveries with submissions,
//!   idempotently and with deadlines
//! - [`CallbackReceiver`] is the axum webhook endpoint, feeding a
//!   [`CallbackWorker`] over a bounded queue
//! - [`ResultAggregator`] turns a finished handle into a [`Report`]
//!
//! # Example
//!
//! ```rust,ignore
//! use leadgen_reveal::{BatchOptions, RevealOrchestrator, ResultAggregator};
//!
//! let orchestrator = RevealOrchestrator::new(provider, limiter, table, callback_url);
//! let handle = orchestrator.submit(identifiers, BatchOptions::default()).await?;
//! handle.wait().await;
//!
//! let report = ResultAggregator::collect(&handle);
//! orchestrator.release(&handle);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod aggregator;
pub mod collab;
pub mod error;
pub mod limiter;
pub mod model;
pub mod orchestrator;
pub mod pending;
pub mod provider;
pub mod receiver;
pub mod retry;

// Re-export commonly used types
pub use aggregator::{Disposition, Report, ReportItem, ResultAggregator};
pub use collab::{
    publish_report, sink_error, ContactCache, ContactRecord, JsonFileCache, MemoryCache,
    PublishSummary, RecordSink,
};
pub use error::{Result, RevealError};
pub use limiter::{QuotaState, RateLimiter};
pub use model::{BatchStatus, CallbackItem, CompletedBatch, Contact, RevealOutcome};
pub use orchestrator::{
    BatchHandle, BatchOptions, BatchSnapshot, RevealOrchestrator, SubBatch, SubBatchStatus,
};
pub use pending::{spawn_sweeper, PendingRequestTable, ResolveOutcome};
pub use provider::{RevealProvider, SignalHireClient, SIGNALHIRE_MAX_BATCH};
pub use receiver::{callback_url, CallbackReceiver, CallbackWorker, WorkerStats};
pub use retry::RetryPolicy;
