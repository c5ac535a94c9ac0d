//! Inbound webhook receiver.
//!
//! The provider posts reveal results to `POST /signalhire/callback` with the
//! correlation key in the `Request-Id` header. The handler validates the
//! payload against a strict schema, acknowledges it immediately and hands it
//! to a [`CallbackWorker`] over a bounded queue; the worker applies it to the
//! [`PendingRequestTable`]. Nothing on the request path touches the table.
//!
//! Responses:
//! - `200 {"status":"accepted","request_id":...}` once the body validates
//! - `400` when the `Request-Id` header is missing or empty
//! - `422` when the body fails schema validation
//! - `503` when the queue is full or the worker is gone (the provider retries)

use crate::error::{Result, RevealError};
use crate::model::{CallbackItem, Contact, RevealOutcome};
use crate::pending::{PendingRequestTable, ResolveOutcome};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use leadgen_core::{CorrelationKey, Identifier};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Webhook endpoint path.
pub const CALLBACK_PATH: &str = "/signalhire/callback";

/// Liveness endpoint path.
pub const HEALTH_PATH: &str = "/health";

/// Header carrying the correlation key.
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Maximum request body size in bytes (10 MB)
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Public callback URL for a receiver reachable at `public_url`.
#[must_use]
pub fn callback_url(public_url: &str) -> String {
    format!("{}{}", public_url.trim_end_matches('/'), CALLBACK_PATH)
}

/// One validated webhook delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Correlation key from the `Request-Id` header
    pub key: CorrelationKey,
    /// Parsed items
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WebhookStatus {
    Success,
    Failed,
    CreditsAreOver,
    TimeoutExceeded,
    DuplicateQuery,
}

#[derive(Debug, Deserialize)]
struct WebhookItem {
    status: WebhookStatus,
    item: String,
    #[serde(default)]
    candidate: Option<Map<String, Value>>,
}

impl WebhookItem {
    fn into_callback_item(self) -> Result<CallbackItem> {
        let identifier = Identifier::new(self.item)
            .map_err(|e| RevealError::MalformedWebhook(e.to_string()))?;

        let outcome = match self.status {
            WebhookStatus::Success => {
                let candidate = self.candidate.ok_or_else(|| {
                    RevealError::MalformedWebhook(format!(
                        "success item {identifier} has no candidate"
                    ))
                })?;
                RevealOutcome::Success {
                    contact: Contact::new(candidate),
                }
            }
            WebhookStatus::Failed => RevealOutcome::Failed,
            WebhookStatus::CreditsAreOver => RevealOutcome::CreditsExhausted,
            WebhookStatus::TimeoutExceeded => RevealOutcome::Timeout,
            WebhookStatus::DuplicateQuery => RevealOutcome::DuplicateQuery,
        };

        Ok(CallbackItem::new(identifier, outcome))
    }
}

/// Validate a webhook body and convert it into callback items.
///
/// # Errors
/// Returns `MalformedWebhook` for anything that is not an array of
/// `{status, item, candidate}` objects with a known status.
pub fn parse_delivery(body: &[u8]) -> Result<Vec<CallbackItem>> {
    let raw: Vec<WebhookItem> =
        serde_json::from_slice(body).map_err(|e| RevealError::MalformedWebhook(e.to_string()))?;
    raw.into_iter()
        .map(WebhookItem::into_callback_item)
        .collect()
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    status: &'static str,
    request_id: String,
}

#[derive(Clone)]
struct ReceiverState {
    queue: mpsc::Sender<Delivery>,
}

/// HTTP side of the webhook receiver.
pub struct CallbackReceiver {
    queue: mpsc::Sender<Delivery>,
}

impl CallbackReceiver {
    /// Create a receiver and the worker that drains its queue into `table`.
    #[must_use]
    pub fn new(table: Arc<PendingRequestTable>, queue_capacity: usize) -> (Self, CallbackWorker) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        (Self { queue: tx }, CallbackWorker { rx, table })
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let state = ReceiverState {
            queue: self.queue.clone(),
        };

        Router::new()
            .route(CALLBACK_PATH, post(handle_callback))
            .route(HEALTH_PATH, get(health))
            .with_state(state)
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires.
    ///
    /// When this returns, the receiver's queue senders are dropped and the
    /// worker drains what is left.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, path = CALLBACK_PATH, "webhook receiver listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("webhook receiver shutting down gracefully");
            })
            .await?;
        Ok(())
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "status": "error", "detail": detail.into() })),
    )
        .into_response()
}

fn request_key(headers: &HeaderMap) -> Option<CorrelationKey> {
    let value = headers.get(REQUEST_ID_HEADER)?.to_str().ok()?;
    CorrelationKey::new(value).ok()
}

async fn handle_callback(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(key) = request_key(&headers) else {
        warn!("rejected webhook without Request-Id header");
        return error_response(StatusCode::BAD_REQUEST, "missing Request-Id header");
    };

    let items = match parse_delivery(&body) {
        Ok(items) => items,
        Err(e) => {
            warn!(request_id = %key, error = %e, "rejected malformed webhook");
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
        }
    };

    debug!(request_id = %key, items = items.len(), "accepted webhook delivery");
    let delivery = Delivery {
        key: key.clone(),
        items,
    };

    match state.queue.try_send(delivery) {
        Ok(()) => (
            StatusCode::OK,
            Json(AcceptedResponse {
                status: "accepted",
                request_id: key.to_string(),
            }),
        )
            .into_response(),
        Err(TrySendError::Full(_)) => {
            warn!(request_id = %key, "callback queue full, asking provider to retry");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "receiver busy")
        }
        Err(TrySendError::Closed(_)) => {
            warn!(request_id = %key, "callback worker stopped, asking provider to retry");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "receiver shutting down")
        }
    }
}

/// Counters reported by a drained [`CallbackWorker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Deliveries processed
    pub deliveries: usize,
    /// Items recorded as new results
    pub applied: usize,
    /// Items ignored as duplicates
    pub duplicates: usize,
    /// Items for identifiers outside their batch
    pub unknown_items: usize,
    /// Deliveries for keys the table did not track
    pub unknown_keys: usize,
}

impl WorkerStats {
    fn record(&mut self, outcome: &ResolveOutcome) {
        self.deliveries += 1;
        self.applied += outcome.applied;
        self.duplicates += outcome.duplicates;
        self.unknown_items += outcome.unknown;
        if outcome.is_unknown_key() {
            self.unknown_keys += 1;
        }
    }
}

/// Consumes validated deliveries and applies them to the pending table.
pub struct CallbackWorker {
    rx: mpsc::Receiver<Delivery>,
    table: Arc<PendingRequestTable>,
}

impl CallbackWorker {
    /// Process deliveries until every sender is dropped, then return.
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while let Some(delivery) = self.rx.recv().await {
            let outcome = self.table.resolve(&delivery.key, delivery.items);
            stats.record(&outcome);
        }
        info!(
            deliveries = stats.deliveries,
            applied = stats.applied,
            duplicates = stats.duplicates,
            unknown_keys = stats.unknown_keys,
            "callback worker drained"
        );
        stats
    }

    /// Run the worker on its own task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run())
    }
}
