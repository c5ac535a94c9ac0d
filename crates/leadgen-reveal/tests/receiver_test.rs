use axum::body::Body;
use axum::http::{Request, StatusCode};
use leadgen_core::{CorrelationKey, Identifier};
use leadgen_reveal::receiver::{CALLBACK_PATH, HEALTH_PATH};
use leadgen_reveal::{BatchStatus, CallbackReceiver, PendingRequestTable};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn table() -> Arc<PendingRequestTable> {
    Arc::new(PendingRequestTable::new(Duration::from_secs(3600)))
}

fn key(s: &str) -> CorrelationKey {
    CorrelationKey::new(s).expect("valid key")
}

fn register(table: &PendingRequestTable, request_id: &str, identifiers: &[&str]) {
    let identifiers = identifiers
        .iter()
        .map(|s| Identifier::new(*s).expect("valid identifier"))
        .collect();
    table
        .register(
            key(request_id),
            identifiers,
            Instant::now() + Duration::from_secs(300),
            |_| {},
        )
        .expect("register batch");
}

fn callback(request_id: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(CALLBACK_PATH)
        .header("content-type", "application/json");
    if let Some(id) = request_id {
        builder = builder.header("Request-Id", id);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("build request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_health() {
    let (receiver, _worker) = CallbackReceiver::new(table(), 8);
    let response = receiver
        .router()
        .oneshot(
            Request::builder()
                .uri(HEALTH_PATH)
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("health request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "healthy"}));
}

#[tokio::test]
async fn test_valid_delivery_resolves_batch() {
    let table = table();
    register(&table, "42", &["jane@example.com"]);
    let (receiver, worker) = CallbackReceiver::new(table.clone(), 8);

    let body = json!([{
        "status": "success",
        "item": "jane@example.com",
        "candidate": {"fullName": "Jane Doe"}
    }]);
    let response = receiver
        .router()
        .oneshot(callback(Some("42"), &body))
        .await
        .expect("callback request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"status": "accepted", "request_id": "42"})
    );

    drop(receiver);
    let stats = worker.run().await;
    assert_eq!(stats.deliveries, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(table.status(&key("42")), Some(BatchStatus::Resolved));
}

#[tokio::test]
async fn test_missing_request_id_is_rejected() {
    let table = table();
    register(&table, "42", &["jane@example.com"]);
    let (receiver, worker) = CallbackReceiver::new(table.clone(), 8);

    let body = json!([{"status": "failed", "item": "jane@example.com", "candidate": null}]);
    for request_id in [None, Some(""), Some("   ")] {
        let response = receiver
            .router()
            .oneshot(callback(request_id, &body))
            .await
            .expect("callback request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    drop(receiver);
    let stats = worker.run().await;
    assert_eq!(stats.deliveries, 0);
    assert_eq!(table.status(&key("42")), Some(BatchStatus::Pending));
}

#[tokio::test]
async fn test_malformed_payload_is_unprocessable() {
    let (receiver, worker) = CallbackReceiver::new(table(), 8);

    let bodies = [
        json!([{"status": "revealed", "item": "jane@example.com"}]),
        json!([{"status": "success", "item": "jane@example.com", "candidate": null}]),
        json!({"status": "success", "item": "jane@example.com"}),
    ];
    for body in &bodies {
        let response = receiver
            .router()
            .oneshot(callback(Some("42"), body))
            .await
            .expect("callback request");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    drop(receiver);
    assert_eq!(worker.run().await.deliveries, 0);
}

#[tokio::test]
async fn test_unknown_key_is_acknowledged() {
    let table = table();
    let (receiver, worker) = CallbackReceiver::new(table.clone(), 8);

    let body = json!([{"status": "failed", "item": "jane@example.com", "candidate": null}]);
    let response = receiver
        .router()
        .oneshot(callback(Some("999"), &body))
        .await
        .expect("callback request");
    assert_eq!(response.status(), StatusCode::OK);

    drop(receiver);
    let stats = worker.run().await;
    assert_eq!(stats.unknown_keys, 1);
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_full_queue_asks_provider_to_retry() {
    let (receiver, _worker) = CallbackReceiver::new(table(), 1);
    let body = json!([]);

    let first = receiver
        .router()
        .oneshot(callback(Some("1"), &body))
        .await
        .expect("first request");
    assert_eq!(first.status(), StatusCode::OK);

    let second = receiver
        .router()
        .oneshot(callback(Some("2"), &body))
        .await
        .expect("second request");
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_serve_over_tcp_until_shutdown() {
    let table = table();
    let completed = Arc::new(Mutex::new(None));
    let completed_clone = completed.clone();
    table
        .register(
            key("7"),
            vec![
                Identifier::new("a@example.com").expect("valid identifier"),
                Identifier::new("b@example.com").expect("valid identifier"),
            ],
            Instant::now() + Duration::from_secs(300),
            move |batch| {
                *completed_clone.lock().expect("lock") = Some(batch.items.len());
            },
        )
        .expect("register batch");

    let (receiver, worker) = CallbackReceiver::new(table.clone(), 8);
    let worker = worker.spawn();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(receiver.serve(listener, shutdown.clone()));

    let client = reqwest::Client::new();
    let url = format!("http://{addr}{CALLBACK_PATH}");
    // Providers normalise case; the echo still matches the submitted identifier
    let deliveries = [
        json!([{"status": "success", "item": "A@Example.com", "candidate": {"fullName": "A"}}]),
        json!([{"status": "failed", "item": "b@example.com", "candidate": null}]),
        json!([{"status": "failed", "item": "b@example.com", "candidate": null}]),
    ];
    for body in &deliveries {
        let response = client
            .post(&url)
            .header("Request-Id", "7")
            .json(body)
            .send()
            .await
            .expect("post callback");
        assert_eq!(response.status().as_u16(), 200);
    }

    drop(client);
    shutdown.cancel();
    server
        .await
        .expect("server task")
        .expect("server shuts down cleanly");
    let stats = worker.await.expect("worker task");

    assert_eq!(stats.deliveries, 3);
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(*completed.lock().expect("lock"), Some(2));
    assert_eq!(table.status(&key("7")), Some(BatchStatus::Resolved));
}
