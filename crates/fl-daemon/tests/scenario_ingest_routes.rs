//! In-process scenario tests for the ingestion surface that need no
//! database: auth, rate limiting, parse/validation failures and batcher
//! backpressure.
//!
//! These tests spin up the Axum router **without** binding a TCP socket and
//! drive it via `tower::ServiceExt::oneshot`. The store pool is lazy and
//! points nowhere; every path exercised here stops before touching it.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt; // oneshot

use fl_config::Config;
use fl_daemon::{routes, state};

const TEST_KEY: &str = "static-test-key";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_state(extra: &[(&str, &str)]) -> Arc<state::AppState> {
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgres://127.0.0.1:1/nowhere")
        .expect("lazy pool");

    let mut vars = vec![
        ("DATABASE_URL".to_string(), "postgres://ignored/x".to_string()),
        ("API_KEYS".to_string(), TEST_KEY.to_string()),
    ];
    for (k, v) in extra {
        vars.push((k.to_string(), v.to_string()));
    }
    let cfg = Config::from_lookup(|k| {
        vars.iter()
            .find(|(key, _)| key == k)
            .map(|(_, v)| v.clone())
    })
    .expect("config");

    Arc::new(state::AppState::new(pool, &cfg))
}

fn post_log(key: Option<&str>, content_type: &str, body: &str) -> Request<axum::body::Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/logs")
        .header("content-type", content_type);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(axum::body::Body::from(body.to_string())).unwrap()
}

async fn call(
    st: &Arc<state::AppState>,
    req: Request<axum::body::Body>,
) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
    let resp = routes::build_router(Arc::clone(st))
        .oneshot(req)
        .await
        .expect("oneshot failed");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.expect("body").to_bytes();
    (status, headers, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn valid_log_body() -> String {
    r#"{"log":{"service":"svc","level":"info","message":"hello"}}"#.to_string()
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_key_is_401() {
    let st = make_state(&[]);
    let (status, _, body) = call(&st, post_log(None, "application/json", &valid_log_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(parse_json(body)["error"], "unauthorized");
}

#[tokio::test]
async fn unknown_key_gets_the_same_401_body_as_missing() {
    let st = make_state(&[]);
    let (s1, _, b1) = call(&st, post_log(None, "application/json", &valid_log_body())).await;
    let (s2, _, b2) = call(
        &st,
        post_log(Some("wrong-key"), "application/json", &valid_log_body()),
    )
    .await;

    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(b1, b2, "401 responses must not distinguish missing from unknown");
}

#[tokio::test]
async fn static_key_authenticates_via_x_api_key() {
    let st = make_state(&[]);
    let (status, _, body) =
        call(&st, post_log(Some(TEST_KEY), "application/json", &valid_log_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(parse_json(body)["id"].is_string());
}

#[tokio::test]
async fn static_key_authenticates_via_bearer() {
    let st = make_state(&[]);
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/logs")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {TEST_KEY}"))
        .body(axum::body::Body::from(valid_log_body()))
        .unwrap();
    let (status, _, _) = call(&st, req).await;
    assert_eq!(status, StatusCode::CREATED);
}

// ---------------------------------------------------------------------------
// Rate limiting (S5)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_request_within_burst_one_is_429_with_retry_after() {
    let st = make_state(&[("RATELIMIT_DEFAULT_RPS", "1"), ("RATELIMIT_BURST", "1")]);

    let (first, _, _) =
        call(&st, post_log(Some(TEST_KEY), "application/json", &valid_log_body())).await;
    assert_eq!(first, StatusCode::CREATED);

    let (second, headers, body) =
        call(&st, post_log(Some(TEST_KEY), "application/json", &valid_log_body())).await;
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers.get("retry-after").unwrap(), "1");
    assert_eq!(parse_json(body)["error"], "rate_limited");
}

#[tokio::test]
async fn disabled_rate_limiting_always_accepts() {
    let st = make_state(&[
        ("RATELIMIT_ENABLED", "false"),
        ("RATELIMIT_DEFAULT_RPS", "1"),
        ("RATELIMIT_BURST", "1"),
    ]);

    for _ in 0..5 {
        let (status, _, _) =
            call(&st, post_log(Some(TEST_KEY), "application/json", &valid_log_body())).await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

// ---------------------------------------------------------------------------
// Parse and validation failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_json_is_400_parse_error() {
    let st = make_state(&[]);
    let (status, _, body) =
        call(&st, post_log(Some(TEST_KEY), "application/json", "{broken")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["error"], "parse_error");
}

#[tokio::test]
async fn validation_error_names_the_first_offending_field() {
    let st = make_state(&[]);
    let body = r#"{"log":{"service":"svc","level":"info","message":""}}"#;
    let (status, _, body) = call(&st, post_log(Some(TEST_KEY), "application/json", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json = parse_json(body);
    assert_eq!(json["error"], "validation_error");
    assert_eq!(json["field"], "message");
}

#[tokio::test]
async fn plain_text_lines_are_accepted() {
    let st = make_state(&[]);
    let (status, _, _) = call(
        &st,
        post_log(Some(TEST_KEY), "text/plain", "ERROR billing: charge failed"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

// ---------------------------------------------------------------------------
// Batch partial acceptance (S2)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_reports_per_item_errors_with_indices() {
    let st = make_state(&[]);
    let body = r#"{"logs":[
        {"service":"svc","level":"info","message":"one"},
        {"service":"svc","level":"info"},
        {"service":"svc","level":"warn","message":"three"}
    ]}"#;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/logs/batch")
        .header("content-type", "application/json")
        .header("x-api-key", TEST_KEY)
        .body(axum::body::Body::from(body))
        .unwrap();

    let (status, _, body) = call(&st, req).await;
    assert_eq!(status, StatusCode::CREATED);
    let json = parse_json(body);
    assert_eq!(json["accepted"], 2);
    assert_eq!(json["total"], 3);
    assert_eq!(json["errors"][0]["index"], 1);
    assert_eq!(json["errors"][0]["field"], "message");
}

#[tokio::test]
async fn structurally_broken_batch_is_rejected_whole() {
    let st = make_state(&[]);
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/logs/batch")
        .header("content-type", "application/json")
        .header("x-api-key", TEST_KEY)
        .body(axum::body::Body::from(r#"{"logs": "not-an-array"}"#))
        .unwrap();

    let (status, _, body) = call(&st, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["error"], "parse_error");
}

// ---------------------------------------------------------------------------
// Backpressure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn buffer_past_the_hard_cap_is_503_with_retry_after() {
    // BATCH_SIZE=1 gives a hard cap of 4; no flusher task is running.
    let st = make_state(&[("BATCH_SIZE", "1")]);

    for _ in 0..4 {
        let (status, _, _) =
            call(&st, post_log(Some(TEST_KEY), "application/json", &valid_log_body())).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, headers, body) =
        call(&st, post_log(Some(TEST_KEY), "application/json", &valid_log_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(headers.get("retry-after").unwrap(), "1");
    assert_eq!(parse_json(body)["error"], "queue_full");
}

// ---------------------------------------------------------------------------
// Health and routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_open_and_reports_degraded_without_a_database() {
    let st = make_state(&[]);
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, _, body) = call(&st, req).await;
    assert_eq!(status, StatusCode::OK, "health needs no auth");
    let json = parse_json(body);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["database"]["healthy"], false);
    assert_eq!(json["batcher"]["state"], "running");
}

#[tokio::test]
async fn store_failure_on_a_synchronous_path_is_an_opaque_500() {
    let st = make_state(&[]);
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/notices")
        .header("content-type", "application/json")
        .header("x-api-key", TEST_KEY)
        .body(axum::body::Body::from(
            r#"{"error":{"class":"E","message":"boom"}}"#,
        ))
        .unwrap();

    let (status, _, body) = call(&st, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json = parse_json(body);
    assert_eq!(json["error"], "internal", "no internal details may leak");
    assert!(json.get("reason").is_none());
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let st = make_state(&[]);
    let req = Request::builder()
        .method("GET")
        .uri("/api/v1/nope")
        .header("x-api-key", TEST_KEY)
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _, _) = call(&st, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
