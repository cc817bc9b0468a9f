//! End-to-end registration protection tests against the in-memory wiring.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use fake::{faker::internet::en::SafeEmail, Fake};
use serde_json::{json, Value};
use tower::ServiceExt;

use flagship_api::app::{create_app, AppState};
use flagship_api::config::Config;

fn test_app() -> Router {
    create_app(AppState::in_memory(Config::default()))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    actor: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder.header("x-actor-id", actor);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn check(app: &Router, ip: &str, email: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/registration/check",
        None,
        Some(json!({ "ip": ip, "email": email })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["decision"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_first_attempt_allowed() {
    let app = test_app();
    let email: String = SafeEmail().fake();
    assert_eq!(check(&app, "203.0.113.1", &email).await, "allowed");
}

#[tokio::test]
async fn test_check_requires_resolvable_ip() {
    let app = test_app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/registration/check",
        None,
        Some(json!({ "email": "user@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_escalation_captcha_then_block() {
    let app = test_app();

    let mut decisions = Vec::new();
    for _ in 0..6 {
        decisions.push(check(&app, "203.0.113.9", "user@example.com").await);
    }

    // Defaults: captcha at 3 attempts in the window, block past 5.
    assert_eq!(decisions[0], "allowed");
    assert_eq!(decisions[1], "allowed");
    assert_eq!(decisions[2], "captcha_required");
    assert_eq!(decisions[5], "blocked");

    // The block persists on subsequent attempts.
    assert_eq!(check(&app, "203.0.113.9", "user@example.com").await, "blocked");
}

#[tokio::test]
async fn test_suspicious_signals_block_under_lowered_threshold() {
    let app = test_app();

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/api/v1/registration/protection",
        Some("admin-1"),
        Some(json!({ "suspicion_threshold": 0.5, "reason": "tightening during signup wave" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Disposable domain plus missing user agent clears the lowered bar
    // on the very first attempt.
    assert_eq!(
        check(&app, "203.0.113.20", "throwaway@mailinator.com").await,
        "blocked"
    );
    assert_eq!(check(&app, "203.0.113.21", "user@example.com").await, "allowed");
}

#[tokio::test]
async fn test_toggle_disables_registration() {
    let app = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/registration/toggle",
        Some("admin-1"),
        Some(json!({ "enabled": false, "reason": "maintenance window" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registration_enabled"], false);

    assert_eq!(check(&app, "203.0.113.30", "user@example.com").await, "blocked");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/registration/toggle",
        Some("admin-1"),
        Some(json!({ "enabled": true, "reason": "maintenance complete" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check(&app, "203.0.113.31", "user@example.com").await, "allowed");
}

#[tokio::test]
async fn test_thresholds_read_and_update() {
    let app = test_app();

    let (status, body) = send(&app, Method::GET, "/api/v1/registration/protection", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rate_limit"], 5);
    assert_eq!(body["captcha_threshold"], 3);

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/api/v1/registration/protection",
        Some("admin-1"),
        Some(json!({ "rate_limit": 10, "reason": "raising limit for launch day" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rate_limit"], 10);

    // Invalid combinations are rejected with the old values kept.
    let (status, _) = send(
        &app,
        Method::PATCH,
        "/api/v1/registration/protection",
        Some("admin-1"),
        Some(json!({ "suspicion_threshold": 1.5, "reason": "bad update attempt" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, Method::GET, "/api/v1/registration/protection", None, None).await;
    assert_eq!(body["rate_limit"], 10);
    assert_eq!(body["suspicion_threshold"], 0.8);
}

#[tokio::test]
async fn test_update_requires_actor_and_reason() {
    let app = test_app();

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/api/v1/registration/protection",
        None,
        Some(json!({ "rate_limit": 10, "reason": "no actor attached" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/api/v1/registration/protection",
        Some("admin-1"),
        Some(json!({ "rate_limit": 10, "reason": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_block_and_unblock() {
    let app = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/registration/blocks",
        Some("admin-1"),
        Some(json!({ "ip": "198.51.100.7", "reason": "abuse report 4417" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ip"], "198.51.100.7");
    assert!(body["blocked_until"].is_string());

    assert_eq!(check(&app, "198.51.100.7", "user@example.com").await, "blocked");

    let (status, _) = send(
        &app,
        Method::DELETE,
        "/api/v1/registration/blocks/198.51.100.7",
        Some("admin-1"),
        Some(json!({ "reason": "abuse report resolved" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(check(&app, "198.51.100.7", "user@example.com").await, "allowed");
}

#[tokio::test]
async fn test_unblock_rejects_malformed_ip() {
    let app = test_app();
    let (status, _) = send(
        &app,
        Method::DELETE,
        "/api/v1/registration/blocks/not-an-ip",
        Some("admin-1"),
        Some(json!({ "reason": "typo in automation" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_denied_domain_blocks_first_attempt() {
    let app = test_app();

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/registration/domain-policies",
        Some("admin-1"),
        Some(json!({ "domain": "spam.example", "policy": "deny", "reason": "campaign abuse" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(
        check(&app, "203.0.113.40", "anyone@spam.example").await,
        "blocked"
    );

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/registration/domain-policies",
        Some("admin-1"),
        Some(json!({ "domain": "spam.example", "policy": "maybe", "reason": "bad policy value" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_over_range() {
    let app = test_app();

    for _ in 0..4 {
        check(&app, "203.0.113.50", "user@example.com").await;
    }
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/registration/success",
        None,
        Some(json!({ "ip": "203.0.113.50", "email": "user@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/registration/metrics?range=24h",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_attempts"], 5);
    assert_eq!(body["successful_registrations"], 1);
    assert_eq!(body["captcha_challenges"], 2);
    assert_eq!(body["unique_ips"], 1);

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/registration/metrics?range=2w",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
