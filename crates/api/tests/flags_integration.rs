//! End-to-end flag lifecycle tests against the in-memory wiring.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
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

async fn create_boolean_flag(app: &Router, key: &str, default_value: bool) {
    let (status, _) = send(
        app,
        Method::POST,
        "/api/v1/flags",
        Some("admin-1"),
        Some(json!({
            "key": key,
            "name": key,
            "flag_type": "boolean",
            "default_value": default_value,
            "enabled": true,
            "reason": "initial rollout setup"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn evaluate(app: &Router, key: &str, context: Value) -> Value {
    let (status, body) = send(
        app,
        Method::POST,
        &format!("/api/v1/flags/{}/evaluate", key),
        None,
        Some(json!({ "context": context })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_create_and_get_flag() {
    let app = test_app();
    create_boolean_flag(&app, "new-checkout", true).await;

    let (status, body) = send(&app, Method::GET, "/api/v1/flags/new-checkout", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "new-checkout");
    assert_eq!(body["version"], 1);
    assert_eq!(body["overrides"], json!([]));
}

#[tokio::test]
async fn test_mutations_require_actor_header() {
    let app = test_app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/flags",
        None,
        Some(json!({
            "key": "orphan",
            "name": "orphan",
            "flag_type": "boolean",
            "default_value": false,
            "reason": "should never land"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_evaluate_default_path() {
    let app = test_app();
    create_boolean_flag(&app, "dark-mode", true).await;

    let result = evaluate(&app, "dark-mode", json!({ "user_id": "user-1" })).await;
    assert_eq!(result["enabled"], true);
    assert_eq!(result["reason"], "default");
    assert_eq!(result["flag_version"], 1);
}

#[tokio::test]
async fn test_evaluate_unknown_flag_uses_fallback() {
    let app = test_app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/flags/no-such-flag/evaluate",
        None,
        Some(json!({ "context": {}, "fallback": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "not_found");
    assert_eq!(body["value"], true);
    assert_eq!(body["flag_version"], Value::Null);
}

#[tokio::test]
async fn test_update_takes_effect_immediately() {
    let app = test_app();
    create_boolean_flag(&app, "beta-banner", false).await;

    let before = evaluate(&app, "beta-banner", json!({})).await;
    assert_eq!(before["enabled"], false);

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/api/v1/flags/beta-banner",
        Some("admin-1"),
        Some(json!({ "default_value": true, "reason": "enabling for launch" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);

    let after = evaluate(&app, "beta-banner", json!({})).await;
    assert_eq!(after["enabled"], true);
    assert_eq!(after["flag_version"], 2);
}

#[tokio::test]
async fn test_archive_then_update_rejected() {
    let app = test_app();
    create_boolean_flag(&app, "old-flow", true).await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/flags/old-flow/archive",
        Some("admin-1"),
        Some(json!({ "reason": "superseded by new flow" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let result = evaluate(&app, "old-flow", json!({ "user_id": "user-1" })).await;
    assert_eq!(result["enabled"], false);
    assert_eq!(result["reason"], "archived");

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/api/v1/flags/old-flow",
        Some("admin-1"),
        Some(json!({ "enabled": false, "reason": "late edit attempt" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_override_lifecycle() {
    let app = test_app();
    create_boolean_flag(&app, "early-access", false).await;

    let (status, ovr) = send(
        &app,
        Method::POST,
        "/api/v1/flags/early-access/overrides",
        Some("admin-1"),
        Some(json!({
            "target_type": "user",
            "target_id": "user-7",
            "enabled": true,
            "reason": "beta tester enrollment"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let result = evaluate(&app, "early-access", json!({ "user_id": "user-7" })).await;
    assert_eq!(result["enabled"], true);
    assert_eq!(result["reason"], "override");

    let other = evaluate(&app, "early-access", json!({ "user_id": "user-8" })).await;
    assert_eq!(other["enabled"], false);
    assert_eq!(other["reason"], "default");

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!(
            "/api/v1/flags/early-access/overrides/{}",
            ovr["id"].as_str().unwrap()
        ),
        Some("admin-1"),
        Some(json!({ "reason": "beta program ended" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let result = evaluate(&app, "early-access", json!({ "user_id": "user-7" })).await;
    assert_eq!(result["reason"], "default");
}

#[tokio::test]
async fn test_batch_evaluate() {
    let app = test_app();
    create_boolean_flag(&app, "flag-a", true).await;
    create_boolean_flag(&app, "flag-b", false).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/flags/evaluate",
        None,
        Some(json!({
            "flag_keys": ["flag-a", "flag-b", "missing"],
            "context": { "user_id": "user-1" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["flag_key"], "flag-a");
    assert_eq!(results[0]["enabled"], true);
    assert_eq!(results[1]["enabled"], false);
    assert_eq!(results[2]["reason"], "not_found");
}

#[tokio::test]
async fn test_batch_evaluate_limits() {
    let app = test_app();

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/flags/evaluate",
        None,
        Some(json!({ "flag_keys": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let keys: Vec<String> = (0..101).map(|i| format!("flag-{}", i)).collect();
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/flags/evaluate",
        None,
        Some(json!({ "flag_keys": keys })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_emergency_disable() {
    let app = test_app();
    create_boolean_flag(&app, "payments-v2", true).await;

    // Reason body is mandatory
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/flags/payments-v2/emergency-disable",
        Some("oncall-1"),
        Some(json!({ "reason": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/flags/payments-v2/emergency-disable",
        Some("oncall-1"),
        Some(json!({ "reason": "checkout errors spiking, INC-118" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);

    let result = evaluate(&app, "payments-v2", json!({ "user_id": "user-1" })).await;
    assert_eq!(result["enabled"], false);
    assert_eq!(result["reason"], "disabled");
}

#[tokio::test]
async fn test_rollback_restores_previous_version() {
    let app = test_app();
    create_boolean_flag(&app, "search-v2", true).await;

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/api/v1/flags/search-v2",
        Some("admin-1"),
        Some(json!({ "default_value": false, "reason": "pausing experiment" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/api/v1/flags/search-v2/history", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    // Newest first
    assert_eq!(history[0]["version"], 2);
    let v1_entry = history[1]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/flags/search-v2/rollback",
        Some("admin-1"),
        Some(json!({ "history_id": v1_entry, "reason": "restoring pre-experiment state" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 3);
    assert_eq!(body["default_value"], true);

    let result = evaluate(&app, "search-v2", json!({})).await;
    assert_eq!(result["enabled"], true);
    assert_eq!(result["flag_version"], 3);
}

#[tokio::test]
async fn test_listing_groups_by_category_and_hides_archived() {
    let app = test_app();

    for (key, category) in [
        ("invoices-v2", "billing"),
        ("late-fees", "billing"),
        ("dark-mode", "ui"),
    ] {
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/flags",
            Some("admin-1"),
            Some(json!({
                "key": key,
                "name": key,
                "flag_type": "boolean",
                "default_value": false,
                "category": category,
                "reason": "initial rollout setup"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/flags/late-fees/archive",
        Some("admin-1"),
        Some(json!({ "reason": "feature removed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/api/v1/flags", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let billing = body["categories"]["billing"].as_array().unwrap();
    assert_eq!(billing.len(), 1);
    assert_eq!(billing[0]["key"], "invoices-v2");
    assert_eq!(body["categories"]["ui"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, Method::GET, "/api/v1/flags?category=ui", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["flags"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stats_reflect_evaluations() {
    let app = test_app();
    create_boolean_flag(&app, "stats-sample", true).await;

    for _ in 0..3 {
        evaluate(&app, "stats-sample", json!({ "user_id": "user-1" })).await;
    }

    let (status, body) = send(&app, Method::GET, "/api/v1/flags/stats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["stats-sample"]["evaluations"], 3);
    assert_eq!(body["stats"]["stats-sample"]["by_reason"]["default"], 3);
    assert!(body["stats"]["stats-sample"]["last_evaluated_at"].is_string());
    assert!(body["cache_hit_rate"].is_number());
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = test_app();

    let (status, body) = send(&app, Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(&app, Method::GET, "/api/health/live", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::GET, "/api/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
