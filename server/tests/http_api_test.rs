//! HTTP routing, authentication and error mapping.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use queueline_core::QueueStateProjector;
use queueline_server::config::RealtimeConfig;
use queueline_server::{AppState, build_router, metrics};
use queueline_testing::{TestHarness, fixtures};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn app(harness: &TestHarness) -> Router {
    queueline_testing::init_tracing();
    let projector = QueueStateProjector::new(
        Arc::new(harness.catalog.clone()),
        Arc::new(harness.store.clone()),
    );
    build_router(AppState::new(
        harness.controller.clone(),
        harness.hub.clone(),
        projector,
        Arc::new(harness.store.clone()),
        metrics::detached(),
        RealtimeConfig::default(),
    ))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, token: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn booking(date: &str, time: &str) -> Value {
    json!({"serviceId": "SER1", "date": date, "slotTime": time})
}

#[tokio::test]
async fn health_and_readiness() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let app = app(&harness);

    let (status, body) = call(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app, get("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn slots_endpoint_requires_a_valid_date() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let app = app(&harness);

    let (status, body) = call(&app, get("/api/services/SER1/slots", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "validation");

    let (status, _) = call(&app, get("/api/services/SER1/slots?date=01-01-2024", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, get("/api/services/NOPE/slots?date=2024-01-01", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorKind"], "service_not_found");
}

#[tokio::test]
async fn reservations_fill_the_slot_and_show_in_availability() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let app = app(&harness);
    let tokens = &harness.tokens;

    for user in ["U1", "U2"] {
        let (status, body) = call(
            &app,
            send_json("POST", "/api/appointments", &tokens.citizen(user), &booking("2024-01-01", "09:00")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "scheduled");
        assert_eq!(body["userId"], user);
    }

    let (status, body) = call(
        &app,
        send_json("POST", "/api/appointments", &tokens.citizen("U3"), &booking("2024-01-01", "09:00")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorKind"], "slot_full");

    let (status, body) = call(
        &app,
        send_json("POST", "/api/appointments", &tokens.citizen("U3"), &booking("2024-01-02", "09:00")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorKind"], "slot_not_operational");

    let (status, body) = call(&app, get("/api/services/SER1/slots?date=2024-01-01", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "serviceId": "SER1",
            "date": "2024-01-01",
            "slots": [
                {"time": "09:00", "currentQueueSize": 2, "maxCapacity": 2, "isAvailable": false},
                {"time": "10:00", "currentQueueSize": 0, "maxCapacity": 2, "isAvailable": true}
            ]
        })
    );
}

#[tokio::test]
async fn protected_routes_reject_missing_or_bad_tokens() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let app = app(&harness);

    let (status, body) = call(&app, get("/api/appointments", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorKind"], "unauthorized");

    let (status, _) = call(&app, get("/api/appointments", Some("not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = harness.tokens.expired("U1");
    let (status, _) = call(&app, get("/api/appointments", Some(&expired))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let app = app(&harness);
    let token = harness.tokens.citizen("U1");

    let (status, body) = call(
        &app,
        send_json("POST", "/api/appointments", &token, &booking("2024-01-01", "9:00")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "validation");

    let long_note = json!({
        "serviceId": "SER1",
        "date": "2024-01-01",
        "slotTime": "09:00",
        "notes": "x".repeat(1001)
    });
    let (status, body) = call(&app, send_json("POST", "/api/appointments", &token, &long_note)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "validation");

    let (status, _) = call(&app, get("/api/appointments/not-a-uuid", Some(&token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn owners_list_read_and_cancel_their_appointments() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let app = app(&harness);
    let owner = harness.tokens.citizen("U1");
    let stranger = harness.tokens.citizen("U2");

    let (_, created) = call(
        &app,
        send_json("POST", "/api/appointments", &owner, &booking("2024-01-01", "10:00")),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, list) = call(&app, get("/api/appointments", Some(&owner))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, body) = call(&app, get(&format!("/api/appointments/{id}"), Some(&stranger))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errorKind"], "forbidden");

    let cancel = format!("/api/appointments/{id}/cancel");
    let (status, _) = call(&app, send_json("POST", &cancel, &stranger, &Value::Null)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, send_json("POST", &cancel, &owner, &Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = call(&app, send_json("POST", &cancel, &owner, &Value::Null)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorKind"], "already_terminal");

    let missing = format!("/api/appointments/{}", uuid::Uuid::new_v4());
    let (status, body) = call(&app, get(&missing, Some(&owner))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorKind"], "not_found");
}

#[tokio::test]
async fn status_changes_require_a_scoped_admin() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let app = app(&harness);
    let tokens = &harness.tokens;

    let (_, created) = call(
        &app,
        send_json("POST", "/api/appointments", &tokens.citizen("U1"), &booking("2024-01-01", "09:00")),
    )
    .await;
    let uri = format!("/api/admin/appointments/{}/status", created["id"].as_str().unwrap());
    let confirm = json!({"status": "confirmed"});

    let (status, _) = call(&app, send_json("PUT", &uri, &tokens.citizen("U1"), &confirm)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        send_json("PUT", &uri, &tokens.scoped_admin("ADM1", &["SER2"]), &confirm),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = tokens.scoped_admin("ADM2", &["SER1"]);
    let (status, body) = call(&app, send_json("PUT", &uri, &admin, &json!({"status": "scheduled"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorKind"], "invalid_transition");

    let (status, body) = call(&app, send_json("PUT", &uri, &admin, &confirm)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");

    let (status, body) = call(&app, send_json("PUT", &uri, &admin, &json!({"status": "no_show"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_show");

    let (_, slots) = call(&app, get("/api/services/SER1/slots?date=2024-01-01", None)).await;
    assert_eq!(slots["slots"][0]["currentQueueSize"], 0);
}

#[tokio::test]
async fn admins_list_and_book_within_their_scope() {
    let harness = TestHarness::new([fixtures::example_service(), fixtures::weekday_service()]);
    let app = app(&harness);
    let tokens = &harness.tokens;
    let admin = tokens.scoped_admin("ADM1", &["SER1"]);

    let (status, created) = call(
        &app,
        send_json(
            "POST",
            "/api/admin/appointments",
            &admin,
            &json!({"userId": "U1", "serviceId": "SER1", "date": "2024-01-01", "slotTime": "09:00"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["userId"], "U1");

    let (status, body) = call(
        &app,
        send_json(
            "POST",
            "/api/admin/appointments",
            &admin,
            &json!({"userId": "U2", "serviceId": "SER2", "date": "2024-01-01", "slotTime": "09:30"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errorKind"], "forbidden");

    call(
        &app,
        send_json("POST", "/api/appointments", &tokens.citizen("U2"), &json!({
            "serviceId": "SER2", "date": "2024-01-01", "slotTime": "09:30"
        })),
    )
    .await;

    let (status, list) = call(&app, get("/api/admin/appointments", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["serviceId"], "SER1");

    let root = tokens.super_admin("ROOT");
    let (_, everything) = call(&app, get("/api/admin/appointments", Some(&root))).await;
    assert_eq!(everything.as_array().unwrap().len(), 2);
    let (_, filtered) = call(
        &app,
        get("/api/admin/appointments?serviceId=SER2&status=scheduled", Some(&root)),
    )
    .await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);

    let (status, _) = call(&app, get("/api/admin/appointments?serviceId=SER2", Some(&admin))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, get("/api/admin/appointments?date=tomorrow", Some(&admin))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, get("/api/admin/appointments", Some(&tokens.citizen("U1")))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, slots) = call(&app, get("/api/services/SER1/slots?date=2024-01-01", None)).await;
    assert_eq!(slots["slots"][0]["currentQueueSize"], 1);
}
