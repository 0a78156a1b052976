//! Live WebSocket sessions against a bound listener.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code

use futures::{SinkExt, StreamExt};
use queueline_core::{QueueStateProjector, ReservationRequest, ServiceId, UserId};
use queueline_server::config::RealtimeConfig;
use queueline_server::{AppState, build_router, metrics};
use queueline_testing::fixtures::{self, monday, slot};
use queueline_testing::TestHarness;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(harness: &TestHarness, realtime: RealtimeConfig) -> SocketAddr {
    queueline_testing::init_tracing();
    let projector = QueueStateProjector::new(
        Arc::new(harness.catalog.clone()),
        Arc::new(harness.store.clone()),
    );
    let app = build_router(AppState::new(
        harness.controller.clone(),
        harness.hub.clone(),
        projector,
        Arc::new(harness.store.clone()),
        metrics::detached(),
        realtime,
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn open(addr: SocketAddr, token: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/api/ws?token={token}"))
        .await
        .expect("upgrade accepted");
    socket
}

async fn send(socket: &mut Socket, message: Value) {
    socket.send(Message::Text(message.to_string())).await.unwrap();
}

/// Next JSON text frame, skipping transport pings.
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("frame within timeout")
            .expect("socket open")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn bad_tokens_are_refused_before_upgrade() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let addr = serve(&harness, RealtimeConfig::default()).await;

    for url in [
        format!("ws://{addr}/api/ws"),
        format!("ws://{addr}/api/ws?token=garbage"),
        format!("ws://{addr}/api/ws?token={}", harness.tokens.expired("U1")),
    ] {
        match connect_async(url).await {
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 401);
            }
            other => panic!("expected 401, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn subscribe_book_and_cancel_over_the_socket() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let addr = serve(&harness, RealtimeConfig::default()).await;
    let mut socket = open(addr, &harness.tokens.citizen("U1")).await;

    send(&mut socket, json!({"type": "subscribe", "serviceId": "SER1"})).await;
    let snapshot = next_json(&mut socket).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["date"], "2024-01-01");
    assert_eq!(snapshot["slots"][0]["currentQueueSize"], 0);

    send(
        &mut socket,
        json!({"type": "book", "serviceId": "SER1", "date": "2024-01-01", "slotTime": "09:00"}),
    )
    .await;
    let mut booked = None;
    let mut broadcast = None;
    for _ in 0..2 {
        let message = next_json(&mut socket).await;
        match message["type"].as_str().unwrap() {
            "appointment_booked" => booked = Some(message),
            "snapshot" => broadcast = Some(message),
            other => panic!("unexpected message type {other}"),
        }
    }
    let booked = booked.unwrap();
    assert_eq!(booked["appointment"]["status"], "scheduled");
    assert_eq!(broadcast.unwrap()["slots"][0]["currentQueueSize"], 1);

    let id = booked["appointment"]["id"].clone();
    send(&mut socket, json!({"type": "cancel", "appointmentId": id})).await;
    let mut cancelled = false;
    let mut freed = false;
    for _ in 0..2 {
        let message = next_json(&mut socket).await;
        match message["type"].as_str().unwrap() {
            "appointment_cancelled" => cancelled = message["appointment"]["status"] == "cancelled",
            "snapshot" => freed = message["slots"][0]["currentQueueSize"] == 0,
            other => panic!("unexpected message type {other}"),
        }
    }
    assert!(cancelled && freed);
}

#[tokio::test]
async fn failures_are_reported_with_error_kind() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let addr = serve(&harness, RealtimeConfig::default()).await;
    let mut socket = open(addr, &harness.tokens.citizen("U1")).await;

    send(&mut socket, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut socket).await, json!({"type": "pong"}));

    send(&mut socket, json!({"type": "teleport"})).await;
    assert_eq!(next_json(&mut socket).await["errorKind"], "validation");

    send(&mut socket, json!({"type": "subscribe", "serviceId": "NOPE"})).await;
    assert_eq!(next_json(&mut socket).await["errorKind"], "service_not_found");

    send(
        &mut socket,
        json!({"type": "book", "serviceId": "SER1", "date": "2024-01-02", "slotTime": "09:00"}),
    )
    .await;
    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["errorKind"], "slot_not_operational");
}

#[tokio::test]
async fn admins_receive_snapshots_without_subscribing() {
    let harness = TestHarness::new([fixtures::example_service(), fixtures::weekday_service()]);
    let addr = serve(&harness, RealtimeConfig::default()).await;
    let mut admin = open(addr, &harness.tokens.scoped_admin("ADM1", &["SER1"])).await;

    for (service, time) in [("SER2", "09:30"), ("SER1", "10:00")] {
        harness
            .controller
            .reserve(
                &UserId::new("U1"),
                ReservationRequest {
                    service_id: ServiceId::new(service),
                    date: monday(),
                    slot_time: slot(time),
                    notes: None,
                },
            )
            .await
            .unwrap();
    }

    let snapshot = next_json(&mut admin).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["serviceId"], "SER1");
}

#[tokio::test]
async fn sessions_close_when_the_token_expires() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let addr = serve(&harness, RealtimeConfig::default()).await;
    let mut socket = open(addr, &harness.tokens.citizen_expiring_in("U1", 1)).await;

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => {}
                other => panic!("socket ended without close frame: {other:?}"),
            }
        }
    })
    .await
    .expect("closed before timeout");
    assert_eq!(frame.unwrap().reason, "session_expired");
}

#[tokio::test]
async fn connection_limit_refuses_extra_sessions() {
    let harness = TestHarness::new([fixtures::example_service()]);
    let addr = serve(
        &harness,
        RealtimeConfig {
            max_connections: 1,
            ..RealtimeConfig::default()
        },
    )
    .await;

    let _first = open(addr, &harness.tokens.citizen("U1")).await;
    match connect_async(format!("ws://{addr}/api/ws?token={}", harness.tokens.citizen("U2"))).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 503);
        }
        other => panic!("expected 503, got {other:?}"),
    }
}
