//! WebSocket endpoint for live queue state.
//!
//! - GET /api/ws?token=<jwt> (or `Authorization: Bearer <jwt>`)
//!
//! The token is verified before the upgrade; a bad token gets 401 and no
//! session. Administrators receive every snapshot within their scope as
//! soon as they connect. Everyone can subscribe to individual services.
//!
//! ## Client messages
//!
//! ```json
//! {"type": "subscribe", "serviceId": "SER1", "date": "2024-01-01"}
//! {"type": "unsubscribe", "serviceId": "SER1"}
//! {"type": "book", "serviceId": "SER1", "date": "2024-01-01", "slotTime": "09:00"}
//! {"type": "cancel", "appointmentId": "550e8400-..."}
//! {"type": "ping"}
//! ```
//!
//! ## Server messages
//!
//! `snapshot`, `appointment_booked`, `appointment_cancelled`,
//! `error{errorKind, message}` and `pong`.
//!
//! The session is closed with reason `session_expired` when the token's
//! `exp` passes, and with `idle_timeout` after a silent period.

#![allow(clippy::cognitive_complexity, clippy::too_many_lines)] // WebSocket event loops are naturally complex

use crate::auth::BearerToken;
use crate::error::AppError;
use crate::server::state::{AppState, WsSlot};
use axum::{
    extract::{
        FromRequestParts, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::request::Parts,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use queueline_core::{
    AdmissionError, Appointment, AppointmentId, Connection, HubError, ReservationRequest,
    ServiceId, ServiceSnapshot,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use tokio::time::{Instant, interval_at};

/// Query string of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Access token, for clients that cannot set headers
    pub token: Option<String>,
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a service topic and receive its current snapshot
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// Service to watch
        service_id: ServiceId,
        /// Snapshot date, defaulting to today
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    /// Leave a service topic
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// Service to stop watching
        service_id: ServiceId,
    },
    /// Reserve a slot as the connected user
    Book(ReservationRequest),
    /// Cancel an appointment
    #[serde(rename_all = "camelCase")]
    Cancel {
        /// Appointment to cancel
        appointment_id: AppointmentId,
    },
    /// Application-level keep-alive
    Ping,
}

/// Message from server to client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    /// Queue state of a service on a date
    Snapshot(&'a ServiceSnapshot),
    /// A reservation made over this socket was admitted
    AppointmentBooked {
        /// The new appointment
        appointment: &'a Appointment,
    },
    /// A cancellation made over this socket was applied
    AppointmentCancelled {
        /// The cancelled appointment
        appointment: &'a Appointment,
    },
    /// A request failed
    #[serde(rename_all = "camelCase")]
    Error {
        /// Machine-readable kind
        error_kind: &'a str,
        /// Human-readable description
        message: String,
    },
    /// Reply to `ping`
    Pong,
}

impl ServerMessage<'_> {
    fn from_admission(error: &AdmissionError) -> Self {
        ServerMessage::Error {
            error_kind: error.kind().as_str(),
            message: error.to_string(),
        }
    }
}

fn token_from(parts: &Parts, params: WsParams) -> Option<String> {
    params
        .token
        .filter(|token| !token.is_empty())
        .or_else(|| BearerToken::from_parts(parts).map(|BearerToken(token)| token))
}

/// Upgrade to a queue-state session.
///
/// # Errors
///
/// 401 when the token is missing, invalid or expired; 503 when the session
/// limit is reached.
pub async fn queue_updates(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    let params = Query::<WsParams>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    let token = token_from(&parts, params);

    let connection = match state.hub.connect(token.as_deref()) {
        Ok(connection) => connection,
        Err(HubError::Unauthorized(error)) => {
            tracing::info!(%error, "WebSocket upgrade refused");
            return AppError::from(error).into_response();
        }
    };

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(slot) = state.acquire_ws_slot() else {
        tracing::warn!(
            current_connections = state.ws_connections(),
            "WebSocket connection limit exceeded"
        );
        return AppError::unavailable("Too many concurrent connections. Please try again later.")
            .into_response();
    };

    tracing::info!(
        user_id = %connection.principal().user_id,
        total_connections = state.ws_connections(),
        "WebSocket connection accepted"
    );
    upgrade.on_upgrade(move |socket| handle_socket(socket, connection, state, slot))
}

type Sender = SplitSink<WebSocket, Message>;

async fn send(sender: &mut Sender, message: &ServerMessage<'_>) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(error) => {
            tracing::error!(%error, "Failed to serialize WebSocket message");
            true
        }
    }
}

async fn close(sender: &mut Sender, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

async fn handle_socket(socket: WebSocket, mut connection: Connection, state: AppState, _slot: WsSlot) {
    let user_id = connection.principal().user_id.clone();
    let (mut sender, mut receiver) = socket.split();

    let remaining = state.hub.verifier().remaining(connection.principal());
    let session_end = tokio::time::sleep(remaining);
    tokio::pin!(session_end);

    let ping_every = state.realtime.ping_interval.max(Duration::from_secs(1));
    let mut keep_alive = interval_at(Instant::now() + ping_every, ping_every);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            () = &mut session_end => {
                tracing::info!(%user_id, "Session expired, closing WebSocket");
                close(&mut sender, close_code::POLICY, "session_expired").await;
                break;
            }
            event = connection.recv() => {
                let Some(event) = event else { break };
                if !send(&mut sender, &ServerMessage::Snapshot(&event.snapshot)).await {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        if !handle_client_text(&text, &mut connection, &state, &mut sender).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_seen = Instant::now();
                        let reply = ServerMessage::Error {
                            error_kind: "validation",
                            message: "Binary frames are not supported".to_string(),
                        };
                        if !send(&mut sender, &reply).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => last_seen = Instant::now(),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                }
            }
            _ = keep_alive.tick() => {
                if last_seen.elapsed() > state.realtime.idle_timeout {
                    tracing::info!(%user_id, "Closing idle WebSocket");
                    close(&mut sender, close_code::NORMAL, "idle_timeout").await;
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(
        %user_id,
        subscriptions = connection.subscriptions().count(),
        "WebSocket connection closed"
    );
}

/// Apply one client message. Returns `false` once the socket is gone.
async fn handle_client_text(
    text: &str,
    connection: &mut Connection,
    state: &AppState,
    sender: &mut Sender,
) -> bool {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(error) => {
            let reply = ServerMessage::Error {
                error_kind: "validation",
                message: format!("Unrecognized message: {error}"),
            };
            return send(sender, &reply).await;
        }
    };

    match message {
        ClientMessage::Subscribe { service_id, date } => {
            match connection.subscribe(&service_id, date).await {
                Ok(snapshot) => send(sender, &ServerMessage::Snapshot(&snapshot)).await,
                Err(error) => send(sender, &ServerMessage::from_admission(&error)).await,
            }
        }
        ClientMessage::Unsubscribe { service_id } => {
            connection.unsubscribe(&service_id);
            true
        }
        ClientMessage::Book(request) => {
            let user_id = connection.principal().user_id.clone();
            match state.controller.reserve(&user_id, request).await {
                Ok(appointment) => {
                    send(sender, &ServerMessage::AppointmentBooked { appointment: &appointment }).await
                }
                Err(error) => send(sender, &ServerMessage::from_admission(&error)).await,
            }
        }
        ClientMessage::Cancel { appointment_id } => {
            match state.controller.cancel(appointment_id, connection.principal()).await {
                Ok(appointment) => {
                    let reply = ServerMessage::AppointmentCancelled { appointment: &appointment };
                    send(sender, &reply).await
                }
                Err(error) => send(sender, &ServerMessage::from_admission(&error)).await,
            }
        }
        ClientMessage::Ping => send(sender, &ServerMessage::Pong).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_wire_shape() {
        let subscribe: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","serviceId":"SER1"}"#).unwrap();
        assert_eq!(
            subscribe,
            ClientMessage::Subscribe {
                service_id: ServiceId::new("SER1"),
                date: None
            }
        );

        let book: ClientMessage = serde_json::from_str(
            r#"{"type":"book","serviceId":"SER1","date":"2024-01-01","slotTime":"09:00"}"#,
        )
        .unwrap();
        assert!(matches!(book, ClientMessage::Book(ref r) if r.slot_time.to_string() == "09:00"));

        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"book","slotTime":"9:00"}"#).is_err());
    }

    #[test]
    fn error_messages_carry_error_kind() {
        let json = serde_json::to_value(ServerMessage::Error {
            error_kind: "slot_full",
            message: "full".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "error", "errorKind": "slot_full", "message": "full"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Pong).unwrap(),
            serde_json::json!({"type": "pong"})
        );
    }
}
