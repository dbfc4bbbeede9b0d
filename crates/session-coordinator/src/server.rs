//! HTTP and WebSocket surface.
//!
//! The HTTP side is a thin control plane: create a meeting, read a
//! room's status. Everything stateful happens over `GET /ws`, where
//! each socket gets a connection actor for its outbound half and this
//! module drives the inbound half, dispatching typed client events to
//! the room the socket has joined.

use crate::actors::connection::{ConnectionActor, ConnectionHandle};
use crate::actors::messages::{CreateRoomRequest, SignalKind};
use crate::actors::metrics::ActorMetrics;
use crate::actors::registry::RegistryHandle;
use crate::actors::room::RoomHandle;
use crate::config::Config;
use crate::errors::CoordinatorError;
use crate::events::{ClientEvent, ServerEvent};
use crate::observability::{health_router, HealthState};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffer between a connection actor and its socket writer task.
const OUTBOUND_FRAME_BUFFER: usize = 64;

/// Shared state for all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: RegistryHandle,
    pub metrics: Arc<ActorMetrics>,
    pub health: Arc<HealthState>,
}

/// Build the full application router.
pub fn app_router(state: AppState) -> Router {
    let health = state.health.clone();
    Router::new()
        .route("/api/status", get(service_status_handler))
        .route("/api/meetings", post(create_meeting_handler))
        .route("/api/meetings/:code", get(meeting_status_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(health_router(health))
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoordinatorError::RoomNotFound(_)
            | CoordinatorError::ParticipantNotFound
            | CoordinatorError::ProducerNotFound => StatusCode::NOT_FOUND,
            CoordinatorError::NotAMember
            | CoordinatorError::InvalidTarget
            | CoordinatorError::Unsupported(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Unauthorized(_) | CoordinatorError::NotYetStarted => {
                StatusCode::FORBIDDEN
            }
            CoordinatorError::Conflict(_) => StatusCode::CONFLICT,
            CoordinatorError::AllocationExhausted => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::Engine(_) | CoordinatorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.client_message(),
        });
        (status, Json(body)).into_response()
    }
}

/// `GET /api/status` - registry counters and effective configuration.
async fn service_status_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let status = state.registry.status().await?;
    Ok(Json(serde_json::json!({
        "mediaTopology": state.config.media_topology.as_str(),
        "activeRooms": status.active_rooms,
        "roomsCreatedTotal": status.rooms_created_total,
        "roomsEvictedTotal": status.rooms_evicted_total,
    })))
}

/// `POST /api/meetings` - allocate a code and spawn a room.
async fn create_meeting_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let created = state.registry.create_room(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/meetings/{code}` - point-in-time room status.
async fn meeting_status_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let room = state.registry.resolve(code).await?;
    let snapshot = room.snapshot().await?;
    Ok(Json(snapshot))
}

/// `GET /ws` - upgrade to the session protocol.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one client socket for its whole life.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_FRAME_BUFFER);
    let cancel_token = CancellationToken::new();
    let (handle, _actor_task) = ConnectionActor::spawn(
        connection_id,
        outbound_tx,
        cancel_token.clone(),
        state.metrics.clone(),
    );

    // Writer task: frames serialized by the connection actor go out
    // the socket in order.
    let writer_cancel = cancel_token.clone();
    let mut writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_cancel.cancelled() => break,
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    info!(
        target: "sc.server.ws",
        connection_id = %connection_id,
        "WebSocket connected"
    );

    // The room this socket has joined, if any.
    let mut session: Option<RoomHandle> = None;

    loop {
        tokio::select! {
            _ = &mut writer_task => break,

            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let event = match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => event,
                            Err(err) => {
                                debug!(
                                    target: "sc.server.ws",
                                    connection_id = %connection_id,
                                    error = %err,
                                    "Malformed client event"
                                );
                                handle.try_deliver(ServerEvent::Error {
                                    code: "malformed-event".to_string(),
                                    message: "Could not parse event".to_string(),
                                });
                                continue;
                            }
                        };
                        if dispatch_event(&state, connection_id, &handle, &mut session, event)
                            .await
                        {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // Ping/pong handled by the protocol layer.
                    _ => {}
                }
            }
        }
    }

    // Leaving the room broadcasts the departure and releases any
    // engine resources this connection held.
    if let Some(room) = session.take() {
        if let Err(err) = room.leave(connection_id).await {
            debug!(
                target: "sc.server.ws",
                connection_id = %connection_id,
                error = %err,
                "Leave on disconnect failed (room already gone)"
            );
        }
    }

    handle.close().await;
    cancel_token.cancel();
    writer_task.abort();

    info!(
        target: "sc.server.ws",
        connection_id = %connection_id,
        "WebSocket disconnected"
    );
}

/// Dispatch one parsed client event. Returns true when the socket
/// should close.
async fn dispatch_event(
    state: &AppState,
    connection_id: Uuid,
    handle: &ConnectionHandle,
    session: &mut Option<RoomHandle>,
    event: ClientEvent,
) -> bool {
    match event {
        ClientEvent::Join {
            code,
            display_name,
            wants_host,
        } => {
            if session.is_some() {
                deliver_error(
                    handle,
                    &CoordinatorError::Conflict("already in a meeting".to_string()),
                );
                return false;
            }

            let room = match state.registry.resolve(code).await {
                Ok(room) => room,
                Err(err) => {
                    deliver_error(handle, &err);
                    return false;
                }
            };

            match room
                .join(connection_id, display_name, wants_host, handle.clone())
                .await
            {
                Ok(role) => {
                    debug!(
                        target: "sc.server.ws",
                        connection_id = %connection_id,
                        room_id = %room.room_id(),
                        role = ?role,
                        "Socket joined room"
                    );
                    *session = Some(room);
                }
                Err(err) => deliver_error(handle, &err),
            }
            false
        }

        ClientEvent::Leave => {
            if let Some(room) = session.take() {
                if let Err(err) = room.leave(connection_id).await {
                    warn!(
                        target: "sc.server.ws",
                        connection_id = %connection_id,
                        error = %err,
                        "Leave failed"
                    );
                }
            }
            false
        }

        other => {
            let Some(room) = session.as_ref() else {
                deliver_error(handle, &CoordinatorError::NotAMember);
                return false;
            };

            let result = match other {
                ClientEvent::Chat { text } => {
                    room.chat(connection_id, handle.clone(), text).await
                }
                ClientEvent::Offer { target, payload } => {
                    room.signal(
                        connection_id,
                        handle.clone(),
                        target,
                        SignalKind::Offer,
                        payload,
                    )
                    .await
                }
                ClientEvent::Answer { target, payload } => {
                    room.signal(
                        connection_id,
                        handle.clone(),
                        target,
                        SignalKind::Answer,
                        payload,
                    )
                    .await
                }
                ClientEvent::IceCandidate { target, payload } => {
                    room.signal(
                        connection_id,
                        handle.clone(),
                        target,
                        SignalKind::IceCandidate,
                        payload,
                    )
                    .await
                }
                ClientEvent::CreateTransport => {
                    room.create_transport(connection_id, handle.clone()).await
                }
                ClientEvent::ConnectTransport { dtls_parameters } => {
                    room.connect_transport(connection_id, handle.clone(), dtls_parameters)
                        .await
                }
                ClientEvent::Produce {
                    kind,
                    rtp_parameters,
                } => {
                    room.produce(connection_id, handle.clone(), kind, rtp_parameters)
                        .await
                }
                ClientEvent::Consume {
                    producer_id,
                    rtp_capabilities,
                } => {
                    room.consume(connection_id, handle.clone(), producer_id, rtp_capabilities)
                        .await
                }
                ClientEvent::ToggleAudio { muted } => {
                    room.toggle_media(
                        connection_id,
                        handle.clone(),
                        media_engine::MediaKind::Audio,
                        muted,
                    )
                    .await
                }
                ClientEvent::ToggleVideo { muted } => {
                    room.toggle_media(
                        connection_id,
                        handle.clone(),
                        media_engine::MediaKind::Video,
                        muted,
                    )
                    .await
                }
                ClientEvent::EndMeeting => {
                    room.end_meeting(connection_id, handle.clone()).await
                }
                // Join and Leave are handled above.
                ClientEvent::Join { .. } | ClientEvent::Leave => Ok(()),
            };

            // A failed send means the room actor is gone; the session
            // is stale.
            if let Err(err) = result {
                debug!(
                    target: "sc.server.ws",
                    connection_id = %connection_id,
                    error = %err,
                    "Room unreachable, clearing session"
                );
                *session = None;
                deliver_error(
                    handle,
                    &CoordinatorError::RoomNotFound("(ended)".to_string()),
                );
            }
            false
        }
    }
}

fn deliver_error(handle: &ConnectionHandle, err: &CoordinatorError) {
    handle.try_deliver(ServerEvent::error(err));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use media_engine::{EngineConfig, LocalEngine};
    use tower::util::ServiceExt;

    fn test_state() -> AppState {
        let config = Arc::new(Config::default());
        let engine = Arc::new(LocalEngine::start(&EngineConfig::default()).unwrap());
        let directory = Arc::new(InMemoryDirectory::new());
        let metrics = ActorMetrics::new();
        let (registry, _task) = crate::actors::registry::RegistryActor::spawn(
            config.clone(),
            engine,
            directory,
            CancellationToken::new(),
            metrics.clone(),
        );
        AppState {
            config,
            registry,
            metrics,
            health: Arc::new(HealthState::new()),
        }
    }

    #[tokio::test]
    async fn test_create_meeting_returns_code() {
        let app = app_router(test_state());

        let request = Request::builder()
            .method("POST")
            .uri("/api/meetings")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"title":"Weekly sync","hostName":"Alice"}"#,
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let code = value["code"].as_str().unwrap();
        assert!(crate::codes::is_valid(code));
    }

    #[tokio::test]
    async fn test_meeting_status_roundtrip() {
        let state = test_state();
        let app = app_router(state.clone());

        let created = state
            .registry
            .create_room(CreateRoomRequest {
                title: "Sync".to_string(),
                host_name: "Alice".to_string(),
                start_time: None,
                duration_minutes: None,
            })
            .await
            .unwrap();

        let request = Request::builder()
            .uri(format!("/api/meetings/{}", created.code))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], created.code);
        assert_eq!(value["phase"], "forming");
        assert_eq!(value["participantCount"], 0);
    }

    #[tokio::test]
    async fn test_service_status_reports_topology_and_counts() {
        let state = test_state();
        let app = app_router(state.clone());

        state
            .registry
            .create_room(CreateRoomRequest {
                title: "Sync".to_string(),
                host_name: "Alice".to_string(),
                start_time: None,
                duration_minutes: None,
            })
            .await
            .unwrap();

        let request = Request::builder()
            .uri("/api/status")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["mediaTopology"], state.config.media_topology.as_str());
        assert_eq!(value["activeRooms"], 1);
        assert_eq!(value["roomsCreatedTotal"], 1);
    }

    #[tokio::test]
    async fn test_meeting_status_unknown_code_is_404() {
        let app = app_router(test_state());

        let request = Request::builder()
            .uri("/api/meetings/999999")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], "room-not-found");
    }

    #[tokio::test]
    async fn test_health_endpoints_are_mounted() {
        let state = test_state();
        state.health.set_ready();
        let app = app_router(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
