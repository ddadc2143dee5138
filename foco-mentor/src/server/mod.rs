//! Local web surface for the chat.
//!
//! Endpoints:
//! - GET / - Chat page
//! - GET /api/state - Sessions, selection, loading and error state
//! - POST /api/sessions - Start a new chat
//! - POST /api/sessions/{id}/select - Switch to a session
//! - DELETE /api/sessions/{id} - Delete a session (the page asks first)
//! - POST /api/messages - Send a message; the reply streams over /ws
//! - WS /ws - ChatEvent feed

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;

use crate::chat::{ChatEvent, ChatService, ChatSnapshot, DeleteOutcome, PendingSend};
use crate::models::ChatSession;

// === Request/Response Types ===

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingSend>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatResponse {
    pub session_id: String,
    pub snapshot: ChatSnapshot,
}

// === Server Lifecycle ===

/// Build the router around a chat service.
pub fn router(service: ChatService) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/state", get(get_state))
        .route("/api/sessions", post(new_chat))
        .route("/api/sessions/{id}/select", post(select_session))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/messages", post(send_message))
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Serve the chat on localhost until the process is stopped.
pub async fn start_server(service: ChatService, port: u16, open_browser: bool) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    println!("Foco Mentor running on http://{addr}");
    tracing::info!(%addr, "Server listening");

    if open_browser {
        if let Err(e) = open::that(format!("http://{addr}")) {
            tracing::warn!(error = %e, "Failed to open browser");
        }
    }

    axum::serve(listener, router(service))
        .await
        .context("Server error")
}

// === Handlers ===

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("ui.html"))
}

async fn get_state(State(service): State<ChatService>) -> Json<ChatSnapshot> {
    Json(service.snapshot())
}

async fn new_chat(State(service): State<ChatService>) -> (StatusCode, Json<NewChatResponse>) {
    let session_id = service.new_chat();
    (
        StatusCode::CREATED,
        Json(NewChatResponse {
            session_id,
            snapshot: service.snapshot(),
        }),
    )
}

async fn select_session(
    State(service): State<ChatService>,
    Path(id): Path<String>,
) -> Result<Json<ChatSnapshot>, StatusCode> {
    if service.select_session(&id) {
        Ok(Json(service.snapshot()))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn delete_session(
    State(service): State<ChatService>,
    Path(id): Path<String>,
) -> Result<Json<ChatSnapshot>, StatusCode> {
    match service.delete_session(&id, &|_: &ChatSession| true) {
        DeleteOutcome::Deleted { .. } => Ok(Json(service.snapshot())),
        DeleteOutcome::Declined | DeleteOutcome::NotFound => Err(StatusCode::NOT_FOUND),
    }
}

async fn send_message(
    State(service): State<ChatService>,
    Json(req): Json<SendRequest>,
) -> Response {
    let Some(pending) = service.start_send(&req.text) else {
        return Json(SendResponse {
            accepted: false,
            pending: None,
        })
        .into_response();
    };

    tokio::spawn({
        let service = service.clone();
        let pending = pending.clone();
        async move {
            service.complete_send(pending).await;
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(SendResponse {
            accepted: true,
            pending: Some(pending),
        }),
    )
        .into_response()
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(service): State<ChatService>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, service))
}

async fn send_event(socket: &mut WebSocket, event: &ChatEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode chat event");
            true
        }
    }
}

async fn handle_websocket(mut socket: WebSocket, service: ChatService) {
    let mut rx = service.subscribe();

    let initial = ChatEvent::SessionsChanged {
        snapshot: service.snapshot(),
    };
    if !send_event(&mut socket, &initial).await {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    // Missed chunks are covered by a fresh snapshot.
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "WebSocket subscriber lagged");
                        ChatEvent::SessionsChanged { snapshot: service.snapshot() }
                    }
                    Err(RecvError::Closed) => break,
                };
                if !send_event(&mut socket, &event).await {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
