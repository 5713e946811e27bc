//! HTTP/WebSocket surface.
//!
//! Loopback only, no authentication: the server binds wherever the host
//! tells it to, and the CLI defaults to 127.0.0.1. Event streaming follows
//! the fanout contract: a `connected` event on attach, then tagged agent
//! events in per-agent order, with `dropped` markers for slow consumers.

use std::sync::Arc;

use agent_wire::{AgentEvent, EventPayload};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::network::manager::NetworkManager;

#[derive(Clone)]
struct AppState {
    manager: Arc<NetworkManager>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNetworkRequest {
    initial_message: String,
    working_directory: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateNetworkResponse {
    network_id: String,
    main_agent_id: String,
    created_at: String,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

fn error_response(status: StatusCode, error: &crate::error::StarlingError) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: error.code().to_string(),
        }),
    )
        .into_response()
}

/// Build the router over a running manager.
pub fn router(manager: Arc<NetworkManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/networks", post(create_network))
        .route("/api/v1/networks/:id/messages", post(send_message))
        .route(
            "/api/v1/networks/:id/agents/:agent_id/stream",
            get(stream_events),
        )
        .with_state(AppState { manager })
        .layer(CorsLayer::permissive())
}

/// Serve until the listener fails or the process exits.
pub async fn serve(manager: Arc<NetworkManager>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");
    axum::serve(listener, router(manager)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn create_network(
    State(state): State<AppState>,
    Json(request): Json<CreateNetworkRequest>,
) -> Response {
    let working_directory = std::path::PathBuf::from(&request.working_directory);
    match state
        .manager
        .create_network(&request.initial_message, &working_directory)
        .await
    {
        Ok((network_id, main_agent_id)) => Json(CreateNetworkResponse {
            network_id,
            main_agent_id,
            created_at: Utc::now().to_rfc3339(),
        })
        .into_response(),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err),
    }
}

async fn send_message(
    State(state): State<AppState>,
    Path(network_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    match state.manager.send_message(&network_id, &request.content).await {
        Ok(()) => Json(serde_json::json!({"status": "sent"})).into_response(),
        Err(err) => error_response(StatusCode::NOT_FOUND, &err),
    }
}

async fn stream_events(
    State(state): State<AppState>,
    Path((network_id, agent_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    // The agent must belong to the network in the path.
    let Some(network) = state.manager.get_network(&network_id).await else {
        return error_response(
            StatusCode::NOT_FOUND,
            &crate::error::StarlingError::network(&network_id, "unknown network"),
        );
    };
    if network.agent(&agent_id).is_none() {
        return error_response(
            StatusCode::NOT_FOUND,
            &crate::error::StarlingError::agent(&agent_id, "unknown agent"),
        );
    }

    let stream = match state.manager.subscribe(&agent_id).await {
        Ok(stream) => stream,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err),
    };
    ws.on_upgrade(move |socket| pump_events(socket, stream, agent_id))
}

async fn pump_events(
    mut socket: WebSocket,
    mut stream: agent_wire::EventStream,
    agent_id: String,
) {
    debug!(agent_id = %agent_id, "websocket subscriber attached");

    let connected = AgentEvent {
        agent: stream.descriptor().clone(),
        payload: EventPayload::Connected {},
        timestamp: Utc::now(),
        seq: 0,
    };
    if send_event(&mut socket, &connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = stream.next() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!(agent_id = %agent_id, "event source closed");
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Clients only ever close or ping; payloads are ignored.
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(agent_id = %agent_id, error = %err, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }
    debug!(agent_id = %agent_id, "websocket subscriber detached");
}

async fn send_event(socket: &mut WebSocket, event: &AgentEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    socket.send(WsMessage::Text(payload)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoragePaths;
    use crate::network::manager::ManagerConfig;
    use crate::permission::AskBehavior;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_app() -> (Router, TempDir, TempDir) {
        let config_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();
        let manager = NetworkManager::new(
            StoragePaths::new(config_dir.path()),
            ManagerConfig {
                assistant_bin: "cat".to_string(),
                ask_behavior: AskBehavior::Deny,
                ..Default::default()
            },
        );
        (router(manager), config_dir, project_dir)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (app, _config, _project) = test_app().await;
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_network_and_send_message() {
        let (app, _config, project) = test_app().await;

        let body = serde_json::json!({
            "initialMessage": "build it",
            "workingDirectory": project.path().to_string_lossy(),
        });
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/networks")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let network_id = created["networkId"].as_str().unwrap();
        assert!(created["mainAgentId"].is_string());

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/networks/{}/messages", network_id))
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        serde_json::json!({"content": "and test it"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_network_is_a_structured_error() {
        let (app, _config, _project) = test_app().await;
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/networks/nope/messages")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        serde_json::json!({"content": "x"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let error: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(error["code"], "network_error");
    }
}
