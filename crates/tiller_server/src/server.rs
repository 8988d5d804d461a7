use crate::engine::{Engine, EngineHandle};
use axum::{
    Json, Router,
    extract::{Path, Query, State, ws::WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tiller_api::{PROTOCOL_VERSION, WsClientMessage, WsServerMessage};
use tiller_backend::WorkspaceAgentService;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn router(services: Arc<dyn WorkspaceAgentService>) -> Router {
    let (engine, events) = Engine::start(services.clone());
    let state = AppStateHolder {
        engine,
        events,
        services,
    };

    let api = Router::new()
        .route("/health", get(health))
        .route("/app", get(get_app))
        .route(
            "/workspaces/{workspace_id}/threads/{thread_id}",
            get(get_thread),
        )
        .route("/attachments", post(upload_attachment))
        .route("/events", get(ws_events))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub struct Server {
    pub addr: SocketAddr,
    pub handle: tokio::task::JoinHandle<()>,
}

pub async fn start(
    services: Arc<dyn WorkspaceAgentService>,
    addr: SocketAddr,
) -> anyhow::Result<Server> {
    let app = router(services);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "server stopped");
        }
    });
    Ok(Server { addr, handle })
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppStateHolder {
    engine: EngineHandle,
    events: broadcast::Sender<WsServerMessage>,
    services: Arc<dyn WorkspaceAgentService>,
}

#[derive(serde::Deserialize)]
struct UploadQuery {
    name: String,
    #[serde(default)]
    extension: String,
}

async fn upload_attachment(
    State(state): State<AppStateHolder>,
    Query(query): Query<UploadQuery>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let services = state.services.clone();
    let result = tokio::task::spawn_blocking(move || {
        services.store_attachment(body.to_vec(), query.name, query.extension)
    })
    .await;
    match result {
        Ok(Ok(attachment)) => Json(attachment).into_response(),
        Ok(Err(message)) => (axum::http::StatusCode::BAD_REQUEST, message).into_response(),
        Err(err) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            err.to_string(),
        )
            .into_response(),
    }
}

async fn get_app(State(state): State<AppStateHolder>) -> impl IntoResponse {
    match state.engine.app_snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            err.to_string(),
        )
            .into_response(),
    }
}

async fn get_thread(
    State(state): State<AppStateHolder>,
    Path((workspace_id, thread_id)): Path<(u64, String)>,
) -> impl IntoResponse {
    match state
        .engine
        .thread_snapshot(tiller_api::WorkspaceId(workspace_id), thread_id)
        .await
    {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => (axum::http::StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn ws_events(ws: WebSocketUpgrade, State(state): State<AppStateHolder>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_events_task(socket, state))
}

async fn ws_events_task(mut socket: axum::extract::ws::WebSocket, state: AppStateHolder) {
    let mut rx = state.events.subscribe();
    let engine = state.engine.clone();

    let current_rev = engine.current_rev().await.unwrap_or(0);
    let _ = socket
        .send(json_text(&WsServerMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            current_rev,
        }))
        .await;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                if handle_ws_incoming(msg, &engine, &mut socket).await.is_err() {
                    break;
                }
            }
            outgoing = rx.recv() => {
                let Ok(outgoing) = outgoing else { break };
                if socket.send(json_text(&outgoing)).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn json_text<T: serde::Serialize>(value: &T) -> axum::extract::ws::Message {
    axum::extract::ws::Message::Text(serde_json::to_string(value).unwrap_or_default().into())
}

async fn handle_ws_incoming(
    msg: axum::extract::ws::Message,
    engine: &EngineHandle,
    socket: &mut axum::extract::ws::WebSocket,
) -> anyhow::Result<()> {
    let axum::extract::ws::Message::Text(text) = msg else {
        return Ok(());
    };

    let client: WsClientMessage = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(err) => {
            let _ = socket
                .send(json_text(&WsServerMessage::Error {
                    request_id: None,
                    message: format!("invalid ws message: {err}"),
                }))
                .await;
            return Ok(());
        }
    };

    match client {
        WsClientMessage::Hello { .. } => Ok(()),
        WsClientMessage::Ping => {
            socket.send(json_text(&WsServerMessage::Pong)).await?;
            Ok(())
        }
        WsClientMessage::Action { request_id, action } => {
            let ack = engine.apply_client_action(*action).await;
            let msg = match ack {
                Ok(rev) => WsServerMessage::Ack { request_id, rev },
                Err(message) => WsServerMessage::Error {
                    request_id: Some(request_id),
                    message,
                },
            };
            socket.send(json_text(&msg)).await?;
            Ok(())
        }
    }
}
