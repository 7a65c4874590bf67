//! HTTP server: the agent WebSocket endpoint and the operator API.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;

use pinswarm_network::{Connection, NetworkError};
use pinswarm_placement::{NewFile, PlacementError};
use pinswarm_protocol::constants::MAX_UPTIME_WINDOW_DAYS;
use pinswarm_protocol::{Cid, FileId, SwarmId, UserId};
use pinswarm_state::UptimeKey;

use crate::app::AppState;

const DEFAULT_UPTIME_DAYS: u32 = 7;

pub struct CoordinatorServer {
    bind_addr: String,
    state: AppState,
}

impl CoordinatorServer {
    pub fn new(bind_addr: String, state: AppState) -> Self {
        Self { bind_addr, state }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        let app = router(self.state);
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "Coordinator listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/agent", get(agent_upgrade))
        .route("/api/health", get(api_health))
        .route("/api/swarms/:swarm_id/providers", get(api_swarm_providers))
        .route("/api/swarms/:swarm_id/leave/:user_id", post(api_leave_swarm))
        .route("/api/uptime/:user_id/:swarm_id", get(api_uptime))
        .route("/api/quota/:user_id/:swarm_id", get(api_quota))
        .route("/api/files", post(api_place_file))
        .route("/api/files/:file_id", delete(api_delete_file))
        .with_state(state)
}

// ── Agent connections ───────────────────────────────────────────────────────

async fn agent_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| agent_session(socket, state))
}

/// One provider agent: a writer task drains the connection's outbound queue
/// into the socket while this task feeds inbound text to the registry.
async fn agent_session(socket: WebSocket, state: AppState) {
    let (conn, mut outbound) = Connection::channel(state.outbound_queue);
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(line) = outbound.recv().await {
            if sink.send(Message::Text(line)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tracing::debug!(connection = %conn.id(), "Agent connected");
    'session: while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(connection = %conn.id(), error = %e, "Agent socket error");
                break;
            }
        };
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match state.registry.handle_inbound(&conn, line).await {
                Ok(_) => {}
                Err(NetworkError::UnknownPeer(peer_id)) => {
                    tracing::warn!(
                        connection = %conn.id(),
                        peer_id = %peer_id,
                        "Rejecting agent with unclaimed peer id"
                    );
                    break 'session;
                }
                Err(e) => {
                    tracing::debug!(connection = %conn.id(), error = %e, "Inbound frame rejected");
                }
            }
        }
    }

    state.registry.deregister(&conn);
    writer.abort();
    tracing::debug!(connection = %conn.id(), "Agent session closed");
}

// ── Operator API ────────────────────────────────────────────────────────────

async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "pinswarm-coordinator",
        "version": env!("CARGO_PKG_VERSION"),
        "connected_peers": state.registry.len(),
        "replication_need": state.placement.config().need,
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}

async fn api_swarm_providers(
    State(state): State<AppState>,
    AxumPath(swarm_id): AxumPath<String>,
) -> Response {
    let swarm_id = SwarmId::new(swarm_id);
    let providers = match state.registry.online_providers_for_swarm(&swarm_id).await {
        Ok(providers) => providers,
        Err(e) => return internal_error(e),
    };
    let uptime = state.registry.uptime();
    let rows: Vec<serde_json::Value> = providers
        .iter()
        .map(|p| {
            serde_json::json!({
                "user_id": p.user_id,
                "peer_id": p.peer_id,
                "avg_rtt_ms": p.avg_rtt_ms,
                "active": uptime.is_online(&p.user_id),
                "last_seen": uptime.last_seen(&p.user_id),
                "pinned": state.registry.inventory(&p.user_id).map(|cids| cids.len()),
            })
        })
        .collect();
    Json(serde_json::json!({ "swarm_id": swarm_id, "providers": rows })).into_response()
}

#[derive(Deserialize, Default)]
struct UptimeQuery {
    days: Option<u32>,
}

async fn api_uptime(
    State(state): State<AppState>,
    AxumPath((user_id, swarm_id)): AxumPath<(String, String)>,
    Query(query): Query<UptimeQuery>,
) -> Json<serde_json::Value> {
    let days = query
        .days
        .unwrap_or(DEFAULT_UPTIME_DAYS)
        .clamp(1, MAX_UPTIME_WINDOW_DAYS);
    let key = UptimeKey::new(UserId::new(user_id), SwarmId::new(swarm_id));
    let totals = state.registry.uptime().totals(&key, days, chrono::Utc::now());
    Json(serde_json::json!({
        "user_id": key.user_id,
        "swarm_id": key.swarm_id,
        "days": days,
        "online_seconds": totals.online_seconds,
        "offline_seconds": totals.offline_seconds,
        "online_ratio": totals.online_ratio(),
        "daily": state.registry.uptime().daily_buckets(&key),
    }))
}

async fn api_quota(
    State(state): State<AppState>,
    AxumPath((user_id, swarm_id)): AxumPath<(String, String)>,
) -> Response {
    match state
        .placement
        .quota_usage(&UserId::new(user_id), &SwarmId::new(swarm_id))
        .await
    {
        Ok(usage) => Json(usage).into_response(),
        Err(e) => placement_error(e),
    }
}

#[derive(Deserialize)]
struct PlaceFileBody {
    cid: String,
    size: u64,
    swarm_id: String,
    owner_id: String,
    #[serde(default)]
    name: String,
}

async fn api_place_file(
    State(state): State<AppState>,
    Json(body): Json<PlaceFileBody>,
) -> Response {
    if body.cid.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"ok": false, "error": "missing_cid"})),
        )
            .into_response();
    }
    let file = NewFile {
        cid: Cid::new(body.cid),
        size: body.size,
        swarm_id: SwarmId::new(body.swarm_id),
        owner_id: UserId::new(body.owner_id),
        name: body.name,
    };
    match state.placement.place_file(file).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => placement_error(e),
    }
}

async fn api_delete_file(
    State(state): State<AppState>,
    AxumPath(file_id): AxumPath<String>,
) -> Response {
    match state.placement.delete_file(&FileId::new(file_id)).await {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(e) => placement_error(e),
    }
}

async fn api_leave_swarm(
    State(state): State<AppState>,
    AxumPath((swarm_id, user_id)): AxumPath<(String, String)>,
) -> Response {
    match state
        .leave_swarm(&UserId::new(user_id), &SwarmId::new(swarm_id))
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => placement_error(e),
    }
}

fn placement_error(e: PlacementError) -> Response {
    let (status, code) = match &e {
        PlacementError::NoProvidersAvailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "no_providers_available")
        }
        PlacementError::FileNotFound(_) => (StatusCode::NOT_FOUND, "file_not_found"),
        PlacementError::NotProvider { .. } => (StatusCode::NOT_FOUND, "not_provider"),
        PlacementError::Directory(_) | PlacementError::Network(_) => {
            return internal_error(e);
        }
    };
    (
        status,
        Json(serde_json::json!({"ok": false, "error": code, "detail": e.to_string()})),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "Operator request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"ok": false, "error": "internal", "detail": e.to_string()})),
    )
        .into_response()
}
