//! The HTTP/WebSocket surface: axum router, `/health`, and the `/ws` upgrade
//! endpoint that enforces the connection preconditions before handing the
//! socket off to the connection lifecycle.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{router::is_reserved_name, state::ServerState};

#[derive(Clone)]
struct AppState {
    server: Arc<ServerState>,
}

#[derive(Deserialize)]
struct ConnectQuery {
    name: String,
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(cors)
        .with_state(AppState { server: state })
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.server.connection_count().await,
        "uptime_secs": state.server.uptime_secs(),
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> axum::response::Response {
    let username = Bytes::copy_from_slice(query.name.as_bytes());

    if username.is_empty() || username.len() > 255 {
        return (StatusCode::BAD_REQUEST, "username must be 1-255 bytes").into_response();
    }
    if is_reserved_name(&username) {
        return (StatusCode::BAD_REQUEST, "username may not be the reserved group name")
            .into_response();
    }
    {
        let presence = state.server.presence.read().await;
        if presence.lookup(&username).is_some() {
            return (StatusCode::BAD_REQUEST, "username already registered").into_response();
        }
    }

    let server = Arc::clone(&state.server);
    ws.max_frame_size(server.config.max_frame_size)
        .on_upgrade(move |socket| crate::ws::handle_connection(socket, server, username))
        .into_response()
}

/// Bind the listener, spawn the idle detector, and serve until a shutdown
/// signal arrives.
pub async fn run(state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::new(state.config.bind, state.config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        max_frame_size = state.config.max_frame_size,
        idle_check_period_secs = state.config.idle_check_period.as_secs(),
        idle_threshold_secs = state.config.idle_threshold.as_secs(),
        "listening"
    );

    let idle_state = Arc::clone(&state);
    tokio::spawn(crate::idle::run(idle_state));

    let router = build_router(Arc::clone(&state));
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(_) => return,
        };
        sig.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
