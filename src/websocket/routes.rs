use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use super::connection::handle_socket;
use crate::server::GameServer;

/// Router for the realtime transport.
pub fn create_router() -> Router<Arc<GameServer>> {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<GameServer>>,
) -> Response {
    let max_size = server.settings().max_message_size;
    ws.max_message_size(max_size)
        .on_upgrade(move |socket| handle_socket(socket, server))
}

async fn health_handler(State(server): State<Arc<GameServer>>) -> &'static str {
    if server.store().health_check().await {
        "ok"
    } else {
        "degraded"
    }
}
