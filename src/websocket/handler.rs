use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use std::net::SocketAddr;

use super::connection::handle_socket;
use super::routes::bearer_claims;
use crate::server::GameServer;

#[derive(Debug, Deserialize)]
pub(super) struct WsQuery {
    /// Token in the query string, for clients that cannot set headers.
    token: Option<String>,
}

/// WebSocket upgrade endpoint. Authentication happens before the upgrade:
/// a missing or invalid token is a plain 401, never a socket.
pub(super) async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(server): State<GameServer>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, StatusCode> {
    let claims = match bearer_claims(&server, &headers) {
        Ok(claims) => claims,
        Err(_) => match query.token.as_deref() {
            Some(token) => server
                .tokens()
                .verify(token)
                .map_err(|_| StatusCode::UNAUTHORIZED)?,
            None => return Err(StatusCode::UNAUTHORIZED),
        },
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, server, claims, addr)))
}
