use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;

use super::handler::websocket_handler;
use crate::auth::TokenClaims;
use crate::protocol::{RoomId, Seq};
use crate::room::RoomError;
use crate::server::GameServer;

/// Create the axum router: WebSocket upgrade, thin HTTP reads, health, and
/// metrics.
pub fn create_router(cors_origins: &str) -> axum::Router<GameServer> {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = if cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            tracing::warn!("No valid CORS origins configured, using permissive CORS");
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    axum::Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/v1/rooms", post(create_room))
        .route("/v1/rooms/{room_id}/join", post(join_room))
        .route("/v1/rooms/{room_id}/events", get(room_events))
        .route("/v1/rooms/{room_id}/state", get(room_state))
        .route("/v1/rooms/{room_id}/replay", get(room_replay))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Extract and verify the bearer token from the `Authorization` header.
pub(super) fn bearer_claims(
    server: &GameServer,
    headers: &HeaderMap,
) -> Result<TokenClaims, StatusCode> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    server
        .tokens()
        .verify(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

fn room_error_status(err: &RoomError) -> StatusCode {
    match err {
        RoomError::NotFound => StatusCode::NOT_FOUND,
        RoomError::NotAMember => StatusCode::FORBIDDEN,
        RoomError::Unavailable(_) | RoomError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn health_check(State(server): State<GameServer>) -> axum::response::Result<&'static str> {
    if server.health().await {
        Ok("OK")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE.into())
    }
}

async fn metrics_handler(State(server): State<GameServer>) -> impl IntoResponse {
    Json(serde_json::json!({
        "counters": server.metrics().snapshot(),
        "live_rooms": server.live_room_count(),
    }))
}

async fn create_room(
    State(server): State<GameServer>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = bearer_claims(&server, &headers)?;
    let meta = server
        .create_room(claims.sub)
        .await
        .map_err(|err| room_error_status(&err))?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "room_id": meta.id,
            "dm_user_id": meta.dm_user_id,
            "status": meta.status,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct JoinBody {
    name: String,
    #[serde(default)]
    idempotency_key: Option<String>,
}

/// HTTP join: a convenience wrapper that routes through the same command
/// path as the WebSocket gateway.
async fn join_room(
    State(server): State<GameServer>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
    Json(body): Json<JoinBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = bearer_claims(&server, &headers)?;
    let envelope = crate::protocol::CommandEnvelope {
        command_id: uuid::Uuid::new_v4(),
        idempotency_key: body
            .idempotency_key
            .unwrap_or_else(|| format!("http-join:{}", claims.sub)),
        room_id,
        command: crate::engine::Command::Join { name: body.name },
        last_seen_seq: None,
    };
    let result = server.submit_command(claims.sub, envelope).await;
    Ok(Json(serde_json::json!({ "result": result })))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    after_seq: Seq,
}

async fn room_events(
    State(server): State<GameServer>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = bearer_claims(&server, &headers)?;
    let events = server
        .events_after(room_id, claims.sub, query.after_seq)
        .await
        .map_err(|err| room_error_status(&err))?;
    Ok(Json(serde_json::json!({ "events": events })))
}

async fn room_state(
    State(server): State<GameServer>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = bearer_claims(&server, &headers)?;
    let info = server
        .resync(room_id, claims.sub)
        .await
        .map_err(|err| room_error_status(&err))?;
    if !info.member {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(Json(serde_json::json!({
        "seq": info.seq,
        "state": info.state,
    })))
}

#[derive(Debug, Deserialize)]
struct ReplayQuery {
    to_seq: Seq,
    /// Borrow another member's projection; DM only.
    #[serde(default)]
    viewer: Option<crate::protocol::UserId>,
}

async fn room_replay(
    State(server): State<GameServer>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<ReplayQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = bearer_claims(&server, &headers)?;
    let viewer = query.viewer.unwrap_or(claims.sub);
    let state = server
        .replay_state(room_id, claims.sub, viewer, query.to_seq)
        .await
        .map_err(|err| room_error_status(&err))?;
    Ok(Json(serde_json::json!({
        "to_seq": query.to_seq,
        "state": state,
    })))
}
