//! HTTP contract: lobby management, move submission, and the realtime
//! token endpoint. Both this surface and the WebSocket `game-action`
//! path funnel through the same match runtime.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::protocol::{
    BotDifficulty, ErrorCode, GameId, GameType, GameUpdatePayload, LobbySnapshot, LobbySummary,
    MemberInfo, MoveEnvelope, Principal,
};
use crate::server::{CreateLobbyParams, GameServer, ServiceError};

pub fn create_router() -> Router<Arc<GameServer>> {
    Router::new()
        .route("/lobby", post(create_lobby).get(list_lobbies))
        .route("/lobby/{code}", get(get_lobby).post(join_lobby))
        .route("/lobby/{code}/leave", post(leave_lobby))
        .route("/lobby/{code}/add-bot", post(add_bot))
        .route("/lobby/{code}/start", post(start_game))
        .route("/game/{id}/state", post(submit_move))
        .route("/socket/token", get(socket_token))
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self.code {
            ErrorCode::AuthRequired | ErrorCode::AuthInvalid | ErrorCode::AuthFailed => {
                StatusCode::UNAUTHORIZED
            }
            ErrorCode::NotCreator | ErrorCode::LobbyAccessDenied | ErrorCode::JoinLobbyError => {
                StatusCode::FORBIDDEN
            }
            ErrorCode::LobbyNotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(self.payload())).into_response()
    }
}

/// Resolve the calling principal from HTTP headers: a bearer token
/// (realtime or guest), the `X-Guest-Id` header for provisioned guests,
/// or the session-cookie fallback.
async fn caller(server: &GameServer, headers: &HeaderMap) -> Result<Principal, ServiceError> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        let raw = value
            .to_str()
            .map_err(|_| ServiceError::from_code(ErrorCode::AuthInvalid))?;
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
        return server
            .identity()
            .resolve(token)
            .await
            .map_err(|err| ServiceError::new(err.error_code(), err.to_string()));
    }

    if let Some(value) = headers.get("x-guest-id") {
        let guest_id = value
            .to_str()
            .map_err(|_| ServiceError::from_code(ErrorCode::AuthInvalid))?;
        let user = server
            .store()
            .get_user(guest_id)
            .await
            .map_err(ServiceError::internal)?;
        return match user {
            Some(user) if user.is_guest => Ok(Principal::guest(user.id, user.username)),
            _ => Err(ServiceError::from_code(ErrorCode::AuthInvalid)),
        };
    }

    if let Some(cookie) = headers
        .get(axum::http::header::COOKIE)
        .and_then(|value| value.to_str().ok())
    {
        return server
            .identity()
            .resolve_session_cookie(cookie)
            .await
            .map_err(|err| ServiceError::new(err.error_code(), err.to_string()));
    }

    Err(ServiceError::from_code(ErrorCode::AuthRequired))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLobbyBody {
    name: String,
    game_type: GameType,
    max_players: u8,
    turn_timer_seconds: u32,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LobbyResponse {
    lobby: LobbySnapshot,
}

async fn create_lobby(
    State(server): State<Arc<GameServer>>,
    headers: HeaderMap,
    Json(body): Json<CreateLobbyBody>,
) -> Result<impl IntoResponse, ServiceError> {
    let principal = caller(&server, &headers).await?;
    let lobby = server
        .create_lobby(
            &principal,
            CreateLobbyParams {
                name: body.name,
                game_type: body.game_type,
                max_players: body.max_players,
                turn_timer_seconds: body.turn_timer_seconds,
                password: body.password,
                code: body.code,
            },
        )
        .await?;
    let snapshot = server.lobby_snapshot(&lobby.code).await?;
    Ok((StatusCode::CREATED, Json(LobbyResponse { lobby: snapshot })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    game_type: Option<GameType>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    lobbies: Vec<LobbySummary>,
}

async fn list_lobbies(
    State(server): State<Arc<GameServer>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ServiceError> {
    let lobbies = server.list_lobbies(query.game_type).await?;
    Ok(Json(ListResponse { lobbies }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LobbyDetailResponse {
    lobby: LobbySnapshot,
    game: Option<GameUpdatePayload>,
}

async fn get_lobby(
    State(server): State<Arc<GameServer>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<LobbyDetailResponse>, ServiceError> {
    let principal = caller(&server, &headers).await?;
    let lobby = server.lobby_snapshot(&code).await?;
    let is_creator = lobby.creator_id == principal.id;
    if !is_creator && !server.is_member(&code, &principal.id).await {
        return Err(ServiceError::from_code(ErrorCode::LobbyAccessDenied));
    }
    let game = server.game_snapshot(&code).await?;
    Ok(Json(LobbyDetailResponse { lobby, game }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinBody {
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinResponse {
    game: Option<GameUpdatePayload>,
    player: MemberInfo,
}

async fn join_lobby(
    State(server): State<Arc<GameServer>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Option<Json<JoinBody>>,
) -> Result<Json<JoinResponse>, ServiceError> {
    let principal = caller(&server, &headers).await?;
    let Json(body) = body.unwrap_or_default();
    let outcome = server
        .join_lobby(&code, &principal, body.password.as_deref())
        .await?;
    let game = server.game_snapshot(&code).await?;
    Ok(Json(JoinResponse {
        game,
        player: MemberInfo {
            principal_id: outcome.member.principal_id,
            display_name: outcome.member.display_name,
            seat_index: outcome.member.seat_index,
            is_connected: outcome.member.is_connected,
            is_bot: outcome.member.is_bot,
            score: outcome.member.score,
        },
    }))
}

async fn leave_lobby(
    State(server): State<Arc<GameServer>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<StatusCode, ServiceError> {
    let principal = caller(&server, &headers).await?;
    server.leave_lobby(&code, &principal.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddBotBody {
    #[serde(default)]
    difficulty: Option<BotDifficulty>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddBotResponse {
    player: MemberInfo,
}

async fn add_bot(
    State(server): State<Arc<GameServer>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Option<Json<AddBotBody>>,
) -> Result<Json<AddBotResponse>, ServiceError> {
    let principal = caller(&server, &headers).await?;
    let Json(body) = body.unwrap_or_default();
    let player = server
        .add_bot(&code, &principal.id, body.difficulty.unwrap_or_default())
        .await?;
    Ok(Json(AddBotResponse { player }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    game: Option<GameUpdatePayload>,
}

async fn start_game(
    State(server): State<Arc<GameServer>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<StartResponse>, ServiceError> {
    let principal = caller(&server, &headers).await?;
    server.start_game(&code, &principal.id).await?;
    let game = server.game_snapshot(&code).await?;
    Ok(Json(StartResponse { game }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveBody {
    #[serde(rename = "move")]
    mv: MoveBodyInner,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveBodyInner {
    #[serde(rename = "type")]
    move_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MoveResponse {
    game: GameUpdatePayload,
}

/// Submit a move over HTTP. Interchangeable with the transport's
/// `game-action` path; both go through the match runtime.
async fn submit_move(
    State(server): State<Arc<GameServer>>,
    headers: HeaderMap,
    Path(id): Path<GameId>,
    Json(body): Json<MoveBody>,
) -> Result<Json<MoveResponse>, ServiceError> {
    let principal = caller(&server, &headers).await?;
    let mv = MoveEnvelope::new(principal.id.clone(), body.mv.move_type, body.mv.data);
    let outcome = server.submit_move(&id, mv).await?;
    let game = GameUpdatePayload {
        lobby_code: outcome.game.lobby_code.clone(),
        game_id: outcome.game.id,
        status: outcome.game.status,
        current_player_index: outcome.game.current_player_index,
        state: outcome.state.to_value(),
        terminal: outcome.terminal,
        updated_at: outcome.game.updated_at,
    };
    Ok(Json(MoveResponse { game }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
}

/// Short-lived token used when opening the realtime transport. Users
/// receive a fresh realtime token; guests receive a renewed guest token.
async fn socket_token(
    State(server): State<Arc<GameServer>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, ServiceError> {
    let principal = caller(&server, &headers).await?;
    let token = if principal.is_guest {
        server.identity().issue_guest_token(
            &principal.id,
            &principal.display_name,
            chrono::Duration::hours(24),
        )
    } else {
        server
            .identity()
            .issue_realtime_token(&principal.id, &principal.display_name)
    };
    Ok(Json(TokenResponse { token }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::test_server;

    #[tokio::test]
    async fn caller_resolves_bearer_token() {
        let (server, _) = test_server();
        let token = server.identity().issue_realtime_token("u1", "Alice");
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        let principal = caller(&server, &headers).await.unwrap();
        assert_eq!(principal.id, "u1");
    }

    #[tokio::test]
    async fn caller_accepts_guest_header_for_known_guests() {
        let (server, _) = test_server();
        // Unknown guest id is rejected.
        let mut headers = HeaderMap::new();
        headers.insert("x-guest-id", "guest-42".parse().unwrap());
        let err = caller(&server, &headers).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthInvalid);

        // Provision through a guest token, then the header resolves.
        let token = server
            .identity()
            .issue_guest_token("guest-42", "Visitor", chrono::Duration::hours(1));
        server.identity().resolve(&token).await.unwrap();
        let principal = caller(&server, &headers).await.unwrap();
        assert!(principal.is_guest);
        assert_eq!(principal.id, "guest-42");
    }

    #[tokio::test]
    async fn caller_requires_credentials() {
        let (server, _) = test_server();
        let err = caller(&server, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthRequired);
    }
}
