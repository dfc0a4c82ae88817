//! Routing for `game-action` traffic: authoritative state changes,
//! chat, and typing indicators. The server ignores any client-supplied
//! player id and authors the canonical event itself.

use chrono::Utc;
use std::sync::Arc;

use super::{GameServer, MoveOutcome, ServiceError};
use crate::protocol::{
    validation, ErrorCode, GameActionKind, MoveEnvelope, Principal, ServerMessage,
};

impl GameServer {
    /// Handle one `game-action` message from a member socket.
    pub async fn handle_game_action(
        self: &Arc<Self>,
        principal: &Principal,
        lobby_code: &str,
        action: GameActionKind,
        payload: serde_json::Value,
    ) -> Result<Option<MoveOutcome>, ServiceError> {
        if !self.is_member(lobby_code, &principal.id).await {
            return Err(ServiceError::from_code(ErrorCode::LobbyAccessDenied));
        }

        match action {
            GameActionKind::StateChange => {
                let move_type = payload
                    .get("type")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| {
                        ServiceError::new(ErrorCode::InvalidMove, "missing move type")
                    })?
                    .to_string();
                // Starting the game is a lobby transition, not a move.
                if move_type == "start-game" {
                    self.start_game(lobby_code, &principal.id).await?;
                    return Ok(None);
                }
                let data = payload
                    .get("data")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                // The socket's bound principal is authoritative.
                let mv = MoveEnvelope {
                    player_id: principal.id.clone(),
                    move_type,
                    data,
                    timestamp: Utc::now(),
                };
                let outcome = self.submit_move_for_lobby(lobby_code, mv).await?;
                Ok(Some(outcome))
            }
            GameActionKind::ChatMessage => {
                let message = payload
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("");
                self.handle_chat_message(principal, lobby_code, message)
                    .await?;
                Ok(None)
            }
            GameActionKind::Typing => {
                self.events().publish(
                    lobby_code,
                    ServerMessage::PlayerTyping {
                        lobby_code: lobby_code.to_string(),
                        principal_id: principal.id.clone(),
                    },
                );
                Ok(None)
            }
        }
    }

    /// Sanitize and broadcast a chat message.
    pub async fn handle_chat_message(
        &self,
        principal: &Principal,
        lobby_code: &str,
        message: &str,
    ) -> Result<(), ServiceError> {
        if !self.is_member(lobby_code, &principal.id).await {
            return Err(ServiceError::from_code(ErrorCode::LobbyAccessDenied));
        }
        let clean = validation::sanitize_chat_message(message)
            .map_err(|reason| ServiceError::new(ErrorCode::InvalidMove, reason))?;
        self.events().publish(
            lobby_code,
            ServerMessage::ChatMessage {
                lobby_code: lobby_code.to_string(),
                from: principal.id.clone(),
                display_name: principal.display_name.clone(),
                message: clean,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }
}
