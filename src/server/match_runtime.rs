//! Authoritative match runtime.
//!
//! All writes to a game are serialised behind its per-game lock; the
//! lock holder also publishes on the event bus, so emission order equals
//! the causal order of state changes. Move validation failures are
//! returned to the caller only and never broadcast.

use chrono::Utc;
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{GameServer, ServiceError};
use crate::games::{rules_for, GameConfig, GameState, PlayerSeat, Terminal};
use crate::protocol::{
    ErrorCode, GameId, GameStatus, GameUpdatePayload, GameWinner, MoveEnvelope, ServerMessage,
    TerminalInfo,
};
use crate::retry::with_retry;
use crate::storage::{GameRecord, LobbyRecord};

/// Move type shared by the games that support explicit round restarts.
const NEXT_ROUND: &str = "next-round";

/// Bound on consecutive fallback submissions when advancing a stalled
/// turn (Yahtzee needs a roll plus a score).
const MAX_FALLBACK_CHAIN: usize = 8;

/// Result of an accepted move.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub game: GameRecord,
    pub state: GameState,
    pub terminal: Option<TerminalInfo>,
}

impl GameServer {
    /// Materialize the lobby's waiting game if none is open.
    pub(super) async fn ensure_open_game(
        &self,
        lobby: &LobbyRecord,
    ) -> Result<GameRecord, ServiceError> {
        if let Some(game) = self
            .store()
            .get_open_game(&lobby.code)
            .await
            .map_err(ServiceError::internal)?
        {
            return Ok(game);
        }

        let seats = self.roster_seats(&lobby.code).await?;
        let rules = rules_for(lobby.game_type);
        let state = rules.initial_state(&seats, &game_config_for(lobby));
        let now = Utc::now();
        let record = GameRecord {
            id: Uuid::new_v4(),
            lobby_code: lobby.code.clone(),
            game_type: lobby.game_type,
            status: GameStatus::Waiting,
            state: state.to_value(),
            current_player_index: Some(state.current_player_index()),
            created_at: now,
            updated_at: now,
        };
        self.store()
            .create_game(record.clone())
            .await
            .map_err(ServiceError::internal)?;
        Ok(record)
    }

    /// Creator-only transition waiting -> playing. The initial state is
    /// rebuilt from the final roster so late joiners and bots are seated.
    pub async fn start_game(
        self: &Arc<Self>,
        code: &str,
        requester_id: &str,
    ) -> Result<GameRecord, ServiceError> {
        let lobby = self.active_lobby(code).await?;
        if lobby.creator_id != requester_id {
            return Err(ServiceError::from_code(ErrorCode::NotCreator));
        }

        let game = self.ensure_open_game(&lobby).await?;
        let lock = self.game_lock(&game.id);
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent start may have won.
        let game = self
            .store()
            .get_game(&game.id)
            .await
            .map_err(ServiceError::internal)?
            .ok_or_else(|| ServiceError::from_code(ErrorCode::GameNotPlaying))?;
        if game.status != GameStatus::Waiting {
            return Err(ServiceError::new(
                ErrorCode::GameNotPlaying,
                "The game has already started",
            ));
        }

        let seats = self.roster_seats(code).await?;
        if seats.len() < lobby.game_type.min_players() as usize {
            return Err(ServiceError::new(
                ErrorCode::JoinLobbyError,
                format!(
                    "{} needs at least {} players",
                    lobby.game_type,
                    lobby.game_type.min_players()
                ),
            ));
        }

        let rules = rules_for(lobby.game_type);
        let state = rules.initial_state(&seats, &game_config_for(&lobby));
        let updated = self
            .store()
            .update_game(
                &game.id,
                GameStatus::Playing,
                state.to_value(),
                Some(state.current_player_index()),
            )
            .await
            .map_err(ServiceError::internal)?
            .ok_or_else(|| ServiceError::from_code(ErrorCode::InternalError))?;

        let first_player_name = state
            .current_player()
            .map(|seat| seat.display_name.clone())
            .unwrap_or_default();
        self.events().publish(
            code,
            ServerMessage::GameStarted {
                lobby_code: code.to_string(),
                game_id: updated.id,
                first_player_name: first_player_name.clone(),
            },
        );
        self.publish_game_update(&updated, &state, None);
        self.telemetry().emit(
            "game_started",
            json!({ "gameId": updated.id, "gameType": lobby.game_type.to_string() }),
        );

        self.after_state_change(&lobby, &updated, &state).await;
        Ok(updated)
    }

    /// Resolve the lobby's open game and submit a move to it.
    pub async fn submit_move_for_lobby(
        self: &Arc<Self>,
        code: &str,
        mv: MoveEnvelope,
    ) -> Result<MoveOutcome, ServiceError> {
        let game = self
            .store()
            .get_open_game(code)
            .await
            .map_err(ServiceError::internal)?;
        match game {
            Some(game) => self.submit_move(&game.id, mv).await,
            // A finished match can still accept an explicit next-round.
            None if mv.move_type == NEXT_ROUND => {
                let latest = self
                    .store()
                    .get_latest_game(code)
                    .await
                    .map_err(ServiceError::internal)?
                    .ok_or_else(|| ServiceError::from_code(ErrorCode::GameNotPlaying))?;
                self.submit_move(&latest.id, mv).await
            }
            None => Err(ServiceError::from_code(ErrorCode::GameNotPlaying)),
        }
    }

    /// The atomic move pipeline: load, validate, apply, persist, detect
    /// terminal, publish.
    pub async fn submit_move(
        self: &Arc<Self>,
        game_id: &GameId,
        mv: MoveEnvelope,
    ) -> Result<MoveOutcome, ServiceError> {
        let started = Instant::now();
        let lock = self.game_lock(game_id);
        let _guard = lock.lock().await;

        let game = self
            .store()
            .get_game(game_id)
            .await
            .map_err(ServiceError::internal)?
            .ok_or_else(|| ServiceError::from_code(ErrorCode::GameNotPlaying))?;
        let lobby = self.active_lobby(&game.lobby_code).await?;

        // A finished match may be restarted through the rules module.
        if game.status == GameStatus::Finished && mv.move_type == NEXT_ROUND {
            return self.next_round_locked(&lobby, &game, &mv).await;
        }
        if game.status != GameStatus::Playing {
            return Err(ServiceError::from_code(ErrorCode::GameNotPlaying));
        }

        let state = GameState::from_value(game.state.clone()).map_err(ServiceError::internal)?;
        let rules = rules_for(game.game_type);

        // A rules-module panic is a bug: reject the move, apply nothing.
        let applied = catch_unwind(AssertUnwindSafe(|| rules.apply_move(&state, &mv)));
        let (next_state, rule_events) = match applied {
            Ok(Ok(result)) => result,
            Ok(Err(rejection)) => {
                return Err(ServiceError::new(
                    rejection.error_code(),
                    rejection.to_string(),
                ));
            }
            Err(_) => {
                self.telemetry().emit(
                    "rules_module_panic",
                    json!({
                        "gameId": game_id,
                        "gameType": game.game_type.to_string(),
                        "moveType": mv.move_type,
                    }),
                );
                tracing::error!(
                    %game_id,
                    move_type = %mv.move_type,
                    "Rules module panicked; move rejected"
                );
                return Err(ServiceError::from_code(ErrorCode::InternalError));
            }
        };

        let terminal = rules.is_terminal(&next_state);
        let status = if terminal.is_some() {
            GameStatus::Finished
        } else {
            GameStatus::Playing
        };
        let current_index = terminal
            .is_none()
            .then(|| next_state.current_player_index());

        let persisted = with_retry(&self.settings().retry_policy, "persist game state", || {
            let state_value = next_state.to_value();
            async move {
                self.store()
                    .update_game(game_id, status, state_value, current_index)
                    .await
            }
        })
        .await;
        let updated = match persisted {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ServiceError::from_code(ErrorCode::InternalError)),
            Err(err) => {
                // Retries exhausted: the game is abandoned rather than
                // left in an unknown state.
                self.abandon_game(&game, "persistence failure").await;
                return Err(ServiceError::internal(err));
            }
        };

        let terminal_info = terminal.as_ref().map(terminal_info_of);
        if let Some(Terminal {
            winner: GameWinner::Player(winner_id),
            ..
        }) = &terminal
        {
            let _ = self
                .store()
                .add_member_score(&lobby.code, winner_id, 1)
                .await;
        }

        for event in &rule_events {
            self.telemetry().emit(
                "rule_event",
                json!({ "gameId": game_id, "kind": event.kind, "detail": event.detail }),
            );
        }

        self.publish_game_update(&updated, &next_state, terminal_info.clone());
        if terminal.is_some() {
            self.publish_lobby_update(&lobby).await;
            self.telemetry().emit(
                "game_finished",
                json!({ "gameId": game_id, "gameType": game.game_type.to_string() }),
            );
        }

        let elapsed = started.elapsed();
        self.reliability().record_move_apply(elapsed).await;
        self.telemetry().emit(
            "move_applied",
            json!({
                "gameId": game_id,
                "moveType": mv.move_type,
                "ms": elapsed.as_millis() as u64,
            }),
        );

        self.after_state_change(&lobby, &updated, &next_state).await;
        Ok(MoveOutcome {
            game: updated,
            state: next_state,
            terminal: terminal_info,
        })
    }

    /// Start the next round of a finished match. Any seated player may
    /// request it; the rules module enforces the round limit.
    pub async fn next_round(
        self: &Arc<Self>,
        game_id: &GameId,
        requester_id: &str,
    ) -> Result<MoveOutcome, ServiceError> {
        let mv = MoveEnvelope::new(requester_id, NEXT_ROUND, json!({}));
        self.submit_move(game_id, mv).await
    }

    async fn next_round_locked(
        self: &Arc<Self>,
        lobby: &LobbyRecord,
        finished: &GameRecord,
        mv: &MoveEnvelope,
    ) -> Result<MoveOutcome, ServiceError> {
        let state =
            GameState::from_value(finished.state.clone()).map_err(ServiceError::internal)?;
        if !state.aggregate().next_round_allowed() {
            return Err(ServiceError::from_code(ErrorCode::RoundLimitReached));
        }
        if !state.players().iter().any(|seat| seat.id == mv.player_id) {
            return Err(ServiceError::from_code(ErrorCode::LobbyAccessDenied));
        }

        let rules = rules_for(finished.game_type);
        let (next_state, _) = rules
            .apply_move(&state, mv)
            .map_err(|rejection| ServiceError::new(rejection.error_code(), rejection.to_string()))?;

        // Status transitions are forward-only, so a fresh round gets a
        // fresh game row; scores and the match aggregate carry over
        // inside the state blob.
        let now = Utc::now();
        let record = GameRecord {
            id: Uuid::new_v4(),
            lobby_code: lobby.code.clone(),
            game_type: finished.game_type,
            status: GameStatus::Playing,
            state: next_state.to_value(),
            current_player_index: Some(next_state.current_player_index()),
            created_at: now,
            updated_at: now,
        };
        self.store()
            .create_game(record.clone())
            .await
            .map_err(ServiceError::internal)?;

        let first_player_name = next_state
            .current_player()
            .map(|seat| seat.display_name.clone())
            .unwrap_or_default();
        self.events().publish(
            &lobby.code,
            ServerMessage::GameStarted {
                lobby_code: lobby.code.clone(),
                game_id: record.id,
                first_player_name,
            },
        );
        self.publish_game_update(&record, &next_state, None);
        self.after_state_change(lobby, &record, &next_state).await;

        Ok(MoveOutcome {
            game: record,
            state: next_state,
            terminal: None,
        })
    }

    /// If `player_id` currently holds the turn, submit fallback moves on
    /// their behalf until the turn moves on. Used by the turn timer and
    /// the disconnect-sync manager.
    pub async fn advance_turn_if_current(self: &Arc<Self>, game_id: &GameId, player_id: &str) {
        for _ in 0..MAX_FALLBACK_CHAIN {
            let Ok(Some(game)) = self.store().get_game(game_id).await else {
                return;
            };
            if game.status != GameStatus::Playing {
                return;
            }
            let Ok(state) = GameState::from_value(game.state.clone()) else {
                return;
            };
            let current = state.current_player().map(|seat| seat.id.clone());
            if current.as_deref() != Some(player_id) {
                return;
            }

            let rules = rules_for(game.game_type);
            let Some(fallback) = rules.fallback_move(&state, &player_id.to_string()) else {
                return;
            };
            tracing::info!(
                %game_id,
                player = %player_id,
                move_type = %fallback.move_type,
                "Submitting fallback move for stalled turn"
            );
            if let Err(err) = self.submit_move(game_id, fallback).await {
                tracing::warn!(%game_id, %err, "Fallback move rejected");
                return;
            }
        }
    }

    /// Mark a game abandoned and tell the room. Transient-failure
    /// escalation and lobby teardown both land here.
    pub(super) async fn abandon_game(self: &Arc<Self>, game: &GameRecord, reason: &str) {
        self.cancel_turn_timer(&game.id);
        if game.status.is_terminal() {
            return;
        }
        let result = self
            .store()
            .update_game(&game.id, GameStatus::Abandoned, game.state.clone(), None)
            .await;
        if let Err(err) = result {
            tracing::error!(game_id = %game.id, %err, "Failed to persist abandoned status");
        }
        self.events().publish(
            &game.lobby_code,
            ServerMessage::GameAbandoned {
                lobby_code: game.lobby_code.clone(),
                game_id: game.id,
                reason: reason.to_string(),
            },
        );
        self.telemetry().emit(
            "game_abandoned",
            json!({ "gameId": game.id, "reason": reason }),
        );
    }

    /// Current authoritative snapshot for the state-sync RPC.
    pub async fn game_snapshot(
        &self,
        code: &str,
    ) -> Result<Option<GameUpdatePayload>, ServiceError> {
        let Some(game) = self
            .store()
            .get_open_game(code)
            .await
            .map_err(ServiceError::internal)?
        else {
            return Ok(None);
        };
        let state = GameState::from_value(game.state.clone()).map_err(ServiceError::internal)?;
        let terminal = rules_for(game.game_type)
            .is_terminal(&state)
            .as_ref()
            .map(terminal_info_of);
        Ok(Some(update_payload(&game, &state, terminal)))
    }

    pub(super) fn publish_game_update(
        &self,
        record: &GameRecord,
        state: &GameState,
        terminal: Option<TerminalInfo>,
    ) {
        let payload = update_payload(record, state, terminal);
        self.events().publish(
            &record.lobby_code,
            ServerMessage::GameUpdate(Box::new(payload)),
        );
    }

    /// After every accepted state change: cancel or re-arm the turn
    /// timer, and hand the turn to the bot executor when a bot is up.
    pub(super) async fn after_state_change(
        self: &Arc<Self>,
        lobby: &LobbyRecord,
        record: &GameRecord,
        state: &GameState,
    ) {
        if record.status != GameStatus::Playing {
            self.cancel_turn_timer(&record.id);
            return;
        }
        let Some(current) = state.current_player() else {
            self.cancel_turn_timer(&record.id);
            return;
        };
        if current.is_bot {
            // Bots are driven synchronously by the executor, not timed.
            self.cancel_turn_timer(&record.id);
            self.spawn_bot_loop(&record.id, &lobby.code);
        } else {
            self.arm_turn_timer(lobby, record, &current.id);
        }
    }

    pub(super) async fn roster_seats(&self, code: &str) -> Result<Vec<PlayerSeat>, ServiceError> {
        let members = self
            .store()
            .get_members(code)
            .await
            .map_err(ServiceError::internal)?;
        Ok(members
            .into_iter()
            .map(|m| PlayerSeat {
                id: m.principal_id,
                display_name: m.display_name,
                is_bot: m.is_bot,
            })
            .collect())
    }
}

fn game_config_for(lobby: &LobbyRecord) -> GameConfig {
    let _ = lobby;
    GameConfig::default()
}

fn terminal_info_of(terminal: &Terminal) -> TerminalInfo {
    TerminalInfo {
        winner: terminal.winner.clone(),
        winning_detail: terminal.winning_detail.clone(),
    }
}

fn update_payload(
    record: &GameRecord,
    state: &GameState,
    terminal: Option<TerminalInfo>,
) -> GameUpdatePayload {
    GameUpdatePayload {
        lobby_code: record.lobby_code.clone(),
        game_id: record.id,
        status: record.status,
        current_player_index: record.current_player_index,
        state: state.to_value(),
        terminal,
        updated_at: record.updated_at,
    }
}
