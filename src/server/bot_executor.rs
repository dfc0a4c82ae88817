//! Bot executor.
//!
//! Invoked after every state change that hands the turn to a bot. One
//! loop runs per game at a time; each iteration re-checks that it is
//! still the bot's turn before submitting, so a bot can never act out of
//! turn and never overlaps its own submissions. `bot-action` events are
//! cosmetic annotations for clients and carry no state.

use serde_json::json;
use std::sync::Arc;

use super::GameServer;
use crate::games::{rules_for, GameState};
use crate::protocol::{BotActionKind, GameId, GameStatus, ServerMessage};

/// Upper bound on consecutive bot submissions in one loop; covers
/// bot-vs-bot chains without risking a runaway.
const MAX_BOT_ACTIONS: usize = 128;

fn action_kind_for(move_type: &str) -> BotActionKind {
    match move_type {
        "roll" => BotActionKind::Roll,
        "score" => BotActionKind::Score,
        "place" => BotActionKind::Place,
        "choose" => BotActionKind::Choice,
        "question" => BotActionKind::Answer,
        "vote" => BotActionKind::Vote,
        _ => BotActionKind::Thinking,
    }
}

impl GameServer {
    /// Start the bot loop for a game unless one is already running.
    pub(super) fn spawn_bot_loop(self: &Arc<Self>, game_id: &GameId, lobby_code: &str) {
        if self.bot_loops.insert(*game_id, ()).is_some() {
            // An existing loop will observe the new turn on its next
            // iteration.
            return;
        }
        let server = Arc::clone(self);
        let game_id = *game_id;
        let lobby_code = lobby_code.to_string();
        tokio::spawn(async move {
            server.run_bot_loop(game_id, &lobby_code).await;
            server.bot_loops.remove(&game_id);
        });
    }

    async fn run_bot_loop(self: &Arc<Self>, game_id: GameId, lobby_code: &str) {
        for _ in 0..MAX_BOT_ACTIONS {
            let Ok(Some(game)) = self.store().get_game(&game_id).await else {
                return;
            };
            if game.status != GameStatus::Playing {
                return;
            }
            let Ok(state) = GameState::from_value(game.state.clone()) else {
                return;
            };
            let Some(current) = state.current_player().cloned() else {
                return;
            };
            if !current.is_bot {
                return;
            }

            let Ok(Some(bot)) = self.store().get_bot(&current.id).await else {
                tracing::warn!(%game_id, bot_id = %current.id, "Seated bot has no bot record");
                return;
            };

            self.events().publish(
                lobby_code,
                ServerMessage::BotAction {
                    lobby_code: lobby_code.to_string(),
                    game_id,
                    bot_id: current.id.clone(),
                    action: BotActionKind::Thinking,
                    detail: None,
                },
            );
            if !self.settings().bot_action_delay.is_zero() {
                tokio::time::sleep(self.settings().bot_action_delay).await;
            }

            let rules = rules_for(game.game_type);
            let Some(mv) = rules.bot_move(&state, &current.id, bot.difficulty) else {
                tracing::warn!(%game_id, bot_id = %current.id, "Bot strategy produced no move");
                return;
            };

            self.events().publish(
                lobby_code,
                ServerMessage::BotAction {
                    lobby_code: lobby_code.to_string(),
                    game_id,
                    bot_id: current.id.clone(),
                    action: action_kind_for(&mv.move_type),
                    detail: Some(mv.data.clone()),
                },
            );
            self.telemetry().emit(
                "bot_action",
                json!({
                    "gameId": game_id,
                    "botId": current.id,
                    "moveType": mv.move_type,
                    "difficulty": format!("{:?}", bot.difficulty),
                }),
            );

            // Submission re-validates under the game lock; a stale view
            // here just means a rejected move and another iteration.
            if let Err(err) = self.submit_move(&game_id, mv).await {
                tracing::warn!(%game_id, bot_id = %current.id, %err, "Bot move rejected");
                return;
            }
        }
        tracing::warn!(%game_id, "Bot loop hit its action bound");
    }
}
