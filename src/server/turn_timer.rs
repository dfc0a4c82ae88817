//! Per-game turn timer.
//!
//! Armed on every turn transition to a human player and cancelled on
//! every accepted move. The handle captures the game's `updated_at` at
//! arming time; a fire only counts if the game has not changed since,
//! so a stale timer can never steal a turn.

use std::sync::Arc;
use tokio::time::Duration;

use super::{GameServer, TurnTimerHandle};
use crate::protocol::{GameId, GameStatus};
use crate::storage::{GameRecord, LobbyRecord};

impl GameServer {
    /// Arm (or re-arm) the timer for the current human turn. The budget
    /// is the lobby's configured per-turn allowance.
    pub(super) fn arm_turn_timer(
        self: &Arc<Self>,
        lobby: &LobbyRecord,
        record: &GameRecord,
        player_id: &str,
    ) {
        self.cancel_turn_timer(&record.id);

        let budget = Duration::from_secs(u64::from(lobby.turn_timer_seconds));
        let generation = record.updated_at;
        let game_id = record.id;
        let player_id = player_id.to_string();
        let server = Arc::clone(self);
        let shutdown = self.shutdown_token();

        let task = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(budget) => {}
                () = shutdown.cancelled() => return,
            }

            // Only fire if this is still the same turn.
            let Ok(Some(game)) = server.store().get_game(&game_id).await else {
                return;
            };
            if game.status != GameStatus::Playing || game.updated_at != generation {
                return;
            }
            tracing::info!(
                %game_id,
                player = %player_id,
                budget_secs = budget.as_secs(),
                "Turn budget exceeded; submitting fallback move"
            );
            server
                .telemetry()
                .emit("turn_timeout", serde_json::json!({ "gameId": game_id }));
            server.advance_turn_if_current(&game_id, &player_id).await;
            server.turn_timers.remove(&game_id);
        });

        self.turn_timers.insert(record.id, TurnTimerHandle { task });
    }

    pub(super) fn cancel_turn_timer(&self, game_id: &GameId) {
        if let Some((_, handle)) = self.turn_timers.remove(game_id) {
            handle.task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn turn_timer_armed(&self, game_id: &GameId) -> bool {
        self.turn_timers.contains_key(game_id)
    }
}
