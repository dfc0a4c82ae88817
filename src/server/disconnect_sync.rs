//! Disconnect-sync manager.
//!
//! An abrupt socket loss does not immediately evict the player: a
//! grace-window job is scheduled per (lobby, principal) and coalesced
//! with any job already in flight. Reconnecting inside the window
//! cancels the job before any membership mutation fires. On expiry the
//! member is marked disconnected, the room is told, and a stalled turn
//! is advanced through the match runtime.

use serde_json::json;
use std::sync::Arc;

use super::{DisconnectJob, GameServer};
use crate::protocol::{GameStatus, ServerMessage};

impl GameServer {
    /// A socket subscribed to a room for this principal. Cancels any
    /// pending abrupt-disconnect job and marks the member connected.
    pub async fn note_socket_joined(&self, lobby_code: &str, principal_id: &str) {
        let key = (lobby_code.to_string(), principal_id.to_string());
        *self.presence.entry(key).or_insert(0) += 1;

        // Cancellation happens before any membership mutation.
        self.clear_pending_abrupt_disconnect(lobby_code, principal_id);

        let _ = self
            .store()
            .set_member_connected(lobby_code, principal_id, true)
            .await;
    }

    /// A socket for this principal left the room (close or leave-lobby).
    /// Schedules the grace-window job when no other socket remains.
    pub fn note_socket_left(self: &Arc<Self>, lobby_code: &str, principal_id: &str) {
        let key = (lobby_code.to_string(), principal_id.to_string());
        let remaining = match self.presence.get_mut(&key) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            return;
        }
        self.presence.remove(&key);
        self.schedule_abrupt_disconnect(lobby_code, principal_id);
    }

    /// Schedule the grace-window job. Re-scheduling coalesces: at most
    /// one job per (lobby, principal) is in flight.
    pub(super) fn schedule_abrupt_disconnect(self: &Arc<Self>, lobby_code: &str, principal_id: &str) {
        let key = (lobby_code.to_string(), principal_id.to_string());
        if self.disconnect_jobs.contains_key(&key) {
            return;
        }

        let server = Arc::clone(self);
        let grace = self.settings().disconnect_grace;
        let shutdown = self.shutdown_token();
        let (code, principal) = key.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(grace) => {}
                () = shutdown.cancelled() => return,
            }
            server.run_abrupt_disconnect(&code, &principal).await;
            server
                .disconnect_jobs
                .remove(&(code.clone(), principal.clone()));
        });

        tracing::debug!(
            lobby = %lobby_code,
            principal = %principal_id,
            grace_secs = grace.as_secs_f64(),
            "Scheduled abrupt-disconnect job"
        );
        self.disconnect_jobs.insert(key, DisconnectJob { task });
    }

    /// Cancel the pending job for a reconnecting principal.
    pub fn clear_pending_abrupt_disconnect(&self, lobby_code: &str, principal_id: &str) {
        let key = (lobby_code.to_string(), principal_id.to_string());
        if let Some((_, job)) = self.disconnect_jobs.remove(&key) {
            job.task.abort();
            tracing::debug!(
                lobby = %lobby_code,
                principal = %principal_id,
                "Cancelled pending abrupt-disconnect job"
            );
        }
    }

    /// The grace window expired. Everything here goes through the store
    /// and the match runtime; the manager never mutates game state
    /// directly.
    async fn run_abrupt_disconnect(self: &Arc<Self>, lobby_code: &str, principal_id: &str) {
        // Re-check: the principal may have come back.
        let key = (lobby_code.to_string(), principal_id.to_string());
        if self.presence.get(&key).is_some_and(|count| *count > 0) {
            return;
        }

        let Ok(Some(member)) = self.store().get_member(lobby_code, principal_id).await else {
            return;
        };
        let _ = self
            .store()
            .set_member_connected(lobby_code, principal_id, false)
            .await;

        self.events().publish(
            lobby_code,
            ServerMessage::PlayerLeft {
                lobby_code: lobby_code.to_string(),
                principal_id: principal_id.to_string(),
                display_name: member.display_name.clone(),
            },
        );
        self.telemetry().emit(
            "abrupt_disconnect",
            json!({ "lobbyCode": lobby_code, "principalId": principal_id }),
        );

        match self.store().get_open_game(lobby_code).await {
            Ok(Some(game)) if game.status == GameStatus::Playing => {
                // Seat survives so the roster stays intact for rejoin;
                // a stalled turn is advanced on their behalf.
                self.advance_turn_if_current(&game.id, principal_id).await;
                if let Ok(Some(lobby)) = self.store().get_lobby(lobby_code).await {
                    self.publish_lobby_update(&lobby).await;
                }
            }
            Ok(_) => {
                // No live game: expiry destroys the membership.
                let _ = self.store().remove_member(lobby_code, principal_id).await;
                if let Ok(Some(lobby)) = self.store().get_lobby(lobby_code).await {
                    self.publish_lobby_update(&lobby).await;
                }
            }
            Err(err) => {
                tracing::warn!(%err, lobby = %lobby_code, "Disconnect job failed to load game");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn disconnect_job_pending(&self, lobby_code: &str, principal_id: &str) -> bool {
        self.disconnect_jobs
            .contains_key(&(lobby_code.to_string(), principal_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GameType, MoveEnvelope, Principal};
    use crate::server::test_support::test_server;
    use crate::server::CreateLobbyParams;
    use tokio::time::{sleep, Duration};

    async fn playing_lobby(server: &Arc<GameServer>) -> (String, crate::storage::GameRecord) {
        let alice = Principal::user("u1", "Alice");
        let bob = Principal::user("u2", "Bob");
        let lobby = server
            .create_lobby(
                &alice,
                CreateLobbyParams {
                    name: "Grace".to_string(),
                    game_type: GameType::TicTacToe,
                    max_players: 2,
                    turn_timer_seconds: 60,
                    password: None,
                    code: None,
                },
            )
            .await
            .unwrap();
        server.join_lobby(&lobby.code, &alice, None).await.unwrap();
        server.join_lobby(&lobby.code, &bob, None).await.unwrap();
        let game = server.start_game(&lobby.code, "u1").await.unwrap();
        (lobby.code.clone(), game)
    }

    #[tokio::test]
    async fn reconnect_within_grace_cancels_job() {
        // Test grace is 50ms (see test_support).
        let (server, _) = test_server();
        let (code, game) = playing_lobby(&server).await;

        server.note_socket_joined(&code, "u1").await;
        server.note_socket_left(&code, "u1");
        assert!(server.disconnect_job_pending(&code, "u1"));

        // Reconnect at T+10ms, well inside the window.
        sleep(Duration::from_millis(10)).await;
        server.note_socket_joined(&code, "u1").await;
        assert!(!server.disconnect_job_pending(&code, "u1"));

        // Past the original deadline: no player-left, turn not advanced.
        sleep(Duration::from_millis(80)).await;
        let record = server.store().get_game(&game.id).await.unwrap().unwrap();
        assert_eq!(record.updated_at, game.updated_at, "turn was not advanced");
        let member = server.store().get_member(&code, "u1").await.unwrap().unwrap();
        assert!(member.is_connected);
    }

    #[tokio::test]
    async fn grace_expiry_marks_disconnected_and_advances_turn() {
        let (server, telemetry) = test_server();
        let (code, game) = playing_lobby(&server).await;

        server.note_socket_joined(&code, "u1").await;
        server.note_socket_left(&code, "u1");

        // Wait past the 50ms grace window.
        sleep(Duration::from_millis(150)).await;

        let member = server.store().get_member(&code, "u1").await.unwrap().unwrap();
        assert!(!member.is_connected, "member marked disconnected");
        // u1 was current: a fallback move was submitted and the turn
        // advanced.
        let record = server.store().get_game(&game.id).await.unwrap().unwrap();
        assert_eq!(record.current_player_index, Some(1));
        assert!(record.updated_at > game.updated_at);
        assert_eq!(telemetry.count_of("abrupt_disconnect"), 1);
    }

    #[tokio::test]
    async fn second_socket_prevents_job() {
        let (server, _) = test_server();
        let (code, _) = playing_lobby(&server).await;

        server.note_socket_joined(&code, "u1").await;
        server.note_socket_joined(&code, "u1").await;
        server.note_socket_left(&code, "u1");
        assert!(
            !server.disconnect_job_pending(&code, "u1"),
            "another socket for the principal is still in the room"
        );
    }

    #[tokio::test]
    async fn rescheduling_coalesces() {
        let (server, _) = test_server();
        let (code, _) = playing_lobby(&server).await;

        server.schedule_abrupt_disconnect(&code, "u1");
        server.schedule_abrupt_disconnect(&code, "u1");
        server.schedule_abrupt_disconnect(&code, "u1");
        assert!(server.disconnect_job_pending(&code, "u1"));
        // Exactly one job exists; cancelling once clears it.
        server.clear_pending_abrupt_disconnect(&code, "u1");
        assert!(!server.disconnect_job_pending(&code, "u1"));
    }

    #[tokio::test]
    async fn expiry_without_live_game_destroys_membership() {
        let (server, _) = test_server();
        let alice = Principal::user("u1", "Alice");
        let bob = Principal::user("u2", "Bob");
        let lobby = server
            .create_lobby(
                &alice,
                CreateLobbyParams {
                    name: "NoGame".to_string(),
                    game_type: GameType::TicTacToe,
                    max_players: 2,
                    turn_timer_seconds: 60,
                    password: None,
                    code: None,
                },
            )
            .await
            .unwrap();
        server.join_lobby(&lobby.code, &alice, None).await.unwrap();
        server.join_lobby(&lobby.code, &bob, None).await.unwrap();

        server.note_socket_joined(&lobby.code, "u2").await;
        server.note_socket_left(&lobby.code, "u2");
        sleep(Duration::from_millis(150)).await;

        // Waiting game only: seat is reclaimed.
        assert!(server
            .store()
            .get_member(&lobby.code, "u2")
            .await
            .unwrap()
            .is_none());

        // The game the lobby holds is still joinable for someone new.
        let carol = Principal::user("u3", "Carol");
        server.join_lobby(&lobby.code, &carol, None).await.unwrap();
        let _ = server
            .submit_move_for_lobby(
                &lobby.code,
                MoveEnvelope::new("u1", "place", serde_json::json!({ "row": 0, "col": 0 })),
            )
            .await;
    }
}
