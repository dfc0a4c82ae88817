//! In-memory store backed by `tokio::sync::RwLock` maps. Atomicity for
//! multi-row operations (seat packing, cascade deletes) comes from
//! holding the relevant map's write lock for the whole operation.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    AlertStateRecord, BotRecord, GameRecord, LobbyRecord, MembershipRecord, Store, UserRecord,
};
use crate::protocol::{GameId, GameStatus, GameType};

#[derive(Default)]
pub struct InMemoryStore {
    lobbies: RwLock<HashMap<String, LobbyRecord>>,
    /// Keyed by lobby code; inner vec is kept dense and seat-ordered.
    members: RwLock<HashMap<String, Vec<MembershipRecord>>>,
    games: RwLock<HashMap<GameId, GameRecord>>,
    users: RwLock<HashMap<String, UserRecord>>,
    bots: RwLock<HashMap<String, BotRecord>>,
    alert_states: RwLock<HashMap<String, AlertStateRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn create_lobby(&self, lobby: LobbyRecord) -> Result<()> {
        let mut lobbies = self.lobbies.write().await;
        if let Some(existing) = lobbies.get(&lobby.code) {
            if existing.is_active {
                return Err(anyhow!("lobby code `{}` is already in use", lobby.code));
            }
        }
        lobbies.insert(lobby.code.clone(), lobby);
        Ok(())
    }

    async fn get_lobby(&self, code: &str) -> Result<Option<LobbyRecord>> {
        Ok(self.lobbies.read().await.get(code).cloned())
    }

    async fn list_active_lobbies(
        &self,
        game_type: Option<GameType>,
    ) -> Result<Vec<(LobbyRecord, usize)>> {
        let lobbies = self.lobbies.read().await;
        let members = self.members.read().await;
        let mut result: Vec<(LobbyRecord, usize)> = lobbies
            .values()
            .filter(|lobby| lobby.is_active)
            .filter(|lobby| game_type.is_none_or(|t| lobby.game_type == t))
            .map(|lobby| {
                let count = members.get(&lobby.code).map_or(0, Vec::len);
                (lobby.clone(), count)
            })
            .collect();
        result.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at));
        Ok(result)
    }

    async fn set_lobby_password_hash(&self, code: &str, hash: Option<String>) -> Result<bool> {
        let mut lobbies = self.lobbies.write().await;
        match lobbies.get_mut(code) {
            Some(lobby) if lobby.is_active => {
                lobby.password_hash = hash;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_lobby(&self, code: &str) -> Result<bool> {
        let mut lobbies = self.lobbies.write().await;
        let Some(lobby) = lobbies.get_mut(code) else {
            return Ok(false);
        };
        if !lobby.is_active {
            return Ok(false);
        }
        lobby.is_active = false;
        drop(lobbies);

        // Cascade: memberships and games belong to the lobby.
        self.members.write().await.remove(code);
        self.games
            .write()
            .await
            .retain(|_, game| game.lobby_code != code);
        Ok(true)
    }

    async fn add_member(
        &self,
        code: &str,
        principal_id: &str,
        display_name: &str,
        is_bot: bool,
    ) -> Result<bool> {
        let mut members = self.members.write().await;
        let roster = members.entry(code.to_string()).or_default();
        if roster.iter().any(|m| m.principal_id == principal_id) {
            return Ok(false);
        }
        let seat_index = roster.len() as u8;
        roster.push(MembershipRecord {
            lobby_code: code.to_string(),
            principal_id: principal_id.to_string(),
            display_name: display_name.to_string(),
            seat_index,
            is_connected: true,
            is_bot,
            score: 0,
        });
        Ok(true)
    }

    async fn remove_member(
        &self,
        code: &str,
        principal_id: &str,
    ) -> Result<Option<MembershipRecord>> {
        let mut members = self.members.write().await;
        let Some(roster) = members.get_mut(code) else {
            return Ok(None);
        };
        let Some(position) = roster.iter().position(|m| m.principal_id == principal_id) else {
            return Ok(None);
        };
        let removed = roster.remove(position);
        // Seat indices stay a dense 0..n-1 prefix.
        for (i, member) in roster.iter_mut().enumerate() {
            member.seat_index = i as u8;
        }
        if roster.is_empty() {
            members.remove(code);
        }
        Ok(Some(removed))
    }

    async fn get_members(&self, code: &str) -> Result<Vec<MembershipRecord>> {
        Ok(self.members.read().await.get(code).cloned().unwrap_or_default())
    }

    async fn get_member(
        &self,
        code: &str,
        principal_id: &str,
    ) -> Result<Option<MembershipRecord>> {
        Ok(self
            .members
            .read()
            .await
            .get(code)
            .and_then(|roster| roster.iter().find(|m| m.principal_id == principal_id))
            .cloned())
    }

    async fn set_member_connected(
        &self,
        code: &str,
        principal_id: &str,
        is_connected: bool,
    ) -> Result<bool> {
        let mut members = self.members.write().await;
        let updated = members
            .get_mut(code)
            .and_then(|roster| roster.iter_mut().find(|m| m.principal_id == principal_id))
            .map(|member| member.is_connected = is_connected)
            .is_some();
        Ok(updated)
    }

    async fn add_member_score(&self, code: &str, principal_id: &str, delta: i32) -> Result<bool> {
        let mut members = self.members.write().await;
        let updated = members
            .get_mut(code)
            .and_then(|roster| roster.iter_mut().find(|m| m.principal_id == principal_id))
            .map(|member| member.score += delta)
            .is_some();
        Ok(updated)
    }

    async fn create_game(&self, game: GameRecord) -> Result<()> {
        let mut games = self.games.write().await;
        let open_exists = games.values().any(|g| {
            g.lobby_code == game.lobby_code
                && matches!(g.status, GameStatus::Waiting | GameStatus::Playing)
        });
        if open_exists {
            return Err(anyhow!(
                "lobby `{}` already has an open game",
                game.lobby_code
            ));
        }
        games.insert(game.id, game);
        Ok(())
    }

    async fn get_game(&self, id: &GameId) -> Result<Option<GameRecord>> {
        Ok(self.games.read().await.get(id).cloned())
    }

    async fn get_open_game(&self, code: &str) -> Result<Option<GameRecord>> {
        Ok(self
            .games
            .read()
            .await
            .values()
            .find(|g| {
                g.lobby_code == code
                    && matches!(g.status, GameStatus::Waiting | GameStatus::Playing)
            })
            .cloned())
    }

    async fn get_latest_game(&self, code: &str) -> Result<Option<GameRecord>> {
        Ok(self
            .games
            .read()
            .await
            .values()
            .filter(|g| g.lobby_code == code)
            .max_by_key(|g| g.updated_at)
            .cloned())
    }

    async fn update_game(
        &self,
        id: &GameId,
        status: GameStatus,
        state: serde_json::Value,
        current_player_index: Option<u8>,
    ) -> Result<Option<GameRecord>> {
        let mut games = self.games.write().await;
        let Some(game) = games.get_mut(id) else {
            return Ok(None);
        };
        game.status = status;
        game.state = state;
        game.current_player_index = current_player_index;
        // `updated_at` must be strictly monotonic even under clock ties.
        let now = Utc::now();
        game.updated_at = if now > game.updated_at {
            now
        } else {
            game.updated_at + Duration::microseconds(1)
        };
        Ok(Some(game.clone()))
    }

    async fn upsert_user(&self, user: UserRecord) -> Result<()> {
        self.users.write().await.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn touch_user_activity(&self, id: &str) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(id) {
            user.last_active_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_idle_guests(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|_, user| !user.is_guest || user.last_active_at >= cutoff);
        Ok(before - users.len())
    }

    async fn upsert_bot(&self, bot: BotRecord) -> Result<()> {
        self.bots.write().await.insert(bot.user_id.clone(), bot);
        Ok(())
    }

    async fn get_bot(&self, user_id: &str) -> Result<Option<BotRecord>> {
        Ok(self.bots.read().await.get(user_id).cloned())
    }

    async fn get_alert_state(&self, alert_key: &str) -> Result<Option<AlertStateRecord>> {
        Ok(self.alert_states.read().await.get(alert_key).cloned())
    }

    async fn upsert_alert_state(&self, state: AlertStateRecord) -> Result<()> {
        self.alert_states
            .write()
            .await
            .insert(state.alert_key.clone(), state);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn lobby(code: &str) -> LobbyRecord {
        LobbyRecord {
            code: code.to_string(),
            name: "Test Lobby".to_string(),
            game_type: GameType::TicTacToe,
            creator_id: "creator".to_string(),
            max_players: 2,
            turn_timer_seconds: 60,
            password_hash: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn game(code: &str) -> GameRecord {
        let now = Utc::now();
        GameRecord {
            id: Uuid::new_v4(),
            lobby_code: code.to_string(),
            game_type: GameType::TicTacToe,
            status: GameStatus::Waiting,
            state: serde_json::json!({}),
            current_player_index: Some(0),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn lobby_codes_are_unique_while_active() {
        let store = InMemoryStore::new();
        store.create_lobby(lobby("ROOM1")).await.unwrap();
        assert!(store.create_lobby(lobby("ROOM1")).await.is_err());

        store.deactivate_lobby("ROOM1").await.unwrap();
        // Inactive codes can be reused.
        store.create_lobby(lobby("ROOM1")).await.unwrap();
    }

    #[tokio::test]
    async fn seats_stay_dense_after_removal() {
        let store = InMemoryStore::new();
        store.create_lobby(lobby("ROOM1")).await.unwrap();
        for id in ["a", "b", "c"] {
            assert!(store.add_member("ROOM1", id, id, false).await.unwrap());
        }
        // Duplicate membership is refused.
        assert!(!store.add_member("ROOM1", "b", "b", false).await.unwrap());

        store.remove_member("ROOM1", "b").await.unwrap();
        let members = store.get_members("ROOM1").await.unwrap();
        let seats: Vec<u8> = members.iter().map(|m| m.seat_index).collect();
        assert_eq!(seats, vec![0, 1]);
        assert_eq!(members[1].principal_id, "c");
    }

    #[tokio::test]
    async fn one_open_game_per_lobby() {
        let store = InMemoryStore::new();
        store.create_lobby(lobby("ROOM1")).await.unwrap();
        let first = game("ROOM1");
        store.create_game(first.clone()).await.unwrap();
        assert!(store.create_game(game("ROOM1")).await.is_err());

        // Finishing the game frees the slot.
        store
            .update_game(
                &first.id,
                GameStatus::Playing,
                serde_json::json!({}),
                Some(0),
            )
            .await
            .unwrap();
        store
            .update_game(
                &first.id,
                GameStatus::Finished,
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap();
        store.create_game(game("ROOM1")).await.unwrap();
    }

    #[tokio::test]
    async fn updated_at_is_strictly_monotonic() {
        let store = InMemoryStore::new();
        store.create_lobby(lobby("ROOM1")).await.unwrap();
        let record = game("ROOM1");
        store.create_game(record.clone()).await.unwrap();

        let mut previous = record.updated_at;
        for _ in 0..10 {
            let updated = store
                .update_game(
                    &record.id,
                    GameStatus::Playing,
                    serde_json::json!({}),
                    Some(0),
                )
                .await
                .unwrap()
                .unwrap();
            assert!(updated.updated_at > previous);
            previous = updated.updated_at;
        }
    }

    #[tokio::test]
    async fn deactivation_cascades() {
        let store = InMemoryStore::new();
        store.create_lobby(lobby("ROOM1")).await.unwrap();
        store.add_member("ROOM1", "a", "a", false).await.unwrap();
        let record = game("ROOM1");
        store.create_game(record.clone()).await.unwrap();

        assert!(store.deactivate_lobby("ROOM1").await.unwrap());
        assert!(store.get_members("ROOM1").await.unwrap().is_empty());
        assert!(store.get_game(&record.id).await.unwrap().is_none());
        // Second deactivation is a no-op.
        assert!(!store.deactivate_lobby("ROOM1").await.unwrap());
    }

    #[tokio::test]
    async fn idle_guest_collection() {
        let store = InMemoryStore::new();
        let stale = UserRecord {
            id: "guest-old".to_string(),
            username: "Old".to_string(),
            is_guest: true,
            last_active_at: Utc::now() - Duration::hours(48),
        };
        let fresh = UserRecord {
            id: "guest-new".to_string(),
            username: "New".to_string(),
            is_guest: true,
            last_active_at: Utc::now(),
        };
        let registered = UserRecord {
            id: "user-1".to_string(),
            username: "Reg".to_string(),
            is_guest: false,
            last_active_at: Utc::now() - Duration::hours(48),
        };
        for user in [stale, fresh, registered] {
            store.upsert_user(user).await.unwrap();
        }

        let removed = store
            .delete_idle_guests(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_user("guest-old").await.unwrap().is_none());
        assert!(store.get_user("guest-new").await.unwrap().is_some());
        assert!(store.get_user("user-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn alert_state_round_trips() {
        let store = InMemoryStore::new();
        assert!(store.get_alert_state("move_apply_timeout").await.unwrap().is_none());
        let state = AlertStateRecord {
            alert_key: "move_apply_timeout".to_string(),
            is_open: true,
            last_value: Some(612.0),
            last_triggered_at: Some(Utc::now()),
            ..AlertStateRecord::default()
        };
        store.upsert_alert_state(state.clone()).await.unwrap();
        let loaded = store
            .get_alert_state("move_apply_timeout")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, state);
    }
}
