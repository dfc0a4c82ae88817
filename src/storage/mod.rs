//! Storage abstraction for lobbies, games, players, users, bots, and
//! alert-rule state.
//!
//! The trait describes the access contract the realtime core needs; the
//! bundled backend is in-memory. A persistence DSN is accepted by
//! configuration for forward compatibility and logged, but only the
//! in-memory backend ships here.

mod memory;

pub use memory::InMemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::protocol::{
    BotDifficulty, GameId, GameStatus, GameType, LobbyCode, PrincipalId,
};

/// Persisted lobby row.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyRecord {
    pub code: LobbyCode,
    pub name: String,
    pub game_type: GameType,
    pub creator_id: PrincipalId,
    pub max_players: u8,
    pub turn_timer_seconds: u32,
    /// `salt$hex` of a salted SHA-256; never exposed to clients.
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted membership row: a principal occupying a seat in a lobby.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipRecord {
    pub lobby_code: LobbyCode,
    pub principal_id: PrincipalId,
    pub display_name: String,
    pub seat_index: u8,
    pub is_connected: bool,
    pub is_bot: bool,
    pub score: i32,
}

/// Persisted game row. The state blob is self-describing JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub id: GameId,
    pub lobby_code: LobbyCode,
    pub game_type: GameType,
    pub status: GameStatus,
    pub state: serde_json::Value,
    pub current_player_index: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted user row (registered users and provisioned guests).
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: PrincipalId,
    pub username: String,
    pub is_guest: bool,
    pub last_active_at: DateTime<Utc>,
}

/// Persisted bot row keyed by the bot's user id.
#[derive(Debug, Clone, PartialEq)]
pub struct BotRecord {
    pub user_id: PrincipalId,
    pub difficulty: BotDifficulty,
    pub bot_type: GameType,
}

/// Persisted alert-rule state. Invariant: `is_open` implies
/// `last_triggered_at >= last_resolved_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertStateRecord {
    pub alert_key: String,
    pub is_open: bool,
    pub last_value: Option<f64>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub last_resolved_at: Option<DateTime<Utc>>,
}

/// Storage contract for the realtime core.
#[async_trait]
pub trait Store: Send + Sync {
    /// Initialize the backend (no-op for the in-memory store).
    async fn initialize(&self) -> Result<()>;

    // -- Lobbies --------------------------------------------------------

    /// Create a lobby. Fails if an active lobby already holds the code.
    async fn create_lobby(&self, lobby: LobbyRecord) -> Result<()>;

    async fn get_lobby(&self, code: &str) -> Result<Option<LobbyRecord>>;

    /// Active lobbies with their member counts, optionally filtered by
    /// game type.
    async fn list_active_lobbies(
        &self,
        game_type: Option<GameType>,
    ) -> Result<Vec<(LobbyRecord, usize)>>;

    async fn set_lobby_password_hash(&self, code: &str, hash: Option<String>) -> Result<bool>;

    /// Deactivate a lobby, cascading to its memberships and games.
    async fn deactivate_lobby(&self, code: &str) -> Result<bool>;

    // -- Memberships ----------------------------------------------------

    /// Insert a membership at the next dense seat index. Returns `false`
    /// when the principal already holds a seat in the lobby.
    async fn add_member(
        &self,
        code: &str,
        principal_id: &str,
        display_name: &str,
        is_bot: bool,
    ) -> Result<bool>;

    /// Remove a membership and re-pack seat indices to stay dense.
    async fn remove_member(&self, code: &str, principal_id: &str)
        -> Result<Option<MembershipRecord>>;

    /// Members ordered by seat index.
    async fn get_members(&self, code: &str) -> Result<Vec<MembershipRecord>>;

    async fn get_member(&self, code: &str, principal_id: &str)
        -> Result<Option<MembershipRecord>>;

    async fn set_member_connected(
        &self,
        code: &str,
        principal_id: &str,
        is_connected: bool,
    ) -> Result<bool>;

    async fn add_member_score(&self, code: &str, principal_id: &str, delta: i32) -> Result<bool>;

    // -- Games ----------------------------------------------------------

    /// Insert a game. Fails if the lobby already has a game in
    /// waiting or playing.
    async fn create_game(&self, game: GameRecord) -> Result<()>;

    async fn get_game(&self, id: &GameId) -> Result<Option<GameRecord>>;

    /// The lobby's game in waiting or playing, if any.
    async fn get_open_game(&self, code: &str) -> Result<Option<GameRecord>>;

    /// The lobby's most recently updated game regardless of status.
    async fn get_latest_game(&self, code: &str) -> Result<Option<GameRecord>>;

    /// Persist a new state snapshot. `updated_at` is bumped to a value
    /// strictly greater than the previous one.
    async fn update_game(
        &self,
        id: &GameId,
        status: GameStatus,
        state: serde_json::Value,
        current_player_index: Option<u8>,
    ) -> Result<Option<GameRecord>>;

    // -- Users and bots -------------------------------------------------

    async fn upsert_user(&self, user: UserRecord) -> Result<()>;

    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>>;

    async fn touch_user_activity(&self, id: &str) -> Result<()>;

    /// Delete guest users idle since before `cutoff`. Returns how many
    /// were removed.
    async fn delete_idle_guests(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn upsert_bot(&self, bot: BotRecord) -> Result<()>;

    async fn get_bot(&self, user_id: &str) -> Result<Option<BotRecord>>;

    // -- Alert state ----------------------------------------------------

    async fn get_alert_state(&self, alert_key: &str) -> Result<Option<AlertStateRecord>>;

    async fn upsert_alert_state(&self, state: AlertStateRecord) -> Result<()>;

    // -- Health ---------------------------------------------------------

    async fn health_check(&self) -> bool;
}

/// Storage configuration. Only the in-memory backend is bundled; a DSN is
/// carried through so deployments can log what they asked for.
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    #[default]
    InMemory,
}

/// Create a store instance based on configuration.
pub fn create_store(config: StoreConfig) -> Box<dyn Store> {
    match config {
        StoreConfig::InMemory => Box::new(InMemoryStore::new()),
    }
}
