use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a game instance.
pub type GameId = Uuid;

/// Stable identifier of a principal (user, guest, or bot).
///
/// User and bot ids are opaque account ids; guest ids carry the
/// `guest-` prefix.
pub type PrincipalId = String;

/// Shareable lobby code, 4-20 uppercase alphanumeric characters.
pub type LobbyCode = String;

/// Monotonic per-room sequence number tagging every delivered event.
pub type SeqId = u64;

/// Prefix of provisioned guest principal ids.
pub const GUEST_ID_PREFIX: &str = "guest-";

/// Minimum and maximum accepted lobby code length.
pub const LOBBY_CODE_MIN_LENGTH: usize = 4;
pub const LOBBY_CODE_MAX_LENGTH: usize = 20;

/// Length of generated lobby codes.
pub const GENERATED_LOBBY_CODE_LENGTH: usize = 6;

/// Bounds on the per-turn budget configurable on a lobby (seconds).
pub const TURN_TIMER_MIN_SECONDS: u32 = 30;
pub const TURN_TIMER_MAX_SECONDS: u32 = 180;

/// Maximum chat message length after escaping.
pub const MAX_CHAT_MESSAGE_LENGTH: usize = 500;

/// Maximum accepted display name length.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 32;

/// Maximum accepted lobby name length.
pub const MAX_LOBBY_NAME_LENGTH: usize = 64;

/// An authenticated identity bound to a connection.
///
/// Immutable for the lifetime of the connection that resolved it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: PrincipalId,
    pub display_name: String,
    pub is_guest: bool,
    pub is_bot: bool,
}

impl Principal {
    pub fn user(id: impl Into<PrincipalId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_guest: false,
            is_bot: false,
        }
    }

    pub fn guest(id: impl Into<PrincipalId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_guest: true,
            is_bot: false,
        }
    }

    pub fn bot(id: impl Into<PrincipalId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_guest: false,
            is_bot: true,
        }
    }
}

/// The games this server knows how to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum GameType {
    TicTacToe,
    Yahtzee,
    RockPaperScissors,
    GuessTheSpy,
}

impl GameType {
    /// Minimum seated players required to start a game.
    pub fn min_players(&self) -> u8 {
        match self {
            Self::TicTacToe | Self::RockPaperScissors => 2,
            Self::Yahtzee => 2,
            Self::GuessTheSpy => 3,
        }
    }

    /// Maximum seated players the rules support.
    pub fn max_players(&self) -> u8 {
        match self {
            Self::TicTacToe | Self::RockPaperScissors => 2,
            Self::Yahtzee | Self::GuessTheSpy => 8,
        }
    }

    /// Whether `max_players` is within the per-game allowed set.
    pub fn allows_capacity(&self, max_players: u8) -> bool {
        (self.min_players()..=self.max_players()).contains(&max_players)
    }

    pub const ALL: [GameType; 4] = [
        GameType::TicTacToe,
        GameType::Yahtzee,
        GameType::RockPaperScissors,
        GameType::GuessTheSpy,
    ];
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TicTacToe => "tic-tac-toe",
            Self::Yahtzee => "yahtzee",
            Self::RockPaperScissors => "rock-paper-scissors",
            Self::GuessTheSpy => "guess-the-spy",
        };
        write!(f, "{name}")
    }
}

/// Bot strength selected when adding a bot to a lobby.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BotDifficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Lifecycle of a game instance. Transitions only ever move forward:
/// waiting -> playing -> finished | abandoned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Playing,
    Finished,
    Abandoned,
}

impl GameStatus {
    pub fn can_transition_to(&self, next: GameStatus) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Playing)
                | (Self::Playing, Self::Finished)
                | (Self::Playing, Self::Abandoned)
                | (Self::Waiting, Self::Abandoned)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Abandoned)
    }
}

/// A seated member of a lobby as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub principal_id: PrincipalId,
    pub display_name: String,
    pub seat_index: u8,
    pub is_connected: bool,
    pub is_bot: bool,
    pub score: i32,
}

/// Summary of an active lobby returned by list/browse endpoints.
/// Never exposes the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummary {
    pub code: LobbyCode,
    pub name: String,
    pub game_type: GameType,
    pub player_count: usize,
    pub max_players: u8,
    pub has_password: bool,
    pub turn_timer_seconds: u32,
    pub created_at: DateTime<Utc>,
}

/// A move as submitted by a client and consumed by the rules modules.
///
/// `player_id` is always overwritten with the socket's bound principal
/// before validation; client-supplied ids are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveEnvelope {
    pub player_id: PrincipalId,
    #[serde(rename = "type")]
    pub move_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl MoveEnvelope {
    pub fn new(
        player_id: impl Into<PrincipalId>,
        move_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            move_type: move_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_type_capacity_sets() {
        assert!(GameType::TicTacToe.allows_capacity(2));
        assert!(!GameType::TicTacToe.allows_capacity(3));
        assert!(GameType::Yahtzee.allows_capacity(8));
        assert!(!GameType::Yahtzee.allows_capacity(9));
        assert!(GameType::GuessTheSpy.allows_capacity(3));
        assert!(!GameType::GuessTheSpy.allows_capacity(2));
    }

    #[test]
    fn game_type_wire_names_are_kebab_case() {
        assert_eq!(
            serde_json::to_string(&GameType::TicTacToe).unwrap(),
            "\"tic-tac-toe\""
        );
        assert_eq!(
            serde_json::to_string(&GameType::GuessTheSpy).unwrap(),
            "\"guess-the-spy\""
        );
    }

    #[test]
    fn status_transitions_are_forward_only() {
        assert!(GameStatus::Waiting.can_transition_to(GameStatus::Playing));
        assert!(GameStatus::Playing.can_transition_to(GameStatus::Finished));
        assert!(GameStatus::Playing.can_transition_to(GameStatus::Abandoned));
        assert!(!GameStatus::Finished.can_transition_to(GameStatus::Playing));
        assert!(!GameStatus::Playing.can_transition_to(GameStatus::Waiting));
    }

    #[test]
    fn move_envelope_round_trips() {
        let envelope = MoveEnvelope::new("x", "place", serde_json::json!({"row": 0, "col": 2}));
        let json = serde_json::to_string(&envelope).unwrap();
        let back: MoveEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }
}
