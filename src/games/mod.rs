//! Game rules modules.
//!
//! Each game implements the [`GameRules`] capability trait as a pure
//! function suite over the tagged [`GameState`] blob. The match runtime is
//! polymorphic over this trait and never inspects game internals; the
//! state blob is self-describing JSON so `restore` is total.
//!
//! Randomness (dice, role assignment) is drawn from a seed embedded in the
//! state and advanced on use, so `apply_move` stays deterministic given
//! the state it received.

pub mod guess_the_spy;
pub mod rock_paper_scissors;
pub mod tic_tac_toe;
pub mod yahtzee;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::protocol::{
    BotDifficulty, ErrorCode, GameType, GameWinner, MoveEnvelope, PrincipalId,
};

/// A seat in the turn order as the rules modules see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSeat {
    pub id: PrincipalId,
    pub display_name: String,
    pub is_bot: bool,
}

impl PlayerSeat {
    pub fn new(id: impl Into<PrincipalId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_bot: false,
        }
    }
}

/// Per-lobby rule knobs handed to `initial_state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    /// Match length; `None` means unlimited rounds.
    pub target_rounds: Option<u32>,
    /// Rock-paper-scissors match length (3 or 5).
    pub best_of: u8,
    /// Guess-the-spy round count.
    pub spy_rounds: u8,
    /// Explicit RNG seed; tests pin this, production leaves it unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            target_rounds: None,
            best_of: 3,
            spy_rounds: 3,
            seed: None,
        }
    }
}

impl GameConfig {
    pub(crate) fn seed_or_entropy(&self) -> u64 {
        self.seed.unwrap_or_else(|| rand::random::<u64>() | 1)
    }
}

/// Multi-round match bookkeeping carried inside the game blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchAggregate {
    pub target_rounds: Option<u32>,
    pub rounds_played: u32,
    /// Wins keyed by symbol (Tic-Tac-Toe) or player id (everything else).
    pub wins: BTreeMap<String, u32>,
    pub draws: u32,
}

impl MatchAggregate {
    pub fn new(target_rounds: Option<u32>) -> Self {
        Self {
            target_rounds,
            ..Self::default()
        }
    }

    pub fn record_win(&mut self, key: &str) {
        *self.wins.entry(key.to_string()).or_insert(0) += 1;
        self.rounds_played += 1;
    }

    pub fn record_draw(&mut self) {
        self.draws += 1;
        self.rounds_played += 1;
    }

    /// Whether another round may begin.
    pub fn next_round_allowed(&self) -> bool {
        match self.target_rounds {
            None => true,
            Some(target) => self.rounds_played < target,
        }
    }
}

/// Structured reason a move was rejected. Reported to the submitting
/// connection only and never broadcast.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MoveRejection {
    #[error("it is not this player's turn")]
    NotYourTurn,
    #[error("the game is not in progress")]
    GameNotPlaying,
    #[error("move type `{0}` is not valid in the current phase")]
    UnknownMoveType(String),
    #[error("move data is malformed or out of bounds: {0}")]
    OutOfBounds(String),
    #[error("that option is already locked: {0}")]
    AlreadyLocked(String),
    #[error("the round has not finished")]
    RoundNotFinished,
    #[error("the configured round limit has been reached")]
    RoundLimitReached,
    #[error("the move does not belong to this game type")]
    WrongGame,
}

impl MoveRejection {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotYourTurn => ErrorCode::NotYourTurn,
            Self::GameNotPlaying => ErrorCode::GameNotPlaying,
            Self::RoundNotFinished => ErrorCode::GameNotFinished,
            Self::RoundLimitReached => ErrorCode::RoundLimitReached,
            Self::WrongGame => ErrorCode::InternalError,
            _ => ErrorCode::InvalidMove,
        }
    }
}

/// Terminal verdict for the current round.
#[derive(Debug, Clone, PartialEq)]
pub struct Terminal {
    pub winner: GameWinner,
    pub winning_detail: Option<serde_json::Value>,
}

/// Side event emitted by `apply_move` alongside the new state. These feed
/// telemetry and client annotations; they never carry authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvent {
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl RuleEvent {
    pub fn new(kind: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            detail,
        }
    }
}

/// Tagged union over the concrete per-game state records. Serialization is
/// self-describing so a restored blob always lands on the right variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "gameType", content = "state")]
pub enum GameState {
    #[serde(rename = "tic-tac-toe")]
    TicTacToe(tic_tac_toe::TicTacToeState),
    #[serde(rename = "yahtzee")]
    Yahtzee(yahtzee::YahtzeeState),
    #[serde(rename = "rock-paper-scissors")]
    RockPaperScissors(rock_paper_scissors::RpsState),
    #[serde(rename = "guess-the-spy")]
    GuessTheSpy(guess_the_spy::SpyState),
}

impl GameState {
    pub fn game_type(&self) -> GameType {
        match self {
            Self::TicTacToe(_) => GameType::TicTacToe,
            Self::Yahtzee(_) => GameType::Yahtzee,
            Self::RockPaperScissors(_) => GameType::RockPaperScissors,
            Self::GuessTheSpy(_) => GameType::GuessTheSpy,
        }
    }

    pub fn players(&self) -> &[PlayerSeat] {
        match self {
            Self::TicTacToe(s) => &s.players,
            Self::Yahtzee(s) => &s.players,
            Self::RockPaperScissors(s) => &s.players,
            Self::GuessTheSpy(s) => &s.players,
        }
    }

    pub fn current_player_index(&self) -> u8 {
        match self {
            Self::TicTacToe(s) => s.current_player_index,
            Self::Yahtzee(s) => s.current_player_index,
            Self::RockPaperScissors(s) => s.current_player_index(),
            Self::GuessTheSpy(s) => s.current_player_index(),
        }
    }

    pub fn current_player(&self) -> Option<&PlayerSeat> {
        self.players().get(self.current_player_index() as usize)
    }

    pub fn aggregate(&self) -> &MatchAggregate {
        match self {
            Self::TicTacToe(s) => &s.aggregate,
            Self::Yahtzee(s) => &s.aggregate,
            Self::RockPaperScissors(s) => &s.aggregate,
            Self::GuessTheSpy(s) => &s.aggregate,
        }
    }

    /// Serialize to the persisted/wire representation.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Restore from the persisted/wire representation.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Capability suite every game module implements. All methods are pure
/// over `&GameState`; the runtime owns sequencing and persistence.
pub trait GameRules: Send + Sync {
    fn game_type(&self) -> GameType;

    /// Materialize a fresh state for the seated roster.
    fn initial_state(&self, players: &[PlayerSeat], config: &GameConfig) -> GameState;

    /// Check a move without mutating anything.
    fn validate_move(&self, state: &GameState, mv: &MoveEnvelope) -> Result<(), MoveRejection>;

    /// Apply a validated move, returning the successor state and any side
    /// events. Implementations re-validate; a rejection here means the
    /// caller skipped validation.
    fn apply_move(
        &self,
        state: &GameState,
        mv: &MoveEnvelope,
    ) -> Result<(GameState, Vec<RuleEvent>), MoveRejection>;

    /// Terminal verdict for the current round, if any.
    fn is_terminal(&self, state: &GameState) -> Option<Terminal>;

    /// Deterministic move submitted on behalf of a timed-out player. The
    /// returned move MUST pass `validate_move` for that player at this
    /// instant; `None` means the player has no legal move right now.
    fn fallback_move(&self, state: &GameState, player: &PrincipalId) -> Option<MoveEnvelope>;

    /// Bot decision for the given difficulty. Must only return moves that
    /// pass `validate_move` for the bot at this instant.
    fn bot_move(
        &self,
        state: &GameState,
        player: &PrincipalId,
        difficulty: BotDifficulty,
    ) -> Option<MoveEnvelope>;
}

/// Registry entry point: the rules implementation for a game type.
pub fn rules_for(game_type: GameType) -> &'static dyn GameRules {
    match game_type {
        GameType::TicTacToe => &tic_tac_toe::TicTacToeRules,
        GameType::Yahtzee => &yahtzee::YahtzeeRules,
        GameType::RockPaperScissors => &rock_paper_scissors::RpsRules,
        GameType::GuessTheSpy => &guess_the_spy::SpyRules,
    }
}

/// xorshift64* step over the seed embedded in game state. Deterministic
/// given the state, which keeps `apply_move` a pure function.
pub(crate) fn next_rand(seed: &mut u64) -> u64 {
    let mut x = *seed;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    *seed = x;
    x.wrapping_mul(0x2545_F491_4F6C_DD1D)
}

/// Uniform value in `0..bound` from the embedded seed.
pub(crate) fn rand_below(seed: &mut u64, bound: u64) -> u64 {
    debug_assert!(bound > 0);
    next_rand(seed) % bound
}

/// Single die roll in 1..=6.
pub(crate) fn roll_die(seed: &mut u64) -> u8 {
    (rand_below(seed, 6) + 1) as u8
}

#[cfg(test)]
pub(crate) fn test_seats(n: usize) -> Vec<PlayerSeat> {
    (0..n)
        .map(|i| PlayerSeat::new(format!("p{i}"), format!("Player{i}")))
        .collect()
}
