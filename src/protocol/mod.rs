// Protocol module: message types, error codes, and input validation

pub mod error_codes;
pub mod lobby_codes;
pub mod messages;
pub mod types;
pub mod validation;

pub use error_codes::ErrorCode;

pub use types::{
    BotDifficulty, GameId, GameStatus, GameType, LobbyCode, LobbySummary, MemberInfo,
    MoveEnvelope, Principal, PrincipalId, SeqId, GENERATED_LOBBY_CODE_LENGTH, GUEST_ID_PREFIX,
    LOBBY_CODE_MAX_LENGTH, LOBBY_CODE_MIN_LENGTH, MAX_CHAT_MESSAGE_LENGTH,
    MAX_DISPLAY_NAME_LENGTH, MAX_LOBBY_NAME_LENGTH, TURN_TIMER_MAX_SECONDS,
    TURN_TIMER_MIN_SECONDS,
};

pub use messages::{
    BotActionKind, ClientMessage, ErrorPayload, EventEnvelope, GameActionKind, GameUpdatePayload,
    GameWinner, LobbySnapshot, ServerMessage, TerminalInfo,
};
