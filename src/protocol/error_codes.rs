use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for structured error handling.
///
/// Codes are part of the wire contract: clients key retry behaviour and
/// localized user messages off them, so variants must never be renamed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication
    AuthRequired,
    AuthInvalid,
    AuthFailed,

    // Rate limiting
    RateLimitExceeded,

    // Lobby access
    InvalidLobbyCode,
    LobbyNotFound,
    LobbyAccessDenied,
    LobbyFull,
    JoinLobbyError,
    NotCreator,

    // Game play
    InvalidMove,
    NotYourTurn,
    GameNotPlaying,
    GameNotFinished,
    RoundLimitReached,

    // Transport
    SlowConsumer,
    MessageTooLarge,
    InvalidMessage,

    // Server
    InternalError,
}

impl ErrorCode {
    /// Human-readable description shown when no translation is available.
    pub fn description(&self) -> &'static str {
        match self {
            Self::AuthRequired => {
                "Authentication is required. Provide a realtime token or guest token before any other message."
            }
            Self::AuthInvalid => {
                "The supplied credential is invalid, malformed, or expired. Obtain a fresh token and reconnect."
            }
            Self::AuthFailed => {
                "Authentication failed too many times. The connection has been closed."
            }
            Self::RateLimitExceeded => {
                "Too many requests in a short time. Slow down and try again."
            }
            Self::InvalidLobbyCode => {
                "The lobby code is malformed. Codes are 4-20 uppercase letters and digits."
            }
            Self::LobbyNotFound => {
                "No active lobby with that code exists. It may have been closed."
            }
            Self::LobbyAccessDenied => {
                "You are not a member of this lobby. Join over HTTP before subscribing."
            }
            Self::LobbyFull => "The lobby has reached its maximum player capacity.",
            Self::JoinLobbyError => {
                "Joining the lobby failed. Check the password and capacity, then try again."
            }
            Self::NotCreator => "Only the lobby creator may perform this action.",
            Self::InvalidMove => {
                "The move was rejected by the game rules. Check coordinates and move type."
            }
            Self::NotYourTurn => "It is not your turn to act.",
            Self::GameNotPlaying => "The game is not currently in progress.",
            Self::GameNotFinished => "The current round has not finished yet.",
            Self::RoundLimitReached => "The configured number of rounds has been played.",
            Self::SlowConsumer => {
                "The connection could not keep up with event delivery and was closed. Reconnect and resync."
            }
            Self::MessageTooLarge => "The message exceeds the maximum allowed size.",
            Self::InvalidMessage => {
                "The message could not be parsed. Check the frame structure against the protocol."
            }
            Self::InternalError => {
                "An internal server error occurred. Try again or contact support if the issue persists."
            }
        }
    }

    /// Stable translation key derived from the wire identifier.
    pub fn translation_key(&self) -> String {
        format!("errors.{}", self.as_wire_str().to_ascii_lowercase())
    }

    /// The SCREAMING_SNAKE_CASE identifier used on the wire.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthInvalid => "AUTH_INVALID",
            Self::AuthFailed => "AUTH_FAILED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InvalidLobbyCode => "INVALID_LOBBY_CODE",
            Self::LobbyNotFound => "LOBBY_NOT_FOUND",
            Self::LobbyAccessDenied => "LOBBY_ACCESS_DENIED",
            Self::LobbyFull => "LOBBY_FULL",
            Self::JoinLobbyError => "JOIN_LOBBY_ERROR",
            Self::NotCreator => "NOT_CREATOR",
            Self::InvalidMove => "INVALID_MOVE",
            Self::NotYourTurn => "NOT_YOUR_TURN",
            Self::GameNotPlaying => "GAME_NOT_PLAYING",
            Self::GameNotFinished => "GAME_NOT_FINISHED",
            Self::RoundLimitReached => "ROUND_LIMIT_REACHED",
            Self::SlowConsumer => "SLOW_CONSUMER",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ErrorCode] = &[
        ErrorCode::AuthRequired,
        ErrorCode::AuthInvalid,
        ErrorCode::AuthFailed,
        ErrorCode::RateLimitExceeded,
        ErrorCode::InvalidLobbyCode,
        ErrorCode::LobbyNotFound,
        ErrorCode::LobbyAccessDenied,
        ErrorCode::LobbyFull,
        ErrorCode::JoinLobbyError,
        ErrorCode::NotCreator,
        ErrorCode::InvalidMove,
        ErrorCode::NotYourTurn,
        ErrorCode::GameNotPlaying,
        ErrorCode::GameNotFinished,
        ErrorCode::RoundLimitReached,
        ErrorCode::SlowConsumer,
        ErrorCode::MessageTooLarge,
        ErrorCode::InvalidMessage,
        ErrorCode::InternalError,
    ];

    #[test]
    fn all_error_codes_have_descriptions() {
        for code in ALL {
            assert!(
                code.description().len() > 10,
                "ErrorCode::{code:?} has suspiciously short description"
            );
        }
    }

    #[test]
    fn serialization_matches_wire_identifier() {
        for code in ALL {
            let json = serde_json::to_string(code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_wire_str()));
        }
    }

    #[test]
    fn translation_key_is_lowercased_identifier() {
        assert_eq!(
            ErrorCode::LobbyAccessDenied.translation_key(),
            "errors.lobby_access_denied"
        );
        assert_eq!(
            ErrorCode::NotYourTurn.translation_key(),
            "errors.not_your_turn"
        );
    }

    #[test]
    fn display_uses_description() {
        let code = ErrorCode::LobbyFull;
        assert_eq!(format!("{code}"), code.description());
    }
}
