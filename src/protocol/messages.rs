use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error_codes::ErrorCode;
use super::types::{
    GameId, GameStatus, GameType, LobbyCode, MemberInfo, Principal, PrincipalId, SeqId,
};

/// Message types sent from client to server.
///
/// The first message on a connection MUST be `authenticate`; everything
/// else is rejected until the handshake completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Present identity material (realtime token or signed guest token).
    #[serde(rename_all = "camelCase")]
    Authenticate { token: String },
    /// Subscribe to a lobby's room. Requires an existing membership
    /// created over HTTP; acknowledged with `joined-lobby`.
    #[serde(rename_all = "camelCase")]
    JoinLobby { code: LobbyCode },
    /// Leave a lobby's room. Also implied by socket close.
    #[serde(rename_all = "camelCase")]
    LeaveLobby { code: LobbyCode },
    /// Game mutation or ephemeral room traffic.
    #[serde(rename_all = "camelCase")]
    GameAction {
        lobby_code: LobbyCode,
        action: GameActionKind,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Convenience chat path; equivalent to a `chat-message` game action.
    #[serde(rename_all = "camelCase")]
    SendChatMessage {
        lobby_code: LobbyCode,
        message: String,
    },
    /// Request the current authoritative snapshot, plus a replay of any
    /// buffered events after `lastSeenSeq` when supplied.
    #[serde(rename_all = "camelCase")]
    SyncState {
        lobby_code: LobbyCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen_seq: Option<SeqId>,
    },
    /// Keepalive.
    Ping,
}

/// Kinds of `game-action` traffic a client may send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GameActionKind {
    /// A move; the server re-validates and authors the canonical event.
    StateChange,
    ChatMessage,
    Typing,
}

/// Outcome of a finished round as shown on the wire.
///
/// Serializes to the winning principal id, or the literal string
/// `"draw"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameWinner {
    Player(PrincipalId),
    Draw,
}

impl Serialize for GameWinner {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Player(id) => serializer.serialize_str(id),
            Self::Draw => serializer.serialize_str("draw"),
        }
    }
}

impl<'de> Deserialize<'de> for GameWinner {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "draw" {
            Ok(Self::Draw)
        } else {
            Ok(Self::Player(raw))
        }
    }
}

/// Terminal details attached to the final `game-update` of a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    pub winner: GameWinner,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_detail: Option<serde_json::Value>,
}

/// Payload for `game-update`. Boxed in `ServerMessage` to keep the enum
/// small.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdatePayload {
    pub lobby_code: LobbyCode,
    pub game_id: GameId,
    pub status: GameStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_player_index: Option<u8>,
    /// Self-describing serialized game state.
    pub state: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalInfo>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for `lobby-update`: the full membership roster after a change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    pub code: LobbyCode,
    pub name: String,
    pub game_type: GameType,
    pub creator_id: PrincipalId,
    pub max_players: u8,
    pub turn_timer_seconds: u32,
    pub members: Vec<MemberInfo>,
}

/// Structured error payload: a stable `code` for programmatic handling
/// plus a human message and an optional translation key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            translation_key: Some(code.translation_key()),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.description())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Step descriptor carried by `bot-action` events. Purely cosmetic for
/// clients; never affects game state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BotActionKind {
    Thinking,
    Roll,
    Hold,
    Score,
    Place,
    Choice,
    Answer,
    Vote,
}

/// Message types sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Handshake succeeded; carries the resolved principal (guests learn
    /// their suffixed display name here). Connection-scoped, `seq = 0`.
    #[serde(rename_all = "camelCase")]
    Authenticated { principal: Principal },
    /// Acknowledges `join-lobby`; sent only to the subscribing socket and
    /// always before any other event for that lobby on the connection.
    #[serde(rename_all = "camelCase")]
    JoinedLobby { lobby_code: LobbyCode, success: bool },
    /// Authoritative state after an accepted move (boxed to reduce enum size).
    GameUpdate(Box<GameUpdatePayload>),
    #[serde(rename_all = "camelCase")]
    GameStarted {
        lobby_code: LobbyCode,
        game_id: GameId,
        first_player_name: String,
    },
    #[serde(rename_all = "camelCase")]
    GameAbandoned {
        lobby_code: LobbyCode,
        game_id: GameId,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        lobby_code: LobbyCode,
        member: MemberInfo,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        lobby_code: LobbyCode,
        principal_id: PrincipalId,
        display_name: String,
    },
    /// Roster snapshot after any membership change (boxed to reduce enum size).
    LobbyUpdate(Box<LobbySnapshot>),
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        lobby_code: LobbyCode,
        from: PrincipalId,
        display_name: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    PlayerTyping {
        lobby_code: LobbyCode,
        principal_id: PrincipalId,
    },
    #[serde(rename_all = "camelCase")]
    BotAction {
        lobby_code: LobbyCode,
        game_id: GameId,
        bot_id: PrincipalId,
        action: BotActionKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },
    ServerError(ErrorPayload),
    Pong,
}

/// Wire envelope for delivered events: the monotonic per-room sequence id
/// plus the message itself. Clients deduplicate by `seq`.
///
/// Connection-scoped messages (`pong`, pre-subscription errors) carry
/// `seq = 0`; room events always carry `seq >= 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub seq: SeqId,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl EventEnvelope {
    pub fn room(seq: SeqId, message: ServerMessage) -> Self {
        Self { seq, message }
    }

    /// Envelope for a message outside any room's sequence space.
    pub fn direct(message: ServerMessage) -> Self {
        Self { seq: 0, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_wire_shape() {
        let msg = ClientMessage::JoinLobby {
            code: "ABC123".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "join-lobby");
        assert_eq!(json["data"]["code"], "ABC123");
    }

    #[test]
    fn game_action_kind_round_trips() {
        let msg = ClientMessage::GameAction {
            lobby_code: "ROOM42".to_string(),
            action: GameActionKind::StateChange,
            payload: serde_json::json!({"type": "place", "data": {"row": 1, "col": 1}}),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"state-change\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn winner_serializes_draw_literal() {
        assert_eq!(
            serde_json::to_string(&GameWinner::Draw).unwrap(),
            "\"draw\""
        );
        assert_eq!(
            serde_json::to_string(&GameWinner::Player("x".into())).unwrap(),
            "\"x\""
        );
        let parsed: GameWinner = serde_json::from_str("\"draw\"").unwrap();
        assert_eq!(parsed, GameWinner::Draw);
    }

    #[test]
    fn envelope_flattens_sequence_id() {
        let envelope = EventEnvelope::room(
            42,
            ServerMessage::PlayerTyping {
                lobby_code: "ROOM42".to_string(),
                principal_id: "p1".to_string(),
            },
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["seq"], 42);
        assert_eq!(json["type"], "player-typing");
        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn error_payload_carries_translation_key() {
        let payload = ErrorPayload::from_code(ErrorCode::LobbyNotFound);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["code"], "LOBBY_NOT_FOUND");
        assert_eq!(json["translationKey"], "errors.lobby_not_found");
    }
}
