//! Input validation for client-supplied lobby and chat data.
//!
//! Validation failures are reported to the caller only and never
//! broadcast; each function returns a human-readable reason on error.

use super::types::{
    GameType, LOBBY_CODE_MAX_LENGTH, LOBBY_CODE_MIN_LENGTH, MAX_CHAT_MESSAGE_LENGTH,
    MAX_DISPLAY_NAME_LENGTH, MAX_LOBBY_NAME_LENGTH, TURN_TIMER_MAX_SECONDS,
    TURN_TIMER_MIN_SECONDS,
};

pub fn validate_lobby_code(code: &str) -> Result<(), String> {
    if code.len() < LOBBY_CODE_MIN_LENGTH || code.len() > LOBBY_CODE_MAX_LENGTH {
        return Err(format!(
            "Lobby code must be {LOBBY_CODE_MIN_LENGTH}-{LOBBY_CODE_MAX_LENGTH} characters"
        ));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("Lobby code must be alphanumeric".to_string());
    }
    Ok(())
}

pub fn validate_lobby_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Lobby name cannot be empty".to_string());
    }
    if name.len() > MAX_LOBBY_NAME_LENGTH {
        return Err(format!(
            "Lobby name cannot exceed {MAX_LOBBY_NAME_LENGTH} characters"
        ));
    }
    if name
        .chars()
        .any(|c| c.is_control() || (c.is_whitespace() && c != ' '))
    {
        return Err("Lobby name contains disallowed characters".to_string());
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_DISPLAY_NAME_LENGTH {
        return Err(format!(
            "Display name must be 1-{MAX_DISPLAY_NAME_LENGTH} characters"
        ));
    }
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() != name.len() {
        return Err("Display name cannot start or end with whitespace".to_string());
    }
    for ch in name.chars() {
        if ch == ' ' {
            continue;
        }
        if ch.is_whitespace() {
            return Err("Display name contains disallowed whitespace".to_string());
        }
        if !(ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '#') {
            return Err(format!("Display name contains disallowed character '{ch}'"));
        }
    }
    Ok(())
}

pub fn validate_turn_timer(seconds: u32) -> Result<(), String> {
    if !(TURN_TIMER_MIN_SECONDS..=TURN_TIMER_MAX_SECONDS).contains(&seconds) {
        return Err(format!(
            "Turn timer must be {TURN_TIMER_MIN_SECONDS}-{TURN_TIMER_MAX_SECONDS} seconds"
        ));
    }
    Ok(())
}

pub fn validate_max_players(game_type: GameType, max_players: u8) -> Result<(), String> {
    if !game_type.allows_capacity(max_players) {
        return Err(format!(
            "{game_type} supports {}-{} players",
            game_type.min_players(),
            game_type.max_players()
        ));
    }
    Ok(())
}

/// Escape HTML-sensitive characters, then truncate to the chat limit on a
/// character boundary. The length cap applies after escaping.
pub fn sanitize_chat_message(message: &str) -> Result<String, String> {
    if message.trim().is_empty() {
        return Err("Chat message cannot be empty".to_string());
    }
    let mut escaped = String::with_capacity(message.len());
    for ch in message.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c if c.is_control() && c != '\n' => {}
            c => escaped.push(c),
        }
    }
    if escaped.chars().count() > MAX_CHAT_MESSAGE_LENGTH {
        escaped = escaped.chars().take(MAX_CHAT_MESSAGE_LENGTH).collect();
    }
    Ok(escaped)
}
