//! Lobby registry operations: create, join, leave, list, add-bot, and
//! password management. Every mutation re-checks the registry
//! invariants (capacity, creator rights, one open game) and publishes
//! the resulting roster to the room.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::{GameServer, ServiceError};
use crate::identity::display_name_suffix;
use crate::protocol::{
    lobby_codes, validation, BotDifficulty, ErrorCode, GameStatus, GameType, LobbyCode,
    LobbySnapshot, LobbySummary, MemberInfo, Principal, ServerMessage,
};
use crate::storage::{BotRecord, GameRecord, LobbyRecord, MembershipRecord, UserRecord};

/// Parameters of `POST /lobby`.
#[derive(Debug, Clone)]
pub struct CreateLobbyParams {
    pub name: String,
    pub game_type: GameType,
    pub max_players: u8,
    pub turn_timer_seconds: u32,
    pub password: Option<String>,
    /// Explicit code; generated when absent.
    pub code: Option<LobbyCode>,
}

/// Result of a successful HTTP join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub lobby: LobbyRecord,
    pub member: MembershipRecord,
    pub game: Option<GameRecord>,
}

const BOT_NAMES: &[&str] = &[
    "Rusty", "Clanker", "Gizmo", "Sprocket", "Widget", "Cog", "Bolt", "Ratchet",
];

fn hash_password(password: &str) -> String {
    let salt: String = (0..8)
        .map(|_| fastrand::alphanumeric())
        .collect();
    let digest = Sha256::digest(format!("{salt}{password}").as_bytes());
    format!("{salt}${digest:x}")
}

fn verify_password(hash: &str, password: &str) -> bool {
    let Some((salt, expected)) = hash.split_once('$') else {
        return false;
    };
    let digest = Sha256::digest(format!("{salt}{password}").as_bytes());
    format!("{digest:x}") == expected
}

impl GameServer {
    pub async fn create_lobby(
        &self,
        creator: &Principal,
        params: CreateLobbyParams,
    ) -> Result<LobbyRecord, ServiceError> {
        validation::validate_lobby_name(&params.name)
            .map_err(|reason| ServiceError::new(ErrorCode::JoinLobbyError, reason))?;
        validation::validate_turn_timer(params.turn_timer_seconds)
            .map_err(|reason| ServiceError::new(ErrorCode::JoinLobbyError, reason))?;
        validation::validate_max_players(params.game_type, params.max_players)
            .map_err(|reason| ServiceError::new(ErrorCode::JoinLobbyError, reason))?;

        // Registered and guest users may create lobbies; bots may not.
        if creator.is_bot {
            return Err(ServiceError::from_code(ErrorCode::LobbyAccessDenied));
        }

        let password_hash = params
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(hash_password);

        // Up to a few attempts on generated-code collisions.
        let explicit_code = params.code.is_some();
        let mut attempts = 0;
        loop {
            let code = match &params.code {
                Some(code) => {
                    let code = code.to_uppercase();
                    validation::validate_lobby_code(&code)
                        .map_err(|reason| ServiceError::new(ErrorCode::InvalidLobbyCode, reason))?;
                    code
                }
                None => lobby_codes::generate_lobby_code(),
            };

            let lobby = LobbyRecord {
                code: code.clone(),
                name: params.name.clone(),
                game_type: params.game_type,
                creator_id: creator.id.clone(),
                max_players: params.max_players,
                turn_timer_seconds: params.turn_timer_seconds,
                password_hash: password_hash.clone(),
                is_active: true,
                created_at: Utc::now(),
            };
            match self.store().create_lobby(lobby.clone()).await {
                Ok(()) => {
                    tracing::info!(
                        code = %lobby.code,
                        game_type = %lobby.game_type,
                        creator = %creator.id,
                        "Lobby created"
                    );
                    return Ok(lobby);
                }
                Err(_) if !explicit_code && attempts < 4 => {
                    attempts += 1;
                }
                Err(err) => {
                    return Err(if explicit_code {
                        ServiceError::new(
                            ErrorCode::JoinLobbyError,
                            format!("lobby code already in use: {err}"),
                        )
                    } else {
                        ServiceError::internal(err)
                    });
                }
            }
        }
    }

    /// HTTP-level join: creates the membership row that later authorizes
    /// the transport's `join-lobby` subscription.
    pub async fn join_lobby(
        &self,
        code: &str,
        principal: &Principal,
        password: Option<&str>,
    ) -> Result<JoinOutcome, ServiceError> {
        validation::validate_lobby_code(code)
            .map_err(|reason| ServiceError::new(ErrorCode::InvalidLobbyCode, reason))?;
        let lobby = self.active_lobby(code).await?;

        // Rejoin is idempotent: an existing member just comes back.
        if let Some(member) = self
            .store()
            .get_member(code, &principal.id)
            .await
            .map_err(ServiceError::internal)?
        {
            let _ = self
                .store()
                .set_member_connected(code, &principal.id, true)
                .await;
            let game = self
                .store()
                .get_open_game(code)
                .await
                .map_err(ServiceError::internal)?;
            return Ok(JoinOutcome {
                lobby,
                member,
                game,
            });
        }

        if lobby.creator_id != principal.id {
            if let Some(hash) = &lobby.password_hash {
                let presented = password.unwrap_or("");
                if !verify_password(hash, presented) {
                    return Err(ServiceError::new(
                        ErrorCode::JoinLobbyError,
                        "Incorrect lobby password",
                    ));
                }
            }
        }

        let members = self
            .store()
            .get_members(code)
            .await
            .map_err(ServiceError::internal)?;
        if members.len() >= lobby.max_players as usize {
            return Err(ServiceError::from_code(ErrorCode::LobbyFull));
        }
        let open_game = self
            .store()
            .get_open_game(code)
            .await
            .map_err(ServiceError::internal)?;
        if open_game
            .as_ref()
            .is_some_and(|g| g.status == GameStatus::Playing)
        {
            return Err(ServiceError::new(
                ErrorCode::JoinLobbyError,
                "The game is already in progress",
            ));
        }

        // Display names are unique per lobby; collisions get a
        // deterministic suffix derived from the principal id.
        let name_taken = members
            .iter()
            .any(|m| m.display_name.eq_ignore_ascii_case(&principal.display_name));
        let display_name = if name_taken {
            format!(
                "{}#{}",
                principal.display_name,
                display_name_suffix(&principal.id)
            )
        } else {
            principal.display_name.clone()
        };

        let added = self
            .store()
            .add_member(code, &principal.id, &display_name, principal.is_bot)
            .await
            .map_err(ServiceError::internal)?;
        if !added {
            return Err(ServiceError::from_code(ErrorCode::JoinLobbyError));
        }
        let member = self
            .store()
            .get_member(code, &principal.id)
            .await
            .map_err(ServiceError::internal)?
            .ok_or_else(|| ServiceError::from_code(ErrorCode::InternalError))?;

        // Materialize the lobby's waiting game on first join.
        let game = Some(self.ensure_open_game(&lobby).await?);

        self.events().publish(
            code,
            ServerMessage::PlayerJoined {
                lobby_code: code.to_string(),
                member: member_info(&member),
            },
        );
        self.publish_lobby_update(&lobby).await;

        tracing::info!(code, principal = %principal.id, "Player joined lobby");
        Ok(JoinOutcome {
            lobby,
            member,
            game,
        })
    }

    /// Explicit leave. The creator leaving closes the lobby.
    pub async fn leave_lobby(
        self: &Arc<Self>,
        code: &str,
        principal_id: &str,
    ) -> Result<(), ServiceError> {
        let lobby = self.active_lobby(code).await?;

        if lobby.creator_id == principal_id {
            return self.close_lobby(&lobby, "creator left").await;
        }

        let removed = self
            .store()
            .remove_member(code, principal_id)
            .await
            .map_err(ServiceError::internal)?;
        let Some(removed) = removed else {
            return Ok(());
        };

        self.events().publish(
            code,
            ServerMessage::PlayerLeft {
                lobby_code: code.to_string(),
                principal_id: principal_id.to_string(),
                display_name: removed.display_name.clone(),
            },
        );
        self.publish_lobby_update(&lobby).await;

        // Ending below the minimum ends the game.
        if let Some(game) = self
            .store()
            .get_open_game(code)
            .await
            .map_err(ServiceError::internal)?
        {
            let members = self
                .store()
                .get_members(code)
                .await
                .map_err(ServiceError::internal)?;
            let min = lobby.game_type.min_players() as usize;
            if members.len() < min {
                if game.status == GameStatus::Playing {
                    self.abandon_game(&game, "not enough players remaining")
                        .await;
                } else {
                    // A waiting game is rebuilt from the roster at start.
                    let _ = self
                        .store()
                        .update_game(&game.id, GameStatus::Abandoned, game.state.clone(), None)
                        .await;
                }
            } else if game.status == GameStatus::Playing {
                self.advance_turn_if_current(&game.id, principal_id).await;
            }
        }

        tracing::info!(code, principal = %principal_id, "Player left lobby");
        Ok(())
    }

    /// Close a lobby entirely: abandon any open game, cascade the
    /// registry rows, and drop the room channel.
    pub(super) async fn close_lobby(
        self: &Arc<Self>,
        lobby: &LobbyRecord,
        reason: &str,
    ) -> Result<(), ServiceError> {
        if let Some(game) = self
            .store()
            .get_open_game(&lobby.code)
            .await
            .map_err(ServiceError::internal)?
        {
            self.abandon_game(&game, reason).await;
        }
        self.store()
            .deactivate_lobby(&lobby.code)
            .await
            .map_err(ServiceError::internal)?;
        self.events().drop_room(&lobby.code);
        tracing::info!(code = %lobby.code, reason, "Lobby closed");
        Ok(())
    }

    /// Creator-only: seat a bot while the game is still waiting.
    pub async fn add_bot(
        &self,
        code: &str,
        requester_id: &str,
        difficulty: BotDifficulty,
    ) -> Result<MemberInfo, ServiceError> {
        let lobby = self.active_lobby(code).await?;
        if lobby.creator_id != requester_id {
            return Err(ServiceError::from_code(ErrorCode::NotCreator));
        }
        if let Some(game) = self
            .store()
            .get_open_game(code)
            .await
            .map_err(ServiceError::internal)?
        {
            if game.status != GameStatus::Waiting {
                return Err(ServiceError::new(
                    ErrorCode::GameNotPlaying,
                    "Bots can only be added before the game starts",
                ));
            }
        }
        let members = self
            .store()
            .get_members(code)
            .await
            .map_err(ServiceError::internal)?;
        if members.len() >= lobby.max_players as usize {
            return Err(ServiceError::from_code(ErrorCode::LobbyFull));
        }

        let bot_id = format!("bot-{}", uuid::Uuid::new_v4().simple());
        let base_name = BOT_NAMES[fastrand::usize(..BOT_NAMES.len())];
        let mut display_name = format!("{base_name} (bot)");
        if members
            .iter()
            .any(|m| m.display_name.eq_ignore_ascii_case(&display_name))
        {
            display_name = format!("{base_name}#{} (bot)", display_name_suffix(&bot_id));
        }

        self.store()
            .upsert_user(UserRecord {
                id: bot_id.clone(),
                username: display_name.clone(),
                is_guest: false,
                last_active_at: Utc::now(),
            })
            .await
            .map_err(ServiceError::internal)?;
        self.store()
            .upsert_bot(BotRecord {
                user_id: bot_id.clone(),
                difficulty,
                bot_type: lobby.game_type,
            })
            .await
            .map_err(ServiceError::internal)?;
        self.store()
            .add_member(code, &bot_id, &display_name, true)
            .await
            .map_err(ServiceError::internal)?;

        let member = self
            .store()
            .get_member(code, &bot_id)
            .await
            .map_err(ServiceError::internal)?
            .ok_or_else(|| ServiceError::from_code(ErrorCode::InternalError))?;

        self.events().publish(
            code,
            ServerMessage::PlayerJoined {
                lobby_code: code.to_string(),
                member: member_info(&member),
            },
        );
        self.publish_lobby_update(&lobby).await;

        tracing::info!(code, bot_id = %bot_id, ?difficulty, "Bot added to lobby");
        Ok(member_info(&member))
    }

    /// Creator-only password change. `None` clears the password.
    pub async fn set_lobby_password(
        &self,
        code: &str,
        requester_id: &str,
        password: Option<&str>,
    ) -> Result<(), ServiceError> {
        let lobby = self.active_lobby(code).await?;
        if lobby.creator_id != requester_id {
            return Err(ServiceError::from_code(ErrorCode::NotCreator));
        }
        let hash = password.filter(|p| !p.is_empty()).map(hash_password);
        self.store()
            .set_lobby_password_hash(code, hash)
            .await
            .map_err(ServiceError::internal)?;
        Ok(())
    }

    pub async fn list_lobbies(
        &self,
        game_type: Option<GameType>,
    ) -> Result<Vec<LobbySummary>, ServiceError> {
        let lobbies = self
            .store()
            .list_active_lobbies(game_type)
            .await
            .map_err(ServiceError::internal)?;
        Ok(lobbies
            .into_iter()
            .map(|(lobby, player_count)| LobbySummary {
                code: lobby.code,
                name: lobby.name,
                game_type: lobby.game_type,
                player_count,
                max_players: lobby.max_players,
                has_password: lobby.password_hash.is_some(),
                turn_timer_seconds: lobby.turn_timer_seconds,
                created_at: lobby.created_at,
            })
            .collect())
    }

    /// Whether the principal currently holds a seat in the lobby.
    pub async fn is_member(&self, code: &str, principal_id: &str) -> bool {
        matches!(
            self.store().get_member(code, principal_id).await,
            Ok(Some(_))
        )
    }

    pub(super) async fn active_lobby(&self, code: &str) -> Result<LobbyRecord, ServiceError> {
        let lobby = self
            .store()
            .get_lobby(code)
            .await
            .map_err(ServiceError::internal)?;
        match lobby {
            Some(lobby) if lobby.is_active => Ok(lobby),
            _ => Err(ServiceError::from_code(ErrorCode::LobbyNotFound)),
        }
    }

    pub async fn lobby_snapshot(&self, code: &str) -> Result<LobbySnapshot, ServiceError> {
        let lobby = self.active_lobby(code).await?;
        let members = self
            .store()
            .get_members(code)
            .await
            .map_err(ServiceError::internal)?;
        Ok(snapshot_of(&lobby, &members))
    }

    pub(super) async fn publish_lobby_update(&self, lobby: &LobbyRecord) {
        match self.store().get_members(&lobby.code).await {
            Ok(members) => {
                self.events().publish(
                    &lobby.code,
                    ServerMessage::LobbyUpdate(Box::new(snapshot_of(lobby, &members))),
                );
            }
            Err(err) => tracing::warn!(%err, code = %lobby.code, "Failed to publish lobby update"),
        }
    }
}

pub(super) fn member_info(member: &MembershipRecord) -> MemberInfo {
    MemberInfo {
        principal_id: member.principal_id.clone(),
        display_name: member.display_name.clone(),
        seat_index: member.seat_index,
        is_connected: member.is_connected,
        is_bot: member.is_bot,
        score: member.score,
    }
}

fn snapshot_of(lobby: &LobbyRecord, members: &[MembershipRecord]) -> LobbySnapshot {
    LobbySnapshot {
        code: lobby.code.clone(),
        name: lobby.name.clone(),
        game_type: lobby.game_type,
        creator_id: lobby.creator_id.clone(),
        max_players: lobby.max_players,
        turn_timer_seconds: lobby.turn_timer_seconds,
        members: members.iter().map(member_info).collect(),
    }
}
