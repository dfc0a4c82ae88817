//! Per-connection state machine.
//!
//! A connection moves Authenticating -> Authenticated -> InLobby and
//! accepts only the operations its state allows. The outbound pump owns
//! the socket sender; room events arrive through the bus subscription
//! channel and connection-scoped replies are pushed onto the same
//! channel so per-connection delivery stays FIFO.

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::ConnId;
use crate::protocol::{
    ClientMessage, ErrorCode, ErrorPayload, EventEnvelope, LobbyCode, Principal, ServerMessage,
};
use crate::rate_limit::TokenBucket;
use crate::server::GameServer;

fn to_frame(envelope: &EventEnvelope) -> Option<Message> {
    match serde_json::to_string(envelope) {
        Ok(json) => Some(Message::Text(Utf8Bytes::from(json))),
        Err(err) => {
            tracing::error!(%err, "Failed to serialize outbound event");
            None
        }
    }
}

pub(super) async fn handle_socket(socket: WebSocket, server: Arc<GameServer>) {
    let conn_id: ConnId = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<EventEnvelope>(server.settings().event_queue_capacity);
    let kill = CancellationToken::new();

    tracing::info!(%conn_id, "WebSocket connection established");

    // Outbound pump: FIFO delivery of everything the connection sees.
    let pump_kill = kill.clone();
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(envelope) = maybe else { break };
                    let Some(frame) = to_frame(&envelope) else { continue };
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                () = pump_kill.cancelled() => {
                    // Evicted as a slow consumer: say why, then close.
                    let goodbye = EventEnvelope::direct(ServerMessage::ServerError(
                        ErrorPayload::from_code(ErrorCode::SlowConsumer),
                    ));
                    if let Some(frame) = to_frame(&goodbye) {
                        let _ = sink.send(frame).await;
                    }
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let mut conn = Connection {
        server: server.clone(),
        conn_id,
        tx: tx.clone(),
        kill: kill.clone(),
        principal: None,
        joined: HashSet::new(),
        auth_failures: 0,
        bucket: TokenBucket::new(server.settings().rate_limit.clone()),
    };

    // Hard deadline for completing authentication (cold starts allowed
    // for, see settings).
    let auth_deadline = Instant::now() + server.settings().auth_timeout;

    loop {
        let frame = if conn.principal.is_some() {
            stream.next().await
        } else {
            tokio::select! {
                frame = stream.next() => frame,
                () = tokio::time::sleep_until(auth_deadline) => {
                    tracing::warn!(%conn_id, "Authentication timeout; closing connection");
                    conn.send_error(ErrorPayload::from_code(ErrorCode::AuthRequired));
                    break;
                }
            }
        };
        let Some(frame) = frame else { break };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(%conn_id, %err, "WebSocket read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                if text.len() > server.settings().max_message_size {
                    conn.send_error(ErrorPayload::from_code(ErrorCode::MessageTooLarge));
                    continue;
                }
                let message: ClientMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::debug!(%conn_id, %err, "Unparseable client frame");
                        conn.send_error(ErrorPayload::from_code(ErrorCode::InvalidMessage));
                        continue;
                    }
                };
                if !conn.handle_message(message).await {
                    break;
                }
            }
            Message::Close(_) => {
                tracing::info!(%conn_id, "WebSocket connection closed by peer");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                conn.send_error(ErrorPayload::from_code(ErrorCode::InvalidMessage));
            }
        }

        if kill.is_cancelled() {
            break;
        }
    }

    conn.teardown();
    // Both sender clones must drop so the pump drains and exits.
    drop(conn);
    drop(tx);
    let _ = send_task.await;
    tracing::info!(%conn_id, "WebSocket connection finished");
}

struct Connection {
    server: Arc<GameServer>,
    conn_id: ConnId,
    tx: mpsc::Sender<EventEnvelope>,
    kill: CancellationToken,
    principal: Option<Principal>,
    joined: HashSet<LobbyCode>,
    auth_failures: u32,
    bucket: TokenBucket,
}

impl Connection {
    /// Handle one parsed client message. Returns `false` to close the
    /// connection.
    async fn handle_message(&mut self, message: ClientMessage) -> bool {
        match message {
            ClientMessage::Authenticate { token } => self.handle_authenticate(&token).await,
            ClientMessage::Ping => {
                self.send_direct(ServerMessage::Pong);
                true
            }
            other => {
                let Some(principal) = self.principal.clone() else {
                    // Anything before the handshake is a protocol
                    // violation; close after telling the client why.
                    self.send_error(ErrorPayload::from_code(ErrorCode::AuthRequired));
                    return false;
                };
                self.handle_authenticated_message(&principal, other).await;
                true
            }
        }
    }

    async fn handle_authenticate(&mut self, token: &str) -> bool {
        if self.principal.is_some() {
            tracing::warn!(conn_id = %self.conn_id, "Duplicate authenticate ignored");
            return true;
        }
        match self.server.identity().resolve(token).await {
            Ok(principal) => {
                tracing::info!(
                    conn_id = %self.conn_id,
                    principal = %principal.id,
                    is_guest = principal.is_guest,
                    "Connection authenticated"
                );
                self.send_direct(ServerMessage::Authenticated {
                    principal: principal.clone(),
                });
                self.principal = Some(principal);
                true
            }
            Err(err) => {
                self.auth_failures += 1;
                self.server.reliability().record_auth_failure().await;
                tracing::warn!(
                    conn_id = %self.conn_id,
                    failures = self.auth_failures,
                    %err,
                    "Authentication failed"
                );
                self.send_error(ErrorPayload::new(err.error_code(), err.to_string()));
                if self.auth_failures >= self.server.settings().max_auth_failures {
                    // No endless retrying: the connection is done.
                    self.send_error(ErrorPayload::from_code(ErrorCode::AuthFailed));
                    return false;
                }
                true
            }
        }
    }

    async fn handle_authenticated_message(
        &mut self,
        principal: &Principal,
        message: ClientMessage,
    ) {
        match message {
            ClientMessage::JoinLobby { code } => self.handle_join_lobby(principal, &code).await,
            ClientMessage::LeaveLobby { code } => {
                if self.joined.remove(&code) {
                    self.server.events().unsubscribe(&code, &self.conn_id);
                    self.server.note_socket_left(&code, &principal.id);
                }
            }
            ClientMessage::GameAction {
                lobby_code,
                action,
                payload,
            } => {
                if !self.gate_room_op(&lobby_code) {
                    return;
                }
                if let Err(err) = self
                    .server
                    .handle_game_action(principal, &lobby_code, action, payload)
                    .await
                {
                    self.send_error(err.payload());
                }
            }
            ClientMessage::SendChatMessage {
                lobby_code,
                message,
            } => {
                if !self.gate_room_op(&lobby_code) {
                    return;
                }
                if let Err(err) = self
                    .server
                    .handle_chat_message(principal, &lobby_code, &message)
                    .await
                {
                    self.send_error(err.payload());
                }
            }
            ClientMessage::SyncState {
                lobby_code,
                last_seen_seq,
            } => {
                if !self.joined.contains(&lobby_code) {
                    self.send_error(ErrorPayload::from_code(ErrorCode::LobbyAccessDenied));
                    return;
                }
                match self.server.game_snapshot(&lobby_code).await {
                    Ok(Some(snapshot)) => {
                        let mark = self.server.events().high_water(&lobby_code);
                        let _ = self.tx.try_send(EventEnvelope::room(
                            mark,
                            ServerMessage::GameUpdate(Box::new(snapshot)),
                        ));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        self.send_error(err.payload());
                        return;
                    }
                }
                if let Some(last_seen) = last_seen_seq {
                    self.server
                        .events()
                        .replay_since(&lobby_code, &self.conn_id, last_seen);
                }
            }
            ClientMessage::Authenticate { .. } | ClientMessage::Ping => unreachable!("handled"),
        }
    }

    async fn handle_join_lobby(&mut self, principal: &Principal, code: &str) {
        if self.joined.contains(code) {
            // Single-shot per lobby; a duplicate just gets the ack again.
            let mark = self.server.events().high_water(code);
            let _ = self.tx.try_send(EventEnvelope::room(
                mark,
                ServerMessage::JoinedLobby {
                    lobby_code: code.to_string(),
                    success: true,
                },
            ));
            return;
        }

        // Membership over HTTP is a strict precondition of the room
        // subscription.
        let mut member = self.server.is_member(code, &principal.id).await;
        if !member && principal.is_guest {
            // One bounded re-check for a guest whose HTTP join may still
            // be committing.
            tokio::time::sleep(self.server.settings().guest_join_recheck).await;
            member = self.server.is_member(code, &principal.id).await;
        }
        if !member {
            self.server.reliability().record_rejoin_timeout().await;
            self.server.telemetry().emit(
                "lobby_join_denied",
                serde_json::json!({ "lobbyCode": code, "principalId": principal.id }),
            );
            self.send_error(ErrorPayload::from_code(ErrorCode::LobbyAccessDenied));
            return;
        }

        // The ack is enqueued before the subscription so it precedes
        // every room event this connection will see for the lobby.
        let mark = self.server.events().high_water(code);
        let _ = self.tx.try_send(EventEnvelope::room(
            mark,
            ServerMessage::JoinedLobby {
                lobby_code: code.to_string(),
                success: true,
            },
        ));
        self.server
            .events()
            .subscribe(code, self.conn_id, self.tx.clone(), self.kill.clone());
        self.joined.insert(code.to_string());
        self.server.note_socket_joined(code, &principal.id).await;

        tracing::info!(
            conn_id = %self.conn_id,
            principal = %principal.id,
            lobby = code,
            "Subscribed to lobby room"
        );
    }

    /// Rate-limits and gates room-scoped operations on membership of the
    /// connection's joined set.
    fn gate_room_op(&mut self, lobby_code: &str) -> bool {
        if !self.joined.contains(lobby_code) {
            self.send_error(ErrorPayload::from_code(ErrorCode::LobbyAccessDenied));
            return false;
        }
        if let Err(retry_after) = self.bucket.try_take() {
            self.send_error(
                ErrorPayload::from_code(ErrorCode::RateLimitExceeded).with_details(
                    serde_json::json!({ "retryAfterMs": retry_after.as_millis() as u64 }),
                ),
            );
            return false;
        }
        true
    }

    fn send_direct(&self, message: ServerMessage) {
        if self.tx.try_send(EventEnvelope::direct(message)).is_err() {
            tracing::warn!(conn_id = %self.conn_id, "Outbound queue full for direct message");
        }
    }

    fn send_error(&self, payload: ErrorPayload) {
        self.send_direct(ServerMessage::ServerError(payload));
    }

    /// Connection closed: unsubscribe everywhere and let the
    /// disconnect-sync manager debounce membership cleanup.
    fn teardown(&mut self) {
        let Some(principal) = self.principal.clone() else {
            return;
        };
        for code in self.joined.drain() {
            self.server.events().unsubscribe(&code, &self.conn_id);
            self.server.note_socket_left(&code, &principal.id);
        }
    }
}
