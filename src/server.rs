use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::events::EventBus;
use crate::identity::IdentityResolver;
use crate::protocol::{ErrorCode, ErrorPayload, GameId, LobbyCode, PrincipalId};
use crate::rate_limit::RateLimitConfig;
use crate::reliability::{ReliabilityConfig, ReliabilityEvaluator};
use crate::retry::RetryPolicy;
use crate::storage::{create_store, Store, StoreConfig};
use crate::telemetry::TelemetrySink;

mod actions;
mod bot_executor;
mod disconnect_sync;
mod lobby_service;
mod match_runtime;
mod turn_timer;

pub use lobby_service::{CreateLobbyParams, JoinOutcome};
pub use match_runtime::MoveOutcome;

/// Error returned by lobby and match operations. Carries the stable
/// wire code; transports decide how to render it.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.description())
    }

    /// Persistence and other internal errors are never leaked raw.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "Internal error surfaced to client as INTERNAL_ERROR");
        Self::from_code(ErrorCode::InternalError)
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code, self.message.clone())
    }
}

/// Runtime knobs for the realtime core, resolved from configuration.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Grace window before an abrupt disconnect is treated as a leave.
    pub disconnect_grace: Duration,
    /// One short re-check before denying `join-lobby` to a guest whose
    /// HTTP join may still be committing. Bounded at 500ms total.
    pub guest_join_recheck: Duration,
    /// Retry policy for persistence writes.
    pub retry_policy: RetryPolicy,
    /// Per-socket op budget.
    pub rate_limit: RateLimitConfig,
    /// Outbound event queue depth per subscriber.
    pub event_queue_capacity: usize,
    /// Maximum accepted client frame size.
    pub max_message_size: usize,
    /// Hard deadline for the authentication handshake.
    pub auth_timeout: Duration,
    /// Hard auth failures tolerated before the connection is closed.
    pub max_auth_failures: u32,
    /// Interval of the background maintenance task.
    pub cleanup_interval: Duration,
    /// Active lobbies with no members older than this are closed.
    pub empty_lobby_timeout: Duration,
    /// Pause between bot actions so clients can animate them.
    pub bot_action_delay: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            disconnect_grace: Duration::from_secs(10),
            guest_join_recheck: Duration::from_millis(250),
            retry_policy: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            event_queue_capacity: 64,
            max_message_size: 64 * 1024,
            auth_timeout: Duration::from_secs(180),
            max_auth_failures: 3,
            cleanup_interval: Duration::from_secs(60),
            empty_lobby_timeout: Duration::from_secs(3600),
            bot_action_delay: Duration::ZERO,
        }
    }
}

/// Handle of an armed turn timer. The spawned task captures the game's
/// `updated_at` at arming time and only fires if the game has not moved
/// since.
struct TurnTimerHandle {
    task: JoinHandle<()>,
}

struct DisconnectJob {
    task: JoinHandle<()>,
}

/// The authoritative game server: lobby registry, match runtime, event
/// fan-out, timers, bots, and disconnect handling behind one handle.
pub struct GameServer {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    telemetry: Arc<dyn TelemetrySink>,
    reliability: Arc<ReliabilityEvaluator>,
    identity: Arc<IdentityResolver>,
    settings: ServerSettings,
    /// Single logical writer per game.
    game_locks: DashMap<GameId, Arc<Mutex<()>>>,
    turn_timers: DashMap<GameId, TurnTimerHandle>,
    disconnect_jobs: DashMap<(LobbyCode, PrincipalId), DisconnectJob>,
    /// Games with a bot loop currently running.
    bot_loops: DashMap<GameId, ()>,
    /// Live socket count per (lobby, principal).
    presence: DashMap<(LobbyCode, PrincipalId), usize>,
    shutdown: CancellationToken,
}

impl GameServer {
    pub fn new(
        settings: ServerSettings,
        reliability_config: ReliabilityConfig,
        signing_secret: impl AsRef<[u8]>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Arc<Self> {
        let store: Arc<dyn Store> = Arc::from(create_store(StoreConfig::InMemory));
        let reliability =
            ReliabilityEvaluator::new(reliability_config, store.clone(), telemetry.clone());
        let identity = Arc::new(IdentityResolver::new(signing_secret, store.clone()));
        let shutdown = CancellationToken::new();
        reliability.spawn(shutdown.clone());

        Arc::new(Self {
            store,
            events: Arc::new(EventBus::new()),
            telemetry,
            reliability,
            identity,
            settings,
            game_locks: DashMap::new(),
            turn_timers: DashMap::new(),
            disconnect_jobs: DashMap::new(),
            bot_loops: DashMap::new(),
            presence: DashMap::new(),
            shutdown,
        })
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    pub fn reliability(&self) -> &Arc<ReliabilityEvaluator> {
        &self.reliability
    }

    pub fn identity(&self) -> &Arc<IdentityResolver> {
        &self.identity
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown: stops timers, the evaluator loop, and the
    /// maintenance task. Callers should follow up with one final
    /// `reliability().evaluate_all()` to flush pending alert state.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.turn_timers.iter() {
            entry.value().task.abort();
        }
        for entry in self.disconnect_jobs.iter() {
            entry.value().task.abort();
        }
    }

    pub(crate) fn game_lock(&self, game_id: &GameId) -> Arc<Mutex<()>> {
        self.game_locks
            .entry(*game_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Periodic maintenance: collect idle guests and close abandoned
    /// empty lobbies.
    pub async fn cleanup_task(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.shutdown.cancelled() => break,
            }

            self.identity.collect_idle_guests().await;

            let cutoff = chrono::Utc::now()
                - chrono::Duration::from_std(self.settings.empty_lobby_timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(3600));
            match self.store.list_active_lobbies(None).await {
                Ok(lobbies) => {
                    for (lobby, member_count) in lobbies {
                        if member_count == 0 && lobby.created_at < cutoff {
                            tracing::info!(code = %lobby.code, "Closing empty lobby");
                            let _ = self.store.deactivate_lobby(&lobby.code).await;
                            self.events.drop_room(&lobby.code);
                        }
                    }
                }
                Err(err) => tracing::warn!(%err, "Lobby cleanup sweep failed"),
            }
        }
    }
}
