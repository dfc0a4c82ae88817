//! Root configuration type.

use serde::{Deserialize, Serialize};

use super::defaults::{
    default_auth_timeout_secs, default_bind_address, default_bot_action_delay_ms,
    default_cleanup_interval_secs, default_cors_origins, default_disconnect_grace_seconds,
    default_empty_lobby_timeout_secs, default_evaluation_interval_secs, default_event_queue_capacity,
    default_guest_join_recheck_ms, default_max_auth_failures, default_max_message_size,
    default_move_apply_min_samples, default_move_apply_p95_threshold_ms,
    default_move_apply_target_ms, default_ops_per_second, default_port, default_repeat_minutes,
    default_signing_secret, default_threshold_count, default_window_secs,
};
use super::logging::LoggingConfig;

/// Root configuration, loaded from `config.json` with environment
/// overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port of the combined HTTP + WebSocket listener.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address of the listener.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Persistence DSN. Accepted and logged for forward compatibility;
    /// the bundled backend is in-memory.
    #[serde(default)]
    pub persistence_dsn: Option<String>,
    /// HMAC secret signing realtime and guest tokens.
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,
    /// Comma-separated CORS origins, or `*`.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    #[serde(default)]
    pub server: ServerTuning,
    #[serde(default)]
    pub reliability: ReliabilityTuning,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            persistence_dsn: None,
            signing_secret: default_signing_secret(),
            cors_origins: default_cors_origins(),
            server: ServerTuning::default(),
            reliability: ReliabilityTuning::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Realtime-core tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTuning {
    /// Grace window after an abrupt disconnect (seconds).
    #[serde(default = "default_disconnect_grace_seconds")]
    pub disconnect_grace_seconds: u64,
    /// Guest membership re-check delay during `join-lobby` (ms, <=500).
    #[serde(default = "default_guest_join_recheck_ms")]
    pub guest_join_recheck_ms: u64,
    /// Outbound event queue depth per connection.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Maximum accepted client frame size (bytes).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Handshake hard timeout (seconds); generous for cold starts.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Hard auth failures tolerated before the socket is closed.
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,
    /// Maintenance task interval (seconds).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Empty active lobbies older than this are closed (seconds).
    #[serde(default = "default_empty_lobby_timeout_secs")]
    pub empty_lobby_timeout_secs: u64,
    /// Per-socket operation budget (token bucket rate and burst).
    #[serde(default = "default_ops_per_second")]
    pub ops_per_second: u32,
    /// Pause between bot actions so clients can animate them (ms).
    #[serde(default = "default_bot_action_delay_ms")]
    pub bot_action_delay_ms: u64,
}

impl Default for ServerTuning {
    fn default() -> Self {
        Self {
            disconnect_grace_seconds: default_disconnect_grace_seconds(),
            guest_join_recheck_ms: default_guest_join_recheck_ms(),
            event_queue_capacity: default_event_queue_capacity(),
            max_message_size: default_max_message_size(),
            auth_timeout_secs: default_auth_timeout_secs(),
            max_auth_failures: default_max_auth_failures(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            empty_lobby_timeout_secs: default_empty_lobby_timeout_secs(),
            ops_per_second: default_ops_per_second(),
            bot_action_delay_ms: default_bot_action_delay_ms(),
        }
    }
}

/// Alert-rule tuning for the reliability evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityTuning {
    /// Rolling aggregation window (seconds).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Minimum gap between repeated notifications (minutes).
    #[serde(default = "default_repeat_minutes")]
    pub repeat_minutes: i64,
    /// Per-move apply-latency target (ms).
    #[serde(default = "default_move_apply_target_ms")]
    pub move_apply_target_ms: u64,
    /// p95 threshold for the latency alert rule (ms).
    #[serde(default = "default_move_apply_p95_threshold_ms")]
    pub move_apply_p95_threshold_ms: f64,
    /// Minimum samples before the latency rule may trigger.
    #[serde(default = "default_move_apply_min_samples")]
    pub move_apply_min_samples: usize,
    /// Rejoin timeouts per window before alerting.
    #[serde(default = "default_threshold_count")]
    pub rejoin_timeout_threshold: usize,
    /// Auth refresh failures per window before alerting.
    #[serde(default = "default_threshold_count")]
    pub auth_failure_threshold: usize,
    /// Webhook receiving breach/resolve notifications.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Base URL for runbook links in notifications.
    #[serde(default)]
    pub runbook_base_url: Option<String>,
    /// Rule evaluation interval (seconds).
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
}

impl Default for ReliabilityTuning {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            repeat_minutes: default_repeat_minutes(),
            move_apply_target_ms: default_move_apply_target_ms(),
            move_apply_p95_threshold_ms: default_move_apply_p95_threshold_ms(),
            move_apply_min_samples: default_move_apply_min_samples(),
            rejoin_timeout_threshold: default_threshold_count(),
            auth_failure_threshold: default_threshold_count(),
            webhook_url: None,
            runbook_base_url: None,
            evaluation_interval_secs: default_evaluation_interval_secs(),
        }
    }
}
