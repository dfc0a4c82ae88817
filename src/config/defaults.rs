//! Default value functions referenced by the serde attributes.

pub fn default_port() -> u16 {
    3542
}

pub fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

pub fn default_signing_secret() -> String {
    // Development fallback; production startup refuses it.
    "dev-secret-change-me".to_string()
}

pub fn default_cors_origins() -> String {
    "*".to_string()
}

pub fn default_disconnect_grace_seconds() -> u64 {
    10
}

pub fn default_guest_join_recheck_ms() -> u64 {
    250
}

pub fn default_event_queue_capacity() -> usize {
    64
}

pub fn default_max_message_size() -> usize {
    64 * 1024
}

pub fn default_auth_timeout_secs() -> u64 {
    180
}

pub fn default_max_auth_failures() -> u32 {
    3
}

pub fn default_cleanup_interval_secs() -> u64 {
    60
}

pub fn default_empty_lobby_timeout_secs() -> u64 {
    3600
}

pub fn default_ops_per_second() -> u32 {
    10
}

pub fn default_bot_action_delay_ms() -> u64 {
    0
}

pub fn default_window_secs() -> u64 {
    300
}

pub fn default_repeat_minutes() -> i64 {
    60
}

pub fn default_move_apply_target_ms() -> u64 {
    500
}

pub fn default_move_apply_p95_threshold_ms() -> f64 {
    500.0
}

pub fn default_move_apply_min_samples() -> usize {
    5
}

pub fn default_threshold_count() -> usize {
    10
}

pub fn default_evaluation_interval_secs() -> u64 {
    30
}

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "server.log".to_string()
}

pub fn default_log_rotation() -> String {
    "daily".to_string()
}
