//! Observer sink for telemetry events and structured logging.
//!
//! Components receive an explicit `Arc<dyn TelemetrySink>` instead of
//! reaching for globals; the default sink forwards to `tracing`.

use std::sync::Arc;
use std::sync::Mutex;

/// Level for sink-routed log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// The two methods the core requires from its observer.
pub trait TelemetrySink: Send + Sync {
    /// Emit a named telemetry event with structured fields.
    fn emit(&self, event: &str, fields: serde_json::Value);

    /// Route a log line through the sink.
    fn log(&self, level: LogLevel, msg: &str, fields: serde_json::Value);
}

/// Default sink: telemetry and logs flow into `tracing`.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: &str, fields: serde_json::Value) {
        tracing::info!(target: "telemetry", event, %fields, "telemetry event");
    }

    fn log(&self, level: LogLevel, msg: &str, fields: serde_json::Value) {
        match level {
            LogLevel::Debug => tracing::debug!(%fields, "{msg}"),
            LogLevel::Info => tracing::info!(%fields, "{msg}"),
            LogLevel::Warn => tracing::warn!(%fields, "{msg}"),
            LogLevel::Error => tracing::error!(%fields, "{msg}"),
        }
    }
}

/// Capturing sink for tests and assertions.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().expect("telemetry lock").clone()
    }

    pub fn count_of(&self, event: &str) -> usize {
        self.events
            .lock()
            .expect("telemetry lock")
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, event: &str, fields: serde_json::Value) {
        self.events
            .lock()
            .expect("telemetry lock")
            .push((event.to_string(), fields));
    }

    fn log(&self, _level: LogLevel, _msg: &str, _fields: serde_json::Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_captures_events() {
        let sink = RecordingTelemetry::new();
        sink.emit("move_apply_timeout", serde_json::json!({ "ms": 612 }));
        sink.emit("lobby_join_retry", serde_json::json!({ "attempt": 2 }));
        sink.emit("move_apply_timeout", serde_json::json!({ "ms": 714 }));

        assert_eq!(sink.count_of("move_apply_timeout"), 2);
        assert_eq!(sink.count_of("lobby_join_retry"), 1);
        assert_eq!(sink.events().len(), 3);
    }
}
