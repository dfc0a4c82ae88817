//! Reliability evaluator: aggregates timing samples from the match
//! runtime and the transport adapter, evaluates alert rules over a
//! rolling window, and maintains persisted alert state with debounce and
//! resolve semantics.
//!
//! If the persistence layer is unavailable the evaluator keeps running
//! state-lessly from its in-memory cache and logs a warning; it never
//! crashes the server.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hdrhistogram::Histogram;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::storage::{AlertStateRecord, Store};
use crate::telemetry::TelemetrySink;

pub const ALERT_MOVE_APPLY_TIMEOUT: &str = "move_apply_timeout";
pub const ALERT_REJOIN_TIMEOUT: &str = "rejoin_timeout";
pub const ALERT_AUTH_REFRESH_FAILURES: &str = "auth_refresh_failures";

#[derive(Debug, Clone)]
pub struct ReliabilityConfig {
    /// Rolling aggregation window.
    pub window: Duration,
    /// Minimum gap between repeated notifications for an open alert.
    pub repeat_minutes: i64,
    /// Per-move latency target; exceeding it emits telemetry immediately.
    pub move_apply_target_ms: u64,
    /// p95 threshold for the `move_apply_timeout` rule.
    pub move_apply_p95_threshold_ms: f64,
    /// Minimum samples before the latency rule may trigger.
    pub move_apply_min_samples: usize,
    /// Count threshold for rejoin timeouts over the window.
    pub rejoin_timeout_threshold: usize,
    /// Count threshold for auth refresh failures over the window.
    pub auth_failure_threshold: usize,
    /// Optional webhook receiving breach/resolve notifications.
    pub webhook_url: Option<String>,
    /// Optional runbook base URL included in notifications.
    pub runbook_base_url: Option<String>,
    /// How often the background task evaluates the rules.
    pub evaluation_interval: Duration,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            repeat_minutes: 60,
            move_apply_target_ms: 500,
            move_apply_p95_threshold_ms: 500.0,
            move_apply_min_samples: 5,
            rejoin_timeout_threshold: 10,
            auth_failure_threshold: 10,
            webhook_url: None,
            runbook_base_url: None,
            evaluation_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct SampleWindows {
    move_latencies: VecDeque<(Instant, u64)>,
    rejoin_timeouts: VecDeque<Instant>,
    auth_failures: VecDeque<Instant>,
    /// In-memory mirror of persisted alert state; authoritative when the
    /// store is down.
    alert_cache: HashMap<String, AlertStateRecord>,
}

impl SampleWindows {
    fn trim(&mut self, window: Duration) {
        let cutoff = Instant::now() - window;
        while self
            .move_latencies
            .front()
            .is_some_and(|(at, _)| *at < cutoff)
        {
            self.move_latencies.pop_front();
        }
        while self.rejoin_timeouts.front().is_some_and(|at| *at < cutoff) {
            self.rejoin_timeouts.pop_front();
        }
        while self.auth_failures.front().is_some_and(|at| *at < cutoff) {
            self.auth_failures.pop_front();
        }
    }

    fn latency_p95(&self) -> Option<f64> {
        if self.move_latencies.is_empty() {
            return None;
        }
        let mut histogram = Histogram::<u64>::new(3).ok()?;
        for (_, ms) in &self.move_latencies {
            let _ = histogram.record((*ms).max(1));
        }
        Some(histogram.value_at_quantile(0.95) as f64)
    }
}

pub struct ReliabilityEvaluator {
    config: ReliabilityConfig,
    store: Arc<dyn Store>,
    telemetry: Arc<dyn TelemetrySink>,
    windows: Mutex<SampleWindows>,
    store_degraded: AtomicBool,
    http: reqwest::Client,
}

impl ReliabilityEvaluator {
    pub fn new(
        config: ReliabilityConfig,
        store: Arc<dyn Store>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            telemetry,
            windows: Mutex::new(SampleWindows::default()),
            store_degraded: AtomicBool::new(false),
            http: reqwest::Client::new(),
        })
    }

    /// Record one end-to-end move apply latency. Exceeding the target
    /// emits `move_apply_timeout` telemetry in addition to the normal
    /// success event.
    pub async fn record_move_apply(&self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        if ms > self.config.move_apply_target_ms {
            self.telemetry.emit(
                ALERT_MOVE_APPLY_TIMEOUT,
                json!({ "ms": ms, "targetMs": self.config.move_apply_target_ms }),
            );
        }
        let mut windows = self.windows.lock().await;
        windows.move_latencies.push_back((Instant::now(), ms));
    }

    pub async fn record_rejoin_timeout(&self) {
        self.telemetry.emit(ALERT_REJOIN_TIMEOUT, json!({}));
        let mut windows = self.windows.lock().await;
        windows.rejoin_timeouts.push_back(Instant::now());
    }

    pub async fn record_auth_failure(&self) {
        let mut windows = self.windows.lock().await;
        windows.auth_failures.push_back(Instant::now());
    }

    /// Evaluate every rule once. Called periodically by [`Self::spawn`].
    pub async fn evaluate_all(&self) {
        let (p95, samples, rejoins, auth_failures) = {
            let mut windows = self.windows.lock().await;
            windows.trim(self.config.window);
            (
                windows.latency_p95(),
                windows.move_latencies.len(),
                windows.rejoin_timeouts.len(),
                windows.auth_failures.len(),
            )
        };

        let latency_breached = samples >= self.config.move_apply_min_samples
            && p95.is_some_and(|v| v > self.config.move_apply_p95_threshold_ms);
        self.evaluate_rule(
            ALERT_MOVE_APPLY_TIMEOUT,
            p95.unwrap_or(0.0),
            self.config.move_apply_p95_threshold_ms,
            latency_breached,
        )
        .await;

        self.evaluate_rule(
            ALERT_REJOIN_TIMEOUT,
            rejoins as f64,
            self.config.rejoin_timeout_threshold as f64,
            rejoins >= self.config.rejoin_timeout_threshold,
        )
        .await;

        self.evaluate_rule(
            ALERT_AUTH_REFRESH_FAILURES,
            auth_failures as f64,
            self.config.auth_failure_threshold as f64,
            auth_failures >= self.config.auth_failure_threshold,
        )
        .await;
    }

    async fn evaluate_rule(&self, key: &str, value: f64, threshold: f64, breached: bool) {
        let mut state = self.load_state(key).await;
        let now = Utc::now();

        if breached {
            state.last_value = Some(value);
            if !state.is_open {
                state.is_open = true;
                state.last_triggered_at = Some(now);
            }
            if self.should_notify(&state, now) {
                state.last_notified_at = Some(now);
                self.notify(key, "triggered", value, threshold).await;
            }
        } else if state.is_open {
            state.is_open = false;
            state.last_resolved_at = Some(now);
            state.last_value = Some(value);
            self.notify(key, "resolved", value, threshold).await;
        } else {
            return;
        }

        self.persist_state(state).await;
    }

    fn should_notify(&self, state: &AlertStateRecord, now: DateTime<Utc>) -> bool {
        match state.last_notified_at {
            None => true,
            Some(last) => now - last >= ChronoDuration::minutes(self.config.repeat_minutes),
        }
    }

    async fn load_state(&self, key: &str) -> AlertStateRecord {
        match self.store.get_alert_state(key).await {
            Ok(Some(state)) => {
                self.note_store_recovered();
                let mut windows = self.windows.lock().await;
                windows.alert_cache.insert(key.to_string(), state.clone());
                state
            }
            Ok(None) => {
                self.note_store_recovered();
                let windows = self.windows.lock().await;
                windows.alert_cache.get(key).cloned().unwrap_or_else(|| {
                    AlertStateRecord {
                        alert_key: key.to_string(),
                        ..AlertStateRecord::default()
                    }
                })
            }
            Err(err) => {
                self.note_store_degraded(&err);
                let windows = self.windows.lock().await;
                windows.alert_cache.get(key).cloned().unwrap_or_else(|| {
                    AlertStateRecord {
                        alert_key: key.to_string(),
                        ..AlertStateRecord::default()
                    }
                })
            }
        }
    }

    async fn persist_state(&self, state: AlertStateRecord) {
        {
            let mut windows = self.windows.lock().await;
            windows
                .alert_cache
                .insert(state.alert_key.clone(), state.clone());
        }
        if let Err(err) = self.store.upsert_alert_state(state).await {
            self.note_store_degraded(&err);
        } else {
            self.note_store_recovered();
        }
    }

    fn note_store_degraded(&self, err: &anyhow::Error) {
        if !self.store_degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!(%err, "Alert-state store unavailable; continuing in degraded mode");
        }
    }

    fn note_store_recovered(&self) {
        if self.store_degraded.swap(false, Ordering::SeqCst) {
            tracing::info!("Alert-state store recovered");
        }
    }

    async fn notify(&self, key: &str, status: &str, value: f64, threshold: f64) {
        let runbook_url = self
            .config
            .runbook_base_url
            .as_ref()
            .map(|base| format!("{}/{key}", base.trim_end_matches('/')));
        let payload = json!({
            "alertKey": key,
            "status": status,
            "value": value,
            "threshold": threshold,
            "at": Utc::now(),
            "runbookUrl": runbook_url,
        });
        self.telemetry
            .emit(&format!("alert_{status}"), payload.clone());

        if let Some(url) = &self.config.webhook_url {
            let request = self.http.post(url).json(&payload);
            tokio::spawn(async move {
                if let Err(err) = request.send().await {
                    tracing::warn!(%err, "Alert webhook delivery failed");
                }
            });
        }
    }

    /// Spawn the periodic evaluation task; stops when `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) {
        let evaluator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(evaluator.config.evaluation_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => evaluator.evaluate_all().await,
                    () = shutdown.cancelled() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::telemetry::RecordingTelemetry;

    fn evaluator(config: ReliabilityConfig) -> (Arc<ReliabilityEvaluator>, Arc<RecordingTelemetry>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let telemetry = RecordingTelemetry::new();
        let evaluator = ReliabilityEvaluator::new(
            config,
            store.clone() as Arc<dyn Store>,
            telemetry.clone() as Arc<dyn TelemetrySink>,
        );
        (evaluator, telemetry, store)
    }

    fn test_config() -> ReliabilityConfig {
        ReliabilityConfig {
            move_apply_min_samples: 3,
            rejoin_timeout_threshold: 2,
            auth_failure_threshold: 2,
            ..ReliabilityConfig::default()
        }
    }

    #[tokio::test]
    async fn slow_move_emits_timeout_telemetry() {
        let (evaluator, telemetry, _) = evaluator(test_config());
        evaluator
            .record_move_apply(Duration::from_millis(120))
            .await;
        evaluator
            .record_move_apply(Duration::from_millis(750))
            .await;
        assert_eq!(telemetry.count_of(ALERT_MOVE_APPLY_TIMEOUT), 1);
    }

    #[tokio::test]
    async fn breach_opens_alert_and_persists_state() {
        let (evaluator, telemetry, store) = evaluator(test_config());
        for _ in 0..5 {
            evaluator
                .record_move_apply(Duration::from_millis(900))
                .await;
        }
        evaluator.evaluate_all().await;

        let state = store
            .get_alert_state(ALERT_MOVE_APPLY_TIMEOUT)
            .await
            .unwrap()
            .expect("alert state persisted");
        assert!(state.is_open);
        assert!(state.last_triggered_at.is_some());
        assert!(state.last_notified_at.is_some());
        assert_eq!(telemetry.count_of("alert_triggered"), 1);
    }

    #[tokio::test]
    async fn debounce_suppresses_repeat_notifications() {
        let (evaluator, telemetry, _) = evaluator(test_config());
        for _ in 0..5 {
            evaluator
                .record_move_apply(Duration::from_millis(900))
                .await;
        }
        evaluator.evaluate_all().await;
        evaluator.evaluate_all().await;
        evaluator.evaluate_all().await;
        // Still one notification: repeat window is 60 minutes.
        assert_eq!(telemetry.count_of("alert_triggered"), 1);
    }

    #[tokio::test]
    async fn clearing_condition_resolves_once() {
        let config = ReliabilityConfig {
            window: Duration::from_millis(40),
            ..test_config()
        };
        let (evaluator, telemetry, store) = evaluator(config);
        for _ in 0..5 {
            evaluator
                .record_move_apply(Duration::from_millis(900))
                .await;
        }
        evaluator.evaluate_all().await;
        assert_eq!(telemetry.count_of("alert_triggered"), 1);

        // Let the window age the samples out.
        tokio::time::sleep(Duration::from_millis(60)).await;
        evaluator.evaluate_all().await;
        evaluator.evaluate_all().await;

        assert_eq!(telemetry.count_of("alert_resolved"), 1);
        let state = store
            .get_alert_state(ALERT_MOVE_APPLY_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        assert!(!state.is_open);
        assert!(state.last_resolved_at.is_some());
        // Invariant: open implies triggered-at >= resolved-at; closed here.
        assert!(state.last_triggered_at.unwrap() <= state.last_resolved_at.unwrap());
    }

    #[tokio::test]
    async fn count_rules_trigger_on_threshold() {
        let (evaluator, telemetry, store) = evaluator(test_config());
        evaluator.record_rejoin_timeout().await;
        evaluator.record_rejoin_timeout().await;
        evaluator.record_auth_failure().await;
        evaluator.evaluate_all().await;

        let rejoin = store
            .get_alert_state(ALERT_REJOIN_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        assert!(rejoin.is_open);
        // Auth failures are below threshold; no state row written.
        assert!(store
            .get_alert_state(ALERT_AUTH_REFRESH_FAILURES)
            .await
            .unwrap()
            .is_none());
        assert_eq!(telemetry.count_of(ALERT_REJOIN_TIMEOUT), 2);
    }
}
