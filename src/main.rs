#![cfg_attr(not(test), deny(clippy::panic))]

use axum::Router;
use clap::Parser;
use parlor_server::config;
use parlor_server::logging;
use parlor_server::rate_limit::RateLimitConfig;
use parlor_server::reliability::ReliabilityConfig;
use parlor_server::retry::RetryPolicy;
use parlor_server::server::{GameServer, ServerSettings};
use parlor_server::telemetry::{TelemetrySink, TracingTelemetry};
use parlor_server::{api, websocket};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;

/// Parlor -- authoritative realtime server for short turn-based board games
#[derive(Parser, Debug)]
#[command(name = "parlor-server")]
#[command(about = "An authoritative realtime backend for turn-based board games over WebSocket")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config.json if present, defaults otherwise, env overrides on top.
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let validation_result = config::validate_config_security(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Bind: {}:{}", cfg.bind_address, cfg.port);
                println!("  Storage backend: InMemory");
                println!(
                    "  Persistence DSN: {}",
                    cfg.persistence_dsn.as_deref().unwrap_or("(none)")
                );
                println!(
                    "  Disconnect grace: {}s",
                    cfg.server.disconnect_grace_seconds
                );
                println!(
                    "  Move apply target: {}ms",
                    cfg.reliability.move_apply_target_ms
                );
                println!(
                    "  Alert webhook: {}",
                    cfg.reliability.webhook_url.as_deref().unwrap_or("(none)")
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result.map_err(|e| anyhow::anyhow!("configuration rejected: {e}"))?;

    logging::init_with_config(&cfg.logging);

    if let Some(dsn) = &cfg.persistence_dsn {
        tracing::info!(
            dsn_scheme = dsn.split(':').next().unwrap_or("unknown"),
            "Persistence DSN configured; bundled backend is in-memory"
        );
    }

    let settings = ServerSettings {
        disconnect_grace: Duration::from_secs(cfg.server.disconnect_grace_seconds),
        guest_join_recheck: Duration::from_millis(cfg.server.guest_join_recheck_ms.min(500)),
        retry_policy: RetryPolicy::default(),
        rate_limit: RateLimitConfig {
            burst: cfg.server.ops_per_second,
            refill_per_second: f64::from(cfg.server.ops_per_second),
        },
        event_queue_capacity: cfg.server.event_queue_capacity,
        max_message_size: cfg.server.max_message_size,
        auth_timeout: Duration::from_secs(cfg.server.auth_timeout_secs),
        max_auth_failures: cfg.server.max_auth_failures,
        cleanup_interval: Duration::from_secs(cfg.server.cleanup_interval_secs),
        empty_lobby_timeout: Duration::from_secs(cfg.server.empty_lobby_timeout_secs),
        bot_action_delay: Duration::from_millis(cfg.server.bot_action_delay_ms),
    };

    let reliability = ReliabilityConfig {
        window: Duration::from_secs(cfg.reliability.window_secs),
        repeat_minutes: cfg.reliability.repeat_minutes,
        move_apply_target_ms: cfg.reliability.move_apply_target_ms,
        move_apply_p95_threshold_ms: cfg.reliability.move_apply_p95_threshold_ms,
        move_apply_min_samples: cfg.reliability.move_apply_min_samples,
        rejoin_timeout_threshold: cfg.reliability.rejoin_timeout_threshold,
        auth_failure_threshold: cfg.reliability.auth_failure_threshold,
        webhook_url: cfg.reliability.webhook_url.clone(),
        runbook_base_url: cfg.reliability.runbook_base_url.clone(),
        evaluation_interval: Duration::from_secs(cfg.reliability.evaluation_interval_secs),
    };

    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetry);
    let game_server = GameServer::new(settings, reliability, &cfg.signing_secret, telemetry);

    let cleanup_server = game_server.clone();
    tokio::spawn(async move {
        cleanup_server.cleanup_task().await;
    });

    use tower_http::cors::{Any, CorsLayer};
    let cors = if cfg.cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cfg
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!("No valid CORS origins configured, using permissive CORS");
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    let router = Router::new()
        .merge(api::create_router())
        .merge(websocket::create_router())
        .fallback(|| async {
            "Parlor Server. Use /ws for the realtime protocol, /lobby for lobby management."
        })
        .with_state(game_server.clone())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", cfg.bind_address, cfg.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        cors_origins = %cfg.cors_origins,
        "Server started - realtime protocol: /ws, lobby API: /lobby"
    );

    let shutdown_server = game_server.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            shutdown_server.begin_shutdown();
            // Final evaluation pass so pending alert state is persisted
            // and resolve notifications go out before exit.
            shutdown_server.reliability().evaluate_all().await;
        })
        .await?;

    Ok(())
}
