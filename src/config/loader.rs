//! Configuration loading: `config.json` if present, code defaults
//! otherwise, environment variables on top.

use super::types::Config;
use super::validation::validate_config_security;

const CONFIG_FILE: &str = "config.json";

/// Load configuration. Never fails: malformed files fall back to
/// defaults with an error on stderr, and security validation results
/// are logged (startup enforcement happens in `main`).
pub fn load() -> Config {
    let mut config = match std::fs::read_to_string(CONFIG_FILE) {
        Ok(raw) => match serde_json::from_str::<Config>(&raw) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Failed to parse {CONFIG_FILE}: {err}; using defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    };

    apply_env_overrides(&mut config);

    if let Err(err) = validate_config_security(&config) {
        eprintln!("Configuration security warnings:\n{err}");
    }

    config
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(port) = std::env::var("PARLOR_PORT") {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => eprintln!("Ignoring unparseable PARLOR_PORT value"),
        }
    }
    if let Ok(addr) = std::env::var("PARLOR_BIND_ADDRESS") {
        config.bind_address = addr;
    }
    if let Ok(dsn) = std::env::var("PARLOR_PERSISTENCE_DSN") {
        config.persistence_dsn = Some(dsn);
    }
    if let Ok(secret) = std::env::var("PARLOR_SIGNING_SECRET") {
        config.signing_secret = secret;
    }
    if let Ok(origins) = std::env::var("PARLOR_CORS_ORIGINS") {
        config.cors_origins = origins;
    }
    if let Ok(url) = std::env::var("PARLOR_ALERT_WEBHOOK_URL") {
        config.reliability.webhook_url = Some(url);
    }
    if let Ok(url) = std::env::var("PARLOR_RUNBOOK_BASE_URL") {
        config.reliability.runbook_base_url = Some(url);
    }
}
