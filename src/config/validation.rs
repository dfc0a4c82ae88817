//! Configuration security validation.

use super::defaults::default_signing_secret;
use super::types::Config;

/// Whether this deployment declares itself production (`PARLOR_ENV`).
pub fn is_production_mode() -> bool {
    std::env::var("PARLOR_ENV")
        .map(|v| v.eq_ignore_ascii_case("production") || v.eq_ignore_ascii_case("prod"))
        .unwrap_or(false)
}

/// Validate security-sensitive settings. In production a missing or
/// default signing secret is fatal; elsewhere findings are warnings.
pub fn validate_config_security(config: &Config) -> Result<(), String> {
    let mut findings = Vec::new();

    if config.signing_secret == default_signing_secret() || config.signing_secret.is_empty() {
        findings.push(
            "signing_secret is the development default; set PARLOR_SIGNING_SECRET".to_string(),
        );
    } else if config.signing_secret.len() < 16 {
        findings.push("signing_secret is shorter than 16 bytes".to_string());
    }

    if let Some(url) = &config.reliability.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            findings.push(format!("reliability.webhook_url is not an HTTP(S) URL: {url}"));
        }
    }

    if is_production_mode() && config.cors_origins == "*" {
        findings.push("cors_origins is `*` in production".to_string());
    }

    if findings.is_empty() {
        return Ok(());
    }
    let report = findings.join("\n");
    if is_production_mode() {
        Err(report)
    } else {
        eprintln!("Configuration warnings (non-fatal outside production):\n{report}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_secret_is_flagged_outside_production() {
        // Outside production the default secret only warns.
        let config = Config::default();
        assert!(validate_config_security(&config).is_ok());
    }

    #[test]
    fn strong_config_passes() {
        let config = Config {
            signing_secret: "a-long-and-random-secret-value".to_string(),
            ..Config::default()
        };
        assert!(validate_config_security(&config).is_ok());
    }

    #[test]
    fn malformed_webhook_is_flagged() {
        let mut config = Config {
            signing_secret: "a-long-and-random-secret-value".to_string(),
            ..Config::default()
        };
        config.reliability.webhook_url = Some("not-a-url".to_string());
        // Non-production: warning only, still Ok.
        assert!(validate_config_security(&config).is_ok());
    }
}
