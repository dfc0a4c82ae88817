//! Per-socket token bucket limiting client operations.
//!
//! Each connection gets its own bucket; game actions, chat, and typing
//! all draw from it. Default allows 10 ops/s with a burst of the same
//! size.

use tokio::time::{Duration, Instant};

/// Token bucket configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum burst size (bucket capacity).
    pub burst: u32,
    /// Tokens replenished per second.
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 10,
            refill_per_second: 10.0,
        }
    }
}

/// A token bucket owned by a single connection task; no locking needed.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: f64::from(config.burst),
            config,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.config.refill_per_second)
            .min(f64::from(self.config.burst));
    }

    /// Take one token; `Err` carries the wait until a token is available.
    pub fn try_take(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(
                deficit / self.config.refill_per_second,
            ))
        }
    }
}
