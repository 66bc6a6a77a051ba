//! Runtime configuration, resolved once at startup from the environment.
//!
//! Blank variables count as unset. Errors name the variable, not its value.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub const ENV_RESERVE_MAX_ATTEMPTS: &str = "DISPENSARY_RESERVE_MAX_ATTEMPTS";
pub const ENV_RESERVE_BACKOFF_MS: &str = "DISPENSARY_RESERVE_BACKOFF_MS";
pub const ENV_BIND_ADDR: &str = "DISPENSARY_BIND_ADDR";

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF_MS: u64 = 2;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid {expected}")]
    Invalid { var: &'static str, expected: &'static str },

    #[error("{0} must be at least 1")]
    ZeroAttempts(&'static str),
}

/// Optimistic retry budget for a single batch reservation or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Linear: attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// One attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::from_millis(DEFAULT_BACKOFF_MS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub bind_addr: SocketAddr,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any name → value lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let max_attempts = match get(ENV_RESERVE_MAX_ATTEMPTS) {
            Some(v) => v.parse::<u32>().map_err(|_| ConfigError::Invalid {
                var: ENV_RESERVE_MAX_ATTEMPTS,
                expected: "unsigned integer",
            })?,
            None => DEFAULT_MAX_ATTEMPTS,
        };
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts(ENV_RESERVE_MAX_ATTEMPTS));
        }

        let backoff_ms = match get(ENV_RESERVE_BACKOFF_MS) {
            Some(v) => v.parse::<u64>().map_err(|_| ConfigError::Invalid {
                var: ENV_RESERVE_BACKOFF_MS,
                expected: "number of milliseconds",
            })?,
            None => DEFAULT_BACKOFF_MS,
        };

        let bind_addr = get(ENV_BIND_ADDR)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid {
                var: ENV_BIND_ADDR,
                expected: "socket address",
            })?;

        Ok(Self {
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(backoff_ms)),
            bind_addr,
        })
    }
}
