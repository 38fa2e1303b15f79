//! Environment-driven tunables for the retry/restart state machine (§6
//! "Environment flags", §10.3), following the corpus's direct
//! `std::env::var().ok().and_then(...)` idiom rather than a config crate.

use std::time::Duration;

/// Retry/restart timing, all overridable via environment variables with
/// the defaults from §4.1.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Quick retries attempted while the process is alive, before
    /// escalating to a restart (default 2).
    pub quick_retries: u32,
    /// Delay between quick retries (default 500ms).
    pub quick_retry_delay: Duration,
    /// Delay after a successful restart before the final retry (default 2s).
    pub post_restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            quick_retries: 2,
            quick_retry_delay: Duration::from_millis(500),
            post_restart_delay: Duration::from_secs(2),
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl SupervisorConfig {
    /// Build from environment variables, falling back to defaults for any
    /// that are unset or unparseable: `QUICK_RETRIES`, `QUICK_RETRY_DELAY_MS`,
    /// `POST_RESTART_DELAY_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            quick_retries: env_u32("QUICK_RETRIES", default.quick_retries),
            quick_retry_delay: env_millis("QUICK_RETRY_DELAY_MS", default.quick_retry_delay),
            post_restart_delay: env_millis("POST_RESTART_DELAY_MS", default.post_restart_delay),
        }
    }
}
