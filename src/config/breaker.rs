//! Circuit breaker defaults, applied to every dependency's breaker.

use confique::Config;

#[derive(Debug, Config, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before a breaker opens
    #[config(env = "CAP_BREAKER_FAILURE_THRESHOLD", default = 5)]
    pub failure_threshold: u32,

    /// Seconds an open breaker waits before probing recovery
    #[config(env = "CAP_BREAKER_RECOVERY_TIMEOUT", default = 60)]
    pub recovery_timeout: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: 60,
        }
    }
}
