use std::time::Duration;

use ladder_types::{DEFAULT_START_RATING, DEFAULT_THREAD_CLEANUP_SECS};

/// Tunables shared by the engine and its sweeper.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rating of a record created on first roster access.
    pub default_rating: f64,
    /// How long a targeted opponent has to answer.
    pub pending_timeout: Duration,
    pub sweep_interval: Duration,
    /// Thread cleanup delay for categories that never set one.
    pub default_thread_cleanup: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_rating: DEFAULT_START_RATING,
            pending_timeout: Duration::from_secs(6 * 3600),
            sweep_interval: Duration::from_secs(30),
            default_thread_cleanup: Duration::from_secs(DEFAULT_THREAD_CLEANUP_SECS),
        }
    }
}
