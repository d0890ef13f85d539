//! Shared configuration for Parlor.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable for a custom state directory.
pub const STATE_DIR_ENV: &str = "PARLOR_STATE_DIR";

/// Default state directory name under home.
const DEFAULT_STATE_DIR: &str = ".parlor";

static STATE_DIR_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Get the Parlor state directory.
///
/// Resolution order:
/// 1. `PARLOR_STATE_DIR` environment variable if set
/// 2. `~/.parlor` if a home directory is available
/// 3. `.parlor` in the current directory as fallback
pub fn state_dir() -> PathBuf {
    STATE_DIR_CACHE
        .get_or_init(|| {
            std::env::var(STATE_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    dirs::home_dir()
                        .map(|h| h.join(DEFAULT_STATE_DIR))
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
                })
        })
        .clone()
}

/// Tunable timings and flags for the lifecycle controller.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Skip the pending state: knocks become active immediately.
    pub auto_approve: bool,
    /// Window in which a disconnected visitor may reconnect before
    /// the room is treated as abandoned.
    pub disconnect_grace: Duration,
    /// Idle time after which an active room is kicked.
    pub inactivity_timeout: Duration,
    /// Interval of the inactivity sweep.
    pub sweep_interval: Duration,
    /// Delay between a room entering `left` and its cleanup, so the
    /// operator has time to read the final summary.
    pub cleanup_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            disconnect_grace: Duration::from_secs(5),
            inactivity_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            cleanup_delay: Duration::from_secs(30),
        }
    }
}

impl LifecycleConfig {
    /// Zero-delay configuration for tests.
    pub fn immediate() -> Self {
        Self {
            auto_approve: false,
            disconnect_grace: Duration::ZERO,
            inactivity_timeout: Duration::ZERO,
            sweep_interval: Duration::from_millis(10),
            cleanup_delay: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = LifecycleConfig::default();
        assert!(!config.auto_approve);
        assert_eq!(config.disconnect_grace, Duration::from_secs(5));
        assert_eq!(config.inactivity_timeout, Duration::from_secs(300));
        assert_eq!(config.cleanup_delay, Duration::from_secs(30));
    }
}
