//! Fixed protocol constants and runtime configuration.

use std::time::Duration;
use url::Url;

/// Delay before a dropped or failed event stream is reopened.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval between readiness polls during startup.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sandbox status polls before giving up.
pub const MAX_SANDBOX_POLL_ATTEMPTS: u32 = 60;

/// Session-service health polls before giving up.
pub const MAX_HEALTH_POLL_ATTEMPTS: u32 = 30;

/// Pause between creating a session and sending its first message.
pub const MESSAGE_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Default period for re-listing sandboxes when no fleet event arrives.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_MANAGER_URL: &str = "http://localhost:4000";

/// Polling budget for the startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupPolicy {
    pub poll_interval: Duration,
    pub max_sandbox_attempts: u32,
    pub max_health_attempts: u32,
    pub settle_delay: Duration,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            max_sandbox_attempts: MAX_SANDBOX_POLL_ATTEMPTS,
            max_health_attempts: MAX_HEALTH_POLL_ATTEMPTS,
            settle_delay: MESSAGE_SETTLE_DELAY,
        }
    }
}

/// Configuration for the long-running `watch` mode.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub manager_url: Url,
    pub reconnect_delay: Duration,
    pub resync_interval: Duration,
    pub status_port: Option<u16>,
}

impl WatchConfig {
    pub fn new(manager_url: Url) -> Self {
        Self {
            manager_url,
            reconnect_delay: RECONNECT_DELAY,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            status_port: None,
        }
    }
}
