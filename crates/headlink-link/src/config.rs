//! Link configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for discovery, reconnection, and listening.
///
/// Every field has a default so a partial `[link]` table deserialises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Substring matched against paired device names.
    #[serde(default = "default_target_name")]
    pub target_name: String,

    /// Discovery poll cadence and the delay before retrying a failed connect.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on one outbound connect attempt, for transports that
    /// support one.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Also accept inbound links while listening.
    #[serde(default)]
    pub accept_inbound: bool,

    /// Service name advertised by listening transports.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_target_name() -> String {
    "GEMMI".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_service_name() -> String {
    "ApexHapticsDisplay".to_string()
}

impl LinkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target_name: default_target_name(),
            poll_interval_ms: default_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            accept_inbound: false,
            service_name: default_service_name(),
        }
    }
}
