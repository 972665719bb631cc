//! Client and session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{CDPError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9222;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

const LOOPBACK_HOSTS: [&str; 4] = ["127.0.0.1", "::1", "[::1]", "localhost"];

pub fn is_loopback_host(host: &str) -> bool {
    LOOPBACK_HOSTS.contains(&host)
}

/// Reconnection backoff: `max_attempts` tries, waiting `base_delay_ms * 2^n` before try `n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the zero-based `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Sum of all delays if every attempt fails
    pub fn total_delay(&self) -> Duration {
        (0..self.max_attempts).map(|n| self.delay(n)).sum()
    }
}

/// Protocol client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    /// Permit non-loopback hosts. Off by default: whoever reaches the
    /// endpoint controls the application.
    pub allow_remote: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            allow_remote: false,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Enforce the loopback-only policy
    pub fn validate(&self) -> Result<()> {
        if !self.allow_remote && !is_loopback_host(&self.host) {
            return Err(CDPError::connection(format!(
                "Refusing to connect to non-loopback host '{}' without allow_remote",
                self.host
            )));
        }
        Ok(())
    }
}

/// Session configuration for [`crate::session::AppSession`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub id: String,
    pub client: ClientConfig,
    /// URL substring identifying the embedded web view; first page if unset
    pub webview_url_pattern: Option<String>,
    /// URL substring identifying the app's own UI; no UI client if unset
    pub ui_url_pattern: Option<String>,
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            client: ClientConfig::default(),
            webview_url_pattern: None,
            ui_url_pattern: None,
            poll_interval_ms: 250,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
