//! Coordination-service client configuration

use crate::error::{GrouplineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default coordination-service host list
pub const DEFAULT_CONNECT: &str = "localhost";

/// Default session timeout in milliseconds
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 1000;

/// Default number of retries for any request except offset commits
pub const DEFAULT_MAX_REQUEST_RETRIES: u32 = 3;

/// Default backoff between request retries in milliseconds
pub const DEFAULT_REQUEST_BACKOFF_MS: u64 = 150;

/// Configuration for [`ZookeeperCoordinator`](crate::coordinator::ZookeeperCoordinator).
///
/// Offset commits are deliberately outside the retry budget here; their
/// retry policy belongs to the surrounding consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZookeeperConfig {
    /// Coordination-service hosts
    pub connect: Vec<String>,

    /// Session timeout in milliseconds
    pub session_timeout_ms: u64,

    /// Max retries for any request except `commit_offset`
    pub max_request_retries: u32,

    /// Backoff between request retries in milliseconds
    pub request_backoff_ms: u64,
}

impl Default for ZookeeperConfig {
    fn default() -> Self {
        Self {
            connect: vec![DEFAULT_CONNECT.to_string()],
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            max_request_retries: DEFAULT_MAX_REQUEST_RETRIES,
            request_backoff_ms: DEFAULT_REQUEST_BACKOFF_MS,
        }
    }
}

impl ZookeeperConfig {
    /// Session timeout as a [`Duration`]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Retry backoff as a [`Duration`]
    pub fn request_backoff(&self) -> Duration {
        Duration::from_millis(self.request_backoff_ms)
    }

    /// Validate the configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.connect.is_empty() {
            return Err(GrouplineError::configuration(
                "connect: at least one coordination-service host is required",
            ));
        }
        if self.session_timeout_ms == 0 {
            return Err(GrouplineError::configuration(
                "session_timeout_ms: must be greater than zero",
            ));
        }
        Ok(())
    }
}
