//! Bounded retry with backoff for coordination requests
//!
//! Every externally-visible coordinator operation except `commit_offset`
//! goes through [`retry_request`]; the watch-multiplexer rewatch path
//! handles its own recovery inline. The harness bounds attempt count, not
//! wall-clock time.

use crate::config::ZookeeperConfig;
use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Attempt budget and backoff, derived from [`ZookeeperConfig`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    max_request_retries: u32,
    request_backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &ZookeeperConfig) -> Self {
        Self {
            max_request_retries: config.max_request_retries,
            request_backoff: config.request_backoff(),
        }
    }
}

/// Run `attempt` up to `max_request_retries + 1` times, sleeping the backoff
/// between attempts. The first success returns immediately; otherwise the
/// last error is returned.
pub(crate) async fn retry_request<T, F, Fut>(
    policy: RetryPolicy,
    op: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for i in 0..=policy.max_request_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(op, attempt = i, error = %e, "coordination request failed");
                last_err = Some(e);
            }
        }
        if i < policy.max_request_retries {
            sleep(policy.request_backoff).await;
        }
    }
    // Unreachable fallback: the loop body always records an error before
    // falling through.
    Err(last_err.unwrap_or_else(|| crate::error::GrouplineError::coordinator(op.to_string())))
}

/// Claim-flavoured retry: contention (`Ok(false)`) is retried like an error,
/// and the final outcome is whatever the last attempt reported.
pub(crate) async fn retry_claim<F, Fut>(policy: RetryPolicy, op: &str, mut attempt: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut last = Ok(false);
    for i in 0..=policy.max_request_retries {
        match attempt().await {
            Ok(true) => return Ok(true),
            Ok(false) => {
                debug!(op, attempt = i, "partition still owned, retrying claim");
                last = Ok(false);
            }
            Err(e) => {
                debug!(op, attempt = i, error = %e, "claim attempt failed");
                last = Err(e);
            }
        }
        if i < policy.max_request_retries {
            sleep(policy.request_backoff).await;
        }
    }
    last
}
