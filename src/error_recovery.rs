//! Retry policy for hardware handshakes.
//
// Connect attempts are retried with a fixed backoff before the controller
// gives up and degrades to simulation mode.

use crate::config::HardwareConfig;
use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl From<&HardwareConfig> for RetryPolicy {
    fn from(config: &HardwareConfig) -> Self {
        Self {
            max_attempts: config.connect_attempts.max(1),
            backoff_delay: config.retry_backoff,
        }
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// The closure receives the 1-based attempt number. The last error is returned
/// with the attempt count attached.
pub async fn retry_with_policy<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("Attempt {}/{} failed: {:#}", attempt, attempts, e);
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            sleep(policy.backoff_delay).await;
        }
    }
    let error = last_error.unwrap_or_else(|| anyhow!("no attempts were made"));
    Err(error.context(format!("failed after {} attempts", attempts)))
}
