//! Bounded retries with exponential backoff

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::alerting::Notification;

use super::{Channel, ChannelError, DEFAULT_TIMEOUT};

/// How often and how patiently a channel is retried
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Growth factor applied to the delay after each failed attempt
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Time limit for one attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Policy from operator-supplied plugin settings
    pub fn from_plugin(retry_count: u32, retry_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: retry_count.max(1),
            base_delay: retry_delay,
            timeout,
            ..Self::default()
        }
    }

    /// Delay to wait after `failed_attempts` consecutive failures
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(32);
        let factor = self.multiplier.max(1.0).powi(exponent as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Result of a retried operation
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Final result
    pub result: Result<(), ChannelError>,
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. Each attempt is bounded by
/// `policy.timeout`; a timed-out attempt counts as a failure.
pub async fn retry_with_backoff<F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), ChannelError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = ChannelError::Config("no attempt made".to_string());

    for attempt in 1..=max_attempts {
        let result = match tokio::time::timeout(policy.timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(policy.timeout)),
        };

        match result {
            Ok(()) => {
                return RetryOutcome {
                    attempts: attempt,
                    result: Ok(()),
                }
            }
            Err(e) => {
                if attempt < max_attempts {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        channel = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Notification attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = e;
            }
        }
    }

    RetryOutcome {
        attempts: max_attempts,
        result: Err(last_err),
    }
}

/// Send through a channel using its own retry policy
pub async fn send_with_retry(channel: &dyn Channel, notification: &Notification) -> RetryOutcome {
    retry_with_backoff(channel.name(), channel.retry_policy(), |_| {
        channel.send(notification)
    })
    .await
}
