//! Bounded retry with exponential backoff for outbound HTTP calls.
//!
//! Each adapter call takes its `RetryPolicy` explicitly. Only errors
//! classified as `BotError::Transient` are retried; credential failures
//! surface as `BotError::FatalConfig` on the first attempt.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::error::BotError;

const fn default_max_attempts() -> u32 {
    1
}
const fn default_base_delay_ms() -> u64 {
    200
}
const fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 425, 429, 500, 502, 503, 504]
}

/// Retry schedule for one class of adapter call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time after.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// HTTP statuses treated as transient.
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

impl RetryPolicy {
    /// Exactly one attempt. Used for order submission.
    pub fn single_attempt() -> Self {
        Self::default()
    }

    /// Delay before attempt `attempt` (1-based, so attempt 2 waits base).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Whether a response status should be retried.
    pub fn retries_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }

    /// Classify a non-success HTTP status.
    pub fn status_error(&self, stage: &'static str, status: StatusCode, body: &str) -> anyhow::Error {
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return BotError::FatalConfig(format!("{stage}: credentials refused ({status})")).into();
        }
        if self.retries_status(status) {
            return BotError::transient(stage, format!("HTTP {status}")).into();
        }
        anyhow::anyhow!("{stage}: API error {status}: {body}")
    }
}

/// Classify a transport failure (connect, timeout, reset) as transient.
pub fn transport_error(stage: &'static str, err: &reqwest::Error) -> anyhow::Error {
    BotError::transient(stage, err.to_string()).into()
}

/// Whether an error is worth another attempt.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    matches!(BotError::find(err), Some(BotError::Transient { .. }))
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempts are used up.
pub async fn retry_async<T, Fut, F>(policy: &RetryPolicy, op_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op = op_name, attempt, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
