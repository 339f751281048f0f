// src/dispatch/retry.rs

//! Bounded retry with exponential backoff for execute requests.

use std::time::Duration;

use tracing::{debug, warn};

use crate::service::{DeviceCommandService, ExecuteRequest, ExecuteResponse, ServiceError};

/// `max_attempts` counts every call, the first one included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(600),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` (1-based) failed.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Submit `request`, retrying transient failures up to the attempt ceiling.
///
/// Non-transient errors are returned immediately.
pub async fn execute_with_retry(
    service: &dyn DeviceCommandService,
    request: &ExecuteRequest,
    policy: RetryPolicy,
) -> Result<ExecuteResponse, ServiceError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match service.execute(request.clone()).await {
            Ok(response) => {
                debug!(module = %request.module_id, attempt, "execute accepted");
                return Ok(response);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_after(attempt);
                warn!(
                    module = %request.module_id,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient execute failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    warn!(
                        module = %request.module_id,
                        attempt,
                        error = %err,
                        "execute failed after exhausting retries"
                    );
                } else {
                    debug!(module = %request.module_id, error = %err, "execute failed; not retryable");
                }
                return Err(err);
            }
        }
    }
}
