//! Bounded readiness polling.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            attempts: 30,
        }
    }
}

/// Poll `probe` until it reports ready, sleeping `interval` between tries.
///
/// Returns the number of attempts used, or a timeout error once the retry
/// budget is spent.
pub async fn wait_until_ready<F, Fut>(
    operation: &str,
    policy: ReadinessPolicy,
    mut probe: F,
) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=policy.attempts {
        if probe().await {
            debug!("{} ready after {} attempt(s)", operation, attempt);
            return Ok(attempt);
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(OrchestratorError::Timeout {
        operation: operation.to_string(),
        attempts: policy.attempts,
    })
}
