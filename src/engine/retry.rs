/// Generic backoff combinator
///
/// One loop for every retried call. The policy decides how long to wait, the
/// predicate decides whether a failure is worth another attempt; the last failure
/// is returned unmodified.

use crate::config::DeployConfig;
use crate::engine::TransportError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// delay = initial * factor^(n-1)
    Exponential { factor: f64 },
    /// delay = initial + step * (n-1)
    Linear { step: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Doubling delay
    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    pub fn linear(max_attempts: u32, initial_delay: Duration, step: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff: Backoff::Linear { step },
        }
    }

    /// Policy for engine control-plane calls
    pub fn for_engine(config: &DeployConfig) -> Self {
        Self::exponential(
            config.retry_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// Policy for the manual test trigger
    pub fn for_test_trigger(config: &DeployConfig) -> Self {
        Self::linear(
            config.test_trigger_attempts,
            Duration::from_millis(config.test_trigger_base_delay_ms),
            Duration::from_millis(config.test_trigger_step_ms),
        )
    }

    /// Wait after the `attempt`-th failure (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let n = attempt.saturating_sub(1);
        match self.backoff {
            Backoff::Exponential { factor } => {
                let millis = self.initial_delay.as_millis() as f64 * factor.powi(n as i32);
                Duration::from_millis(millis.round().max(0.0) as u64)
            }
            Backoff::Linear { step } => self.initial_delay + step * n,
        }
    }
}

/// Run `operation` until it succeeds, attempts run out, or `should_retry` says stop
pub async fn retry_with<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && should_retry(&err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    "🔁 {} failed (attempt {}/{}): {}; retrying in {:?}",
                    name,
                    attempt,
                    max_attempts,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::error!("❌ {} gave up after {} attempts: {}", name, attempt, err);
                }
                return Err(err);
            }
        }
    }
}

/// Every transport error and non-2xx status is retried
pub fn any_failure(_: &TransportError) -> bool {
    true
}

/// Only "route not registered yet" is retried
pub fn not_found_only(err: &TransportError) -> bool {
    err.is_not_found()
}
