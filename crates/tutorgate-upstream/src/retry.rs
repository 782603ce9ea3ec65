use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::ProviderError;
use crate::types::CompletionResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(250),
            max_jitter: Duration::from_millis(125),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before the retry that follows `attempt` (1-based),
    /// plus uniform jitter in `[0, max_jitter)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let backoff = self.base_backoff.saturating_mul(factor);
        if self.max_jitter.is_zero() {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..self.max_jitter);
        backoff.saturating_add(jitter)
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Status an upstream outcome carries, used to decide on a retry.
pub trait UpstreamStatus {
    fn upstream_status(&self) -> Option<u16>;
}

impl UpstreamStatus for CompletionResponse {
    fn upstream_status(&self) -> Option<u16> {
        Some(self.status)
    }
}

impl UpstreamStatus for ProviderError {
    fn upstream_status(&self) -> Option<u16> {
        self.status()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    pub route: &'a str,
    pub identity: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub response: T,
    pub retry_attempts: u32,
}

#[derive(Debug)]
pub struct RetryError<E> {
    pub source: E,
    pub retry_attempts: u32,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upstream call failed after {} retries: {}",
            self.retry_attempts, self.source
        )
    }
}

impl<E: StdError + 'static> StdError for RetryError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

/// Runs `operation` until it yields a non-retryable outcome or the policy's
/// attempts are spent. Exhaustion surfaces the last outcome as-is.
pub async fn call_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    ctx: &RetryContext<'_>,
    mut operation: F,
) -> Result<Retried<T>, RetryError<E>>
where
    T: UpstreamStatus,
    E: UpstreamStatus + fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = operation(attempt).await;
        let status = match &outcome {
            Ok(response) => response.upstream_status(),
            Err(err) => err.upstream_status(),
        };
        let retry_attempts = attempt - 1;

        if attempt >= max_attempts || !status.is_some_and(is_retryable_status) {
            return outcome
                .map(|response| Retried {
                    response,
                    retry_attempts,
                })
                .map_err(|source| RetryError {
                    source,
                    retry_attempts,
                });
        }

        let delay = policy.delay_after(attempt);
        warn!(
            event = "upstream_retry",
            route = ctx.route,
            identity = ctx.identity,
            attempt,
            status = status.unwrap_or_default(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying upstream call"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
