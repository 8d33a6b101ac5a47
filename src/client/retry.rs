use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_millis(300);
const DEFAULT_RETRY_AFTER_CEILING: Duration = Duration::from_secs(60);

/// How the [SpotifyClient](crate::client::SpotifyClient) retries failed requests.
///
/// Rate-limit responses with a `Retry-After` header wait for as long as the header says, capped at
/// `retry_after_ceiling`. Every other retryable failure, including rate-limit responses without the header, waits
/// `backoff_factor * 2^(n - 1)` before the `n`th retry. Each retry consumes one unit of `max_retries`; a budget of zero
/// disables retrying altogether.
///
/// By default 429 and every 5xx status are retried. [retryable_statuses](RetryPolicy::retryable_statuses) replaces
/// that with an explicit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: Duration,
    pub retry_after_ceiling: Duration,
    /// Statuses to retry instead of 429 and every 5xx.
    pub retryable_statuses: Option<Vec<u16>>,
}

/// Why a request is about to be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RetryReason {
    /// 429 response, with the `Retry-After` value if there was one.
    RateLimited { retry_after: Option<u64> },
    /// A retryable server error status.
    Status(u16),
    /// The request timed out or the connection failed.
    Transport(String),
}

impl RetryPolicy {
    /// A policy that never retries. Every failure surfaces immediately.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_retries(self, max_retries: u32) -> Self {
        Self { max_retries, ..self }
    }

    pub fn backoff_factor(self, backoff_factor: Duration) -> Self {
        Self { backoff_factor, ..self }
    }

    pub fn retry_after_ceiling(self, retry_after_ceiling: Duration) -> Self {
        Self {
            retry_after_ceiling,
            ..self
        }
    }

    /// Retry exactly these statuses instead of 429 and every 5xx.
    pub fn retryable_statuses<I>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        Self {
            retryable_statuses: Some(statuses.into_iter().collect()),
            ..self
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        match &self.retryable_statuses {
            Some(statuses) => statuses.contains(&status),
            None => status == 429 || (500..600).contains(&status),
        }
    }

    /// The delay before the given retry, counting from 1.
    pub fn backoff(&self, retry: u32) -> Duration {
        let multiplier = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_factor.saturating_mul(multiplier)
    }

    /// The delay for a rate-limit response's `Retry-After` value.
    pub fn retry_after(&self, seconds: u64) -> Duration {
        Duration::from_secs(seconds).min(self.retry_after_ceiling)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retry_after_ceiling: DEFAULT_RETRY_AFTER_CEILING,
            retryable_statuses: None,
        }
    }
}
