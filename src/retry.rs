//! Resilient request execution with timeouts and exponential backoff
//!
//! This module wraps a single HTTP call with a per-attempt timeout and a
//! bounded retry loop. Only transient failures are retried: connection-level
//! errors, attempt timeouts, and the status codes in [`RETRYABLE_STATUS_CODES`].
//! Caller-initiated cancellation is never retried.
//!
//! The delay before retry *n* (n ≥ 1) is `initial_delay × multiplier^(n-1)`,
//! capped at `max_delay`, with optional jitter.
//!
//! # Examples
//!
//! ```rust,no_run
//! use streamchat::retry::{RequestExecutor, RetryConfig};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_retries(2)
//!     .with_initial_delay(Duration::from_millis(500));
//! let executor = RequestExecutor::new(reqwest::Client::new(), config);
//!
//! let response = executor
//!     .execute(&CancellationToken::new(), |client| {
//!         client.post("http://localhost:8080/v1/chat/completions")
//!     })
//!     .await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// HTTP status codes that are worth another attempt
pub const RETRYABLE_STATUS_CODES: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

/// True if a response with this status may succeed when re-attempted
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of re-attempts after the first try (0 disables retrying)
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (2.0 doubles the delay each time)
    pub backoff_multiplier: f64,

    /// Random jitter applied to each delay (0.0 to 1.0)
    pub jitter_factor: f64,

    /// Hard limit for a single attempt. `None` leaves it to the HTTP client.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            attempt_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Set the number of re-attempts
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set the per-attempt timeout
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Total number of attempts this configuration allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponent = retry.saturating_sub(1) as i32;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(exponent);

        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Executes HTTP requests with a per-attempt timeout and bounded retry.
///
/// The executor is stateless across calls; it only holds the shared
/// `reqwest::Client` and the retry policy. Each attempt rebuilds the request
/// from the `build` closure, so bodies that can't be cloned (multipart forms)
/// work too.
///
/// When the retry budget is exhausted on a retryable *status*, the last
/// response is returned as-is so the caller sees the real status and body.
/// When it is exhausted on a transport failure, that error is returned.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    config: RetryConfig,
}

impl RequestExecutor {
    pub fn new(client: reqwest::Client, config: RetryConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run the request described by `build`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`Error::Aborted`] if `cancel` fires before a response arrives
    /// - [`Error::Timeout`] / [`Error::Network`] once the retry budget is spent
    /// - [`Error::Http`] for non-retryable client errors (bad URL, etc.)
    pub async fn execute<F>(
        &self,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let max_attempts = self.config.max_attempts();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.config.calculate_delay(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::aborted("")),
                    _ = sleep(delay) => {}
                }
            }

            let is_last = attempt + 1 == max_attempts;
            let send = build(&self.client).send();
            let attempt_result = async {
                match self.config.attempt_timeout {
                    Some(limit) => match timeout(limit, send).await {
                        Ok(result) => result.map_err(Error::from),
                        Err(_) => Err(Error::timeout()),
                    },
                    None => send.await.map_err(Error::from),
                }
            };

            // Dropping the in-flight attempt on cancel or timeout cancels it.
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::aborted("")),
                result = attempt_result => result,
            };

            match outcome {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if is_retryable_status(status) && !is_last {
                        log::debug!(
                            "attempt {}/{} got retryable status {}",
                            attempt + 1,
                            max_attempts,
                            status
                        );
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if err.is_retryable() && !is_last {
                        log::debug!("attempt {}/{} failed: {}", attempt + 1, max_attempts, err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(Error::other("Retry failed with no attempts"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_retries(5)
            .with_initial_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(0.2)
            .with_attempt_timeout(Duration::from_secs(20));

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_attempts(), 6);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 0.2);
        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_jitter_is_clamped() {
        assert_eq!(RetryConfig::new().with_jitter_factor(4.0).jitter_factor, 1.0);
        assert_eq!(RetryConfig::new().with_jitter_factor(-1.0).jitter_factor, 0.0);
    }

    #[test]
    fn test_calculate_delay_doubles() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter_factor(0.0);

        assert_eq!(config.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_calculate_delay_capped() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(3));

        assert_eq!(config.calculate_delay(10), Duration::from_secs(3));
    }

    #[test]
    fn test_retryable_status_set() {
        for status in [408, 425, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status} should retry");
        }
        for status in [200, 400, 401, 403, 404, 501] {
            assert!(!is_retryable_status(status), "{status} should not retry");
        }
    }

    #[tokio::test]
    async fn test_executor_aborts_before_sending() {
        let executor = RequestExecutor::new(reqwest::Client::new(), RetryConfig::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = executor
            .execute(&cancel, |c| c.get("http://127.0.0.1:9/never"))
            .await;

        assert!(result.unwrap_err().is_abort());
    }

    #[tokio::test]
    async fn test_executor_surfaces_network_error_after_retries() {
        let config = RetryConfig::new()
            .with_max_retries(1)
            .with_initial_delay(Duration::from_millis(5));
        let executor = RequestExecutor::new(reqwest::Client::new(), config);

        // Port 9 (discard) is closed on test machines; the connect is refused.
        let result = executor
            .execute(&CancellationToken::new(), |c| c.get("http://127.0.0.1:9/"))
            .await;

        assert!(matches!(result, Err(Error::Network(_))));
    }
}
