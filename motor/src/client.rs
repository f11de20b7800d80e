//! Stage controller HTTP client

use crate::{Axis, MotorStatus, MoveDirection};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Motor communication errors
#[derive(Debug, Error)]
pub enum MotorError {
    #[error("Connection timeout during {operation}")]
    Timeout { operation: String },

    #[error("Connection refused: {url} - {cause}")]
    ConnectionRefused { url: String, cause: String },

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Move rejected by controller at position {position}")]
    Rejected { position: i64 },

    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

impl MotorError {
    /// Check if this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            MotorError::Timeout { .. } => true,
            MotorError::ConnectionRefused { .. } => true,
            // Retry on 5xx server errors and 429 rate limiting
            MotorError::Http { status, .. } => *status >= 500 || *status == 429,
            // A rejected move means the controller is busy; it clears quickly
            MotorError::Rejected { .. } => true,
            MotorError::RequestFailed(_) => true,
            MotorError::Parse(_) => false,
            MotorError::RetryExhausted { .. } => false,
        }
    }
}

impl From<reqwest::Error> for MotorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MotorError::Timeout {
                operation: "HTTP request".to_string(),
            }
        } else if err.is_connect() {
            let url = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            MotorError::ConnectionRefused {
                url,
                cause: err.to_string(),
            }
        } else if err.is_decode() {
            MotorError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            MotorError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            MotorError::RequestFailed(err.to_string())
        }
    }
}

/// Retry configuration for failed requests
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to retry delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let final_delay = if self.use_jitter {
            // +/- 25% jitter
            let jitter_factor = 0.75 + (rand_simple() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Simple pseudo-random number generator for jitter (0.0 to 1.0)
fn rand_simple() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos as f64 / u32::MAX as f64).fract()
}

/// Reply to a move command. `status` is a string on the wire.
#[derive(Debug, Deserialize)]
struct MoveResponse {
    status: String,
    position: i64,
}

/// Client for one stage controller.
///
/// Moves are relative and not idempotent: issuing the same move twice travels
/// twice as far. A failed call therefore never invents a position; callers get
/// an error and must re-query status before deciding what to do next.
pub struct MotorClient {
    http: Client,
    base_url: String,
    retry: RetryConfig,
}

impl MotorClient {
    /// Create a client with default timeouts and retry policy.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_config(base_url, RetryConfig::default(), 5000)
    }

    /// Create a client with a custom retry policy and request timeout.
    pub fn with_config(base_url: impl Into<String>, retry: RetryConfig, timeout_ms: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .connect_timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.into(),
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    fn move_url(&self, axis: Axis, steps: u64, direction: MoveDirection) -> String {
        format!(
            "{}/move/{}/{}/{}",
            self.base_url,
            axis.as_str(),
            steps,
            direction.as_u8()
        )
    }

    fn status_url(&self, axis: Axis) -> String {
        format!("{}/status/{}", self.base_url, axis.as_str())
    }

    /// Execute a request with bounded retry and exponential backoff.
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T, MotorError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, MotorError>>,
    {
        let mut last_error = MotorError::RequestFailed("No attempts made".to_string());

        for attempt in 0..self.retry.max_attempts {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = e;

                    if !last_error.is_retryable() {
                        return Err(last_error);
                    }

                    if attempt + 1 < self.retry.max_attempts {
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(
                            "Request failed (attempt {}/{}), retrying in {:?}: {}",
                            attempt + 1,
                            self.retry.max_attempts,
                            delay,
                            last_error
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(MotorError::RetryExhausted {
            attempts: self.retry.max_attempts,
            last_error: last_error.to_string(),
        })
    }

    /// Issue a relative move and return the controller's reported position.
    ///
    /// A `status: "false"` reply means the controller refused the move (it is
    /// still executing a previous one); that surfaces as [`MotorError::Rejected`]
    /// and is retried within the attempt budget.
    pub async fn move_relative(
        &self,
        axis: Axis,
        steps: u64,
        direction: MoveDirection,
    ) -> Result<i64, MotorError> {
        let url = self.move_url(axis, steps, direction);
        self.execute_with_retry(|| {
            let url = url.clone();
            async move {
                let response = self.http.get(&url).send().await?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(MotorError::Http {
                        status: status.as_u16(),
                        message: body,
                    });
                }

                let reply: MoveResponse = response.json().await?;
                if reply.status != "true" {
                    return Err(MotorError::Rejected {
                        position: reply.position,
                    });
                }

                Ok(reply.position)
            }
        })
        .await
    }

    /// Signed-delta convenience move.
    ///
    /// The magnitude is truncated to whole steps; a delta that truncates to
    /// zero skips the network call entirely and reports the current position.
    pub async fn step(&self, axis: Axis, delta: f64) -> Result<i64, MotorError> {
        let steps = delta.abs() as u64;
        if steps == 0 {
            return Ok(self.status(axis).await?.position);
        }
        self.move_relative(axis, steps, MoveDirection::from_delta(delta))
            .await
    }

    /// Query the current status of an axis.
    pub async fn status(&self, axis: Axis) -> Result<MotorStatus, MotorError> {
        let url = self.status_url(axis);
        self.execute_with_retry(|| {
            let url = url.clone();
            async move {
                let response = self.http.get(&url).send().await?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(MotorError::Http {
                        status: status.as_u16(),
                        message: body,
                    });
                }

                Ok(response.json::<MotorStatus>().await?)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_url_layout() {
        let client = MotorClient::new("http://192.168.0.71");
        assert_eq!(
            client.move_url(Axis::Focus, 300, MoveDirection::Forward),
            "http://192.168.0.71/move/focus/300/1"
        );
        assert_eq!(
            client.move_url(Axis::Aperture, 10, MoveDirection::Backward),
            "http://192.168.0.71/move/aperture/10/0"
        );
        assert_eq!(
            client.status_url(Axis::Focus),
            "http://192.168.0.71/status/focus"
        );
    }

    #[test]
    fn move_reply_parses_string_status() {
        let reply: MoveResponse =
            serde_json::from_str(r#"{"status": "true", "position": 1234}"#).unwrap();
        assert_eq!(reply.status, "true");
        assert_eq!(reply.position, 1234);

        let refused: MoveResponse =
            serde_json::from_str(r#"{"status": "false", "position": 0}"#).unwrap();
        assert_eq!(refused.status, "false");
    }

    #[test]
    fn retryable_classification() {
        assert!(MotorError::Timeout {
            operation: "move".into()
        }
        .is_retryable());
        assert!(MotorError::Rejected { position: 0 }.is_retryable());
        assert!(MotorError::Http {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!MotorError::Http {
            status: 404,
            message: String::new()
        }
        .is_retryable());
        assert!(!MotorError::Parse("bad json".into()).is_retryable());
        assert!(!MotorError::RetryExhausted {
            attempts: 3,
            last_error: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            use_jitter: false,
            ..Default::default()
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);
        assert_eq!(d0, Duration::from_millis(100));
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(d2, Duration::from_millis(400));
        // far attempts clamp to the cap
        assert_eq!(config.delay_for_attempt(20), Duration::from_millis(5000));
    }

    #[test]
    fn jittered_backoff_stays_in_band() {
        let config = RetryConfig::default();
        for attempt in 0..4 {
            let base = 100.0 * 2.0f64.powi(attempt as i32);
            let capped = base.min(5000.0);
            let delay = config.delay_for_attempt(attempt).as_millis() as f64;
            assert!(delay >= capped * 0.75 - 1.0);
            assert!(delay <= capped * 1.25 + 1.0);
        }
    }
}
