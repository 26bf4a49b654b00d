//! Retry policy for wallet submissions
//!
//! Disabled by default: a failed submission is dropped for this pass and
//! picked up again on a re-scan. With retries enabled, errors are classified
//! and only transient ones are retried, with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::RelayError;

/// Submission retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// Nonce too low or already known - the ledger already has it
    AlreadyProcessed,
    /// Permanent failure - do not retry (revert, bad signature, funds)
    Permanent,
    /// Unknown error - may retry with backoff
    Unknown,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("nonce too low")
        || error_lower.contains("already known")
        || error_lower.contains("already been processed")
    {
        return ErrorClass::AlreadyProcessed;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("already executed")
        || error_lower.contains("no signer")
    {
        return ErrorClass::Permanent;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
        || error_lower.contains("underpriced")
        || error_lower.contains("nonce too high")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Unknown
}

/// Action to take after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    /// Retry after a backoff period
    RetryAfter(Duration),
    /// Give up on this job for this pass
    Drop,
}

/// Decide what to do after `attempt` failed attempts ending in `error`
pub fn next_action(config: &RetryConfig, attempt: u32, error: &str) -> RetryAction {
    match classify_error(error) {
        ErrorClass::Permanent => {
            debug!(error = %error, "Permanent error, not retrying");
            RetryAction::Drop
        }
        ErrorClass::AlreadyProcessed => {
            debug!(error = %error, "Ledger already has this transaction, not retrying");
            RetryAction::Drop
        }
        ErrorClass::Transient | ErrorClass::Unknown => {
            if !config.should_retry(attempt) {
                return RetryAction::Drop;
            }
            RetryAction::RetryAfter(config.backoff_for_attempt(attempt))
        }
    }
}

/// Execute with retry logic
///
/// `operation` receives the 0-based attempt number.
pub async fn with_retry<F, T, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, RelayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let error_str = e.to_string();
                match next_action(config, attempt, &error_str) {
                    RetryAction::RetryAfter(backoff) => {
                        attempt += 1;
                        warn!(
                            attempt,
                            max = config.max_retries,
                            ?backoff,
                            error = %error_str,
                            "Retrying after backoff"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    RetryAction::Drop => return Err(e),
                }
            }
        }
    }
}
