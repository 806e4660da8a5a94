//! Retry utilities with bounded attempts.
//!
//! Every retried operation in berth has a finite attempt budget; once it is
//! exhausted the last error is returned so callers fail hard instead of
//! spinning.
//!
//! # Example
//!
//! ```ignore
//! use berth_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let sa = retry_with_backoff(
//!     &RetryConfig::fixed(10, Duration::from_millis(500)),
//!     "wait_default_service_account",
//!     || async { cluster.get_service_account(ns, "default").await },
//! ).await?;
//! ```

use std::time::Duration;

use tracing::{error, warn};

/// Bounded attempts with a fixed delay between them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one (always >= 1)
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl RetryConfig {
    /// `attempts` tries spaced `delay` apart; zero attempts means one
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts.max(1),
            delay,
        }
    }
}

/// Execute an async operation, retrying until it succeeds or the attempt
/// budget is exhausted.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to retry
///
/// # Returns
/// The result of the operation, or the last error once attempts run out.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = config.delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(config.delay).await;
            }
        }
    }
}
