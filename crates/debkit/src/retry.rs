//! Retrying blade commands that hit a transient condition.

use crate::error::{Error, Result};
use crate::types::RetryConfig;
use std::thread;
use std::time::Duration;

/// Notified before each retry.
pub trait RetryCallback: Send + Sync {
    /// `failures` attempts have failed so far; the next one starts after `delay`.
    fn on_retry(&self, failures: u32, max_attempts: u32, error: &Error, delay: Duration);
}

/// Reports retries as log warnings.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, failures: u32, max_attempts: u32, error: &Error, delay: Duration) {
        log::warn!(
            "{} (attempt {failures}/{max_attempts}), retrying in {}s: {error}",
            error.category().description(),
            delay.as_secs()
        );
    }
}

/// Run `operation` until it succeeds, fails for good, or runs out of attempts.
///
/// Only retryable errors (unreachable blade, dpkg lock) are retried; the wait
/// depends on which of the two was hit. The last error is returned as is.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut failures = 0;
    loop {
        let error = match operation() {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        failures += 1;
        if !error.is_retryable() || failures >= max_attempts {
            return Err(error);
        }

        let delay = config.delay_after(error.category(), failures);
        if let Some(cb) = callback {
            cb.on_retry(failures, max_attempts, &error, delay);
        }
        thread::sleep(delay);
    }
}
