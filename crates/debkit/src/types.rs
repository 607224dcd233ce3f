//! Configuration types for the command backend.

use std::time::Duration;

use crate::error::ErrorCategory;

/// How long to keep retrying commands that hit a transient blade condition
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts per command, including the first
    pub max_attempts: u32,
    /// First wait after the blade or a mirror could not be reached
    ///
    /// Covers a blade that is still booting or restarting sshd.
    pub connect_delay: Duration,
    /// First wait while another process holds the dpkg lock
    ///
    /// Freshly booted images often run unattended-upgrades for minutes.
    pub lock_delay: Duration,
    /// Growth of the wait between consecutive attempts
    pub backoff_factor: f64,
    /// Upper bound for a single wait
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            connect_delay: Duration::from_secs(10),
            lock_delay: Duration::from_secs(20),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(180),
        }
    }
}

impl RetryConfig {
    /// Never retry; every command gets one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Wait before the next attempt, after `failures` failed attempts of one kind.
    pub fn delay_after(&self, category: ErrorCategory, failures: u32) -> Duration {
        let base = match category {
            ErrorCategory::Locked => self.lock_delay,
            _ => self.connect_delay,
        };
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = (base.as_secs_f64() * self.backoff_factor.powi(exponent))
            .max(0.0)
            .min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Options that shape the commands sent to a blade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    /// Interpreter used to create the blade venv
    pub python: String,
    /// Run `apt-get upgrade -y` while preparing each blade
    pub upgrade: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            upgrade: false,
        }
    }
}
