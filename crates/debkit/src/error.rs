//! Error types for blade command execution.
//!
//! Errors are categorized to enable smart retry logic and appropriate
//! user feedback. Categories are derived from the stderr of apt, dpkg,
//! systemctl, pip and ssh.

use thiserror::Error;

/// Categories of command errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (transient, retryable)
    Network,
    /// Package, module or unit does not exist
    NotFound,
    /// The dpkg or apt lock is held by another process (transient, retryable)
    Locked,
    /// Permission denied (not root, or ssh key rejected)
    Permission,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Locked)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::NotFound => "Not found",
            Self::Locked => "Package manager locked",
            Self::Permission => "Permission denied",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check the blade's network and package mirrors, then try again",
            Self::NotFound => "Verify the package, module or service name in the manifest",
            Self::Locked => "Wait for other apt or dpkg processes on the blade to finish",
            Self::Permission => "Connect as root or check the ssh identity file",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while running commands on a blade.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-related error (DNS, mirror unreachable, ssh connect, etc.)
    #[error("network error: {message}")]
    Network { message: String },

    /// Package, module or unit does not exist
    #[error("not found: {message}")]
    NotFound { message: String },

    /// apt or dpkg lock held elsewhere
    #[error("package manager locked: {message}")]
    Locked { message: String },

    #[error("permission denied: {message}")]
    Permission { message: String },

    /// Command ran and exited unsuccessfully
    #[error("command failed ({}): {command}{}", status_text(.status), stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Command could not be started at all
    #[error("failed to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn status_text(status: &Option<i32>) -> String {
    status.map_or_else(|| "killed by signal".to_string(), |code| format!("exit {code}"))
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

const NETWORK_MARKERS: &[&str] = &[
    "could not resolve",
    "temporary failure resolving",
    "temporary failure in name resolution",
    "failed to fetch",
    "connection refused",
    "connection timed out",
    "connection reset",
    "timed out",
    "network is unreachable",
    "no route to host",
    "ssh: connect to host",
    "failed to establish a new connection",
    "could not read from remote repository",
];

const LOCK_MARKERS: &[&str] = &[
    "could not get lock",
    "unable to lock",
    "unable to acquire the dpkg frontend lock",
    "is another process using it",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "unable to locate package",
    "has no installation candidate",
    "no matching distribution found",
    "could not find a version that satisfies",
    "does not exist",
    "repository not found",
    "not found.",
];

const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "are you root",
    "operation not permitted",
];

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Network,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Locked { .. } => ErrorCategory::Locked,
            Self::Permission { .. } => ErrorCategory::Permission,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from a failed command's output.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_command_output(command: &str, status: Option<i32>, stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let message = || format!("{command}: {}", stderr.trim());
        let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        if has(LOCK_MARKERS) {
            return Self::Locked { message: message() };
        }
        if has(NETWORK_MARKERS) {
            return Self::Network { message: message() };
        }
        if has(PERMISSION_MARKERS) {
            return Self::Permission { message: message() };
        }
        if has(NOT_FOUND_MARKERS) {
            return Self::NotFound { message: message() };
        }

        Self::CommandFailed {
            command: command.to_string(),
            status,
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Result type for blade command operations.
pub type Result<T> = std::result::Result<T, Error>;
