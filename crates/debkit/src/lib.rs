//! # debkit
//!
//! Applies blade plans to Debian and Ubuntu hosts.
//!
//! This crate provides:
//! - Rendering plan actions into apt, debconf, systemctl and pip commands
//! - Running those commands locally or over ssh
//! - Idempotence probes so unchanged blades report `NoChange`
//! - Retry with exponential backoff for network and dpkg-lock failures
//!
//! ## Example
//!
//! ```no_run
//! use debkit::{CommandBackend, SshRunner};
//! use planner::{ExecuteOptions, NoProgress, execute_fleet};
//!
//! # fn run(plans: &[planner::ActionPlan]) -> anyhow::Result<()> {
//! let backend = CommandBackend::new(SshRunner::new("root").with_port(22));
//! let report = execute_fleet(plans, &backend, &ExecuteOptions::default(), &mut NoProgress)?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry Logic
//!
//! Commands that fail because the blade or a mirror is unreachable, or
//! because another process holds the dpkg lock, are retried. Configure with
//! [`RetryConfig`].

pub mod backend;
pub mod commands;
pub mod error;
pub mod retry;
pub mod runner;
pub mod types;

// Re-export main types at crate root
pub use backend::CommandBackend;
pub use commands::{render, render_plan};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, RetryCallback, with_retry};
pub use runner::{
    CommandOutput, CommandRunner, CommandSpec, LocalRunner, RecordedCall, RecordingRunner,
    SshRunner,
};
pub use types::{BackendOptions, RetryConfig};
