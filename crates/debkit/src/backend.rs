//! [`planner::Backend`] implementation that speaks apt, debconf, systemctl and pip.

use anyhow::Context;
use planner::{Action, ActionOutcome, ActionPlan, Backend, BladeInstance};
use std::path::Path;

use crate::commands::{self, Probe};
use crate::error::{Error, ErrorCategory, Result};
use crate::retry::{LogCallback, with_retry};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::types::{BackendOptions, RetryConfig};

/// Applies plan actions by running commands through a [`CommandRunner`]
pub struct CommandBackend<R> {
    runner: R,
    options: BackendOptions,
    retry: RetryConfig,
}

impl<R: CommandRunner> CommandBackend<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            options: BackendOptions::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_options(mut self, options: BackendOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    /// Run a command, retrying transient failures; a non-zero exit is an error
    fn run(&self, blade: &BladeInstance, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = spec.command_line();
        log::debug!("{}: {}", blade.id, line);
        with_retry(&self.retry, Some(&LogCallback), || {
            let output = self.runner.run(blade, spec)?;
            if output.is_success() {
                Ok(output)
            } else {
                Err(Error::from_command_output(
                    &line,
                    output.status,
                    &output.stderr,
                ))
            }
        })
    }

    /// Whether a probe's target state already holds
    ///
    /// A failing probe is an answer, not an error, unless its stderr shows the
    /// blade could not be reached or the probe was not allowed to run.
    fn holds(&self, blade: &BladeInstance, probe: &Probe) -> Result<bool> {
        let line = probe.command.command_line();
        log::trace!("{}: probe {}", blade.id, line);
        with_retry(&self.retry, Some(&LogCallback), || {
            let output = self.runner.run(blade, &probe.command)?;
            if !output.is_success() {
                let err = Error::from_command_output(&line, output.status, &output.stderr);
                if matches!(
                    err.category(),
                    ErrorCategory::Network | ErrorCategory::Permission
                ) {
                    return Err(err);
                }
            }
            Ok(probe.is_satisfied(&output))
        })
    }

    /// Whether every probe holds; stops at the first that doesn't
    fn all_hold(&self, blade: &BladeInstance, probes: &[Probe]) -> Result<bool> {
        if probes.is_empty() {
            return Ok(false);
        }
        for probe in probes {
            if !self.holds(blade, probe)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<R: CommandRunner> Backend for CommandBackend<R> {
    fn prepare(&self, blade: &BladeInstance, _plan: &ActionPlan) -> anyhow::Result<()> {
        for spec in commands::prepare_commands(&self.options) {
            match self.run(blade, &spec) {
                Ok(_) => {}
                Err(e) if commands::is_best_effort(&spec) => {
                    log::warn!("{}: ignoring failure: {}", blade.id, e);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to prepare {}", blade.id));
                }
            }
        }
        Ok(())
    }

    fn ensure_venv(&self, blade: &BladeInstance, venv: &Path) -> anyhow::Result<()> {
        let existing = Probe {
            command: commands::venv_probe(venv),
            satisfied_on_success: true,
        };
        if self.holds(blade, &existing)? {
            log::debug!("{}: venv {} already exists", blade.id, venv.display());
            return Ok(());
        }

        self.run(blade, &commands::venv_create(venv, &self.options))
            .with_context(|| format!("Failed to create venv {}", venv.display()))?;
        log::info!("{}: created venv {}", blade.id, venv.display());
        Ok(())
    }

    fn apply(&self, blade: &BladeInstance, action: &Action) -> anyhow::Result<ActionOutcome> {
        if self.all_hold(blade, &commands::probes(action))? {
            log::debug!("{}: {} already satisfied", blade.id, action);
            return Ok(ActionOutcome::NoChange);
        }

        let mut changed = false;
        for spec in commands::render(action) {
            let output = self.run(blade, &spec)?;
            changed |= reports_change(action, &output);
        }

        Ok(if changed {
            ActionOutcome::Applied
        } else {
            ActionOutcome::NoChange
        })
    }
}

/// Whether a successful command's output shows it changed the blade
fn reports_change(action: &Action, output: &CommandOutput) -> bool {
    match action {
        Action::InstallPackages { .. } => newly_installed(&output.stdout) != Some(0),
        Action::InstallModule { .. } => {
            !output.stdout.contains("Requirement already satisfied")
                || output.stdout.contains("Successfully installed")
        }
        _ => true,
    }
}

/// Count from apt's "N upgraded, N newly installed, ..." summary line
fn newly_installed(stdout: &str) -> Option<u64> {
    stdout.lines().find_map(|line| {
        let (before, _) = line.split_once(" newly installed")?;
        before.rsplit(' ').next()?.parse().ok()
    })
}
