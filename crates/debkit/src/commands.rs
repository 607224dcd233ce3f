//! Rendering plan actions into Debian command lines.
//!
//! Pure functions only; nothing here runs a command. The backend and the
//! `--commands` preview both go through [`render`].

use planner::{Action, ActionPlan, FetchAction};
use std::collections::BTreeSet;
use std::path::Path;

use crate::runner::{CommandOutput, CommandSpec};
use crate::types::BackendOptions;

fn apt_get() -> CommandSpec {
    CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
}

fn venv_bin(venv: &Path, tool: &str) -> String {
    venv.join("bin").join(tool).display().to_string()
}

/// Commands run once per blade before its first action
///
/// The `apt-utils` install is best effort; see [`is_best_effort`].
pub fn prepare_commands(options: &BackendOptions) -> Vec<CommandSpec> {
    let mut commands = vec![apt_get().arg("update")];
    if options.upgrade {
        commands.push(apt_get().args(["upgrade", "-y"]));
    }
    commands.push(apt_get().args(["install", "-y", "apt-utils"]));
    commands
}

/// Whether a failure of this preparation command can be ignored
pub fn is_best_effort(spec: &CommandSpec) -> bool {
    spec.program == "apt-get" && spec.args.iter().any(|a| a == "apt-utils")
}

/// Succeeds when the venv already has an interpreter
pub fn venv_probe(venv: &Path) -> CommandSpec {
    CommandSpec::new("test").arg("-x").arg(venv_bin(venv, "python"))
}

pub fn venv_create(venv: &Path, options: &BackendOptions) -> CommandSpec {
    CommandSpec::new(&options.python)
        .args(["-m", "venv"])
        .arg(venv.display().to_string())
}

/// Succeeds when the module is installed in the venv
pub fn pip_show(venv: &Path, module_name: &str) -> CommandSpec {
    CommandSpec::new(venv_bin(venv, "pip")).args(["show", module_name])
}

/// Requirement string handed to `pip install`
///
/// A constraint that starts with a digit is treated as an exact version.
pub fn requirement(module_name: &str, fetch: &FetchAction) -> String {
    match fetch {
        FetchAction::VersionControl {
            url,
            reference: Some(reference),
        } => format!("git+{url}@{reference}"),
        FetchAction::VersionControl {
            url,
            reference: None,
        } => format!("git+{url}"),
        FetchAction::PackageIndex {
            version_constraint: Some(constraint),
            ..
        } => {
            let constraint = constraint.trim();
            if constraint.starts_with(|c: char| c.is_ascii_digit()) {
                format!("{module_name}=={constraint}")
            } else {
                format!("{module_name}{constraint}")
            }
        }
        FetchAction::PackageIndex {
            version_constraint: None,
            ..
        } => module_name.to_string(),
    }
}

/// A read-only check telling whether an action's target state already holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub command: CommandSpec,
    /// Exit status of `command` that means the state already holds
    pub satisfied_on_success: bool,
}

impl Probe {
    pub fn is_satisfied(&self, output: &CommandOutput) -> bool {
        output.is_success() == self.satisfied_on_success
    }
}

fn systemctl_query(query: &str, service: &str) -> CommandSpec {
    CommandSpec::new("systemctl").args([query, "--quiet", service])
}

/// Checks for actions whose current state can be read first
///
/// The action's target state holds only when every check is satisfied. An
/// empty list means the action always runs.
pub fn probes(action: &Action) -> Vec<Probe> {
    let check = |command, satisfied_on_success| Probe {
        command,
        satisfied_on_success,
    };
    match action {
        // Disabled and stopped: a disabled unit may still hold its port.
        Action::DisableService { service } => vec![
            check(systemctl_query("is-enabled", service), false),
            check(systemctl_query("is-active", service), false),
        ],
        // Enabled and running: a running unit that is not enabled won't survive a reboot.
        Action::EnableService { service } => vec![
            check(systemctl_query("is-enabled", service), true),
            check(systemctl_query("is-active", service), true),
        ],
        Action::RemoveModule {
            module_name, venv, ..
        } => vec![check(pip_show(venv, module_name), false)],
        _ => Vec::new(),
    }
}

/// Commands that carry out one action, in order
pub fn render(action: &Action) -> Vec<CommandSpec> {
    match action {
        Action::Preconfigure { settings } => {
            let mut input = settings.join("\n");
            input.push('\n');
            vec![CommandSpec::new("debconf-set-selections").stdin(input)]
        }
        Action::InstallPackages { packages } => {
            vec![apt_get().args(["install", "-y"]).args(packages.iter().cloned())]
        }
        Action::DisableService { service } => vec![
            CommandSpec::new("systemctl").args(["disable", "--now", service.as_str()]),
        ],
        Action::EnableService { service } => vec![
            CommandSpec::new("systemctl").args(["enable", "--now", service.as_str()]),
        ],
        Action::InstallModule {
            module_name,
            fetch,
            venv,
            ..
        } => vec![
            CommandSpec::new(venv_bin(venv, "pip"))
                .arg("install")
                .arg(requirement(module_name, fetch)),
        ],
        Action::RemoveModule {
            module_name, venv, ..
        } => vec![
            CommandSpec::new(venv_bin(venv, "pip")).args(["uninstall", "-y", module_name.as_str()]),
        ],
    }
}

/// Every command a blade would see if nothing were installed yet
///
/// Probes are left out since their outcome depends on the blade.
pub fn render_plan(plan: &ActionPlan, options: &BackendOptions) -> Vec<CommandSpec> {
    if plan.is_empty() {
        return Vec::new();
    }

    let mut commands = prepare_commands(options);
    let mut venvs = BTreeSet::new();
    for action in plan.actions() {
        if let Some(venv) = action.venv()
            && venvs.insert(venv.to_path_buf())
        {
            commands.push(venv_create(venv, options));
        }
        commands.extend(render(action));
    }
    commands
}
