//! Command runners: where blade commands actually execute.
//!
//! [`LocalRunner`] runs on this host, [`SshRunner`] wraps each command in an
//! `ssh` invocation against the blade, and [`RecordingRunner`] records calls
//! and answers from a script for tests and previews.

use planner::BladeInstance;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::Mutex;
use std::thread;

use crate::error::{Error, Result};

/// One command to run on a blade
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
    /// Text fed to the command's standard input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-quoted command line, environment assignments first
    pub fn command_line(&self) -> String {
        let words = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}={}", quote(v)))
            .chain(std::iter::once(quote(&self.program)))
            .chain(self.args.iter().map(|a| quote(a)));
        words.collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn quote(word: &str) -> String {
    shlex::try_quote(word).map_or_else(|_| word.to_string(), |q| q.into_owned())
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            status: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Something that can run a command against a blade
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output; a non-zero exit is not an error
    fn run(&self, blade: &BladeInstance, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on this host, ignoring the blade's address
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn run(&self, _blade: &BladeInstance, spec: &CommandSpec) -> Result<CommandOutput> {
        let spawn_error = |source| Error::Spawn {
            command: spec.command_line(),
            source,
        };

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        // Feed stdin from its own thread while output is collected
        let output = thread::scope(|scope| -> io::Result<Output> {
            let writer = match (child.stdin.take(), spec.stdin.as_deref()) {
                (Some(mut pipe), Some(input)) => {
                    Some(scope.spawn(move || pipe.write_all(input.as_bytes())))
                }
                _ => None,
            };
            let output = child.wait_with_output()?;
            match writer.map(|w| w.join()) {
                // A child may exit without reading all of its input
                Some(Ok(Err(e))) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                Some(Err(_)) => Err(io::Error::other("stdin writer panicked")),
                _ => Ok(output),
            }
        })
        .map_err(spawn_error)?;
        Ok(output.into())
    }
}

/// Runs commands on the blade over ssh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshRunner {
    pub user: String,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
}

impl Default for SshRunner {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: None,
            identity_file: None,
        }
    }
}

impl SshRunner {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// The local `ssh` invocation that runs `spec` on the blade
    pub fn wrap(&self, blade: &BladeInstance, spec: &CommandSpec) -> CommandSpec {
        let mut ssh = CommandSpec::new("ssh").args([
            "-o",
            "BatchMode=yes",
            "-o",
            "NoHostAuthenticationForLocalhost=yes",
            "-o",
            "StrictHostKeyChecking=no",
        ]);
        if let Some(port) = self.port {
            ssh = ssh.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            ssh = ssh.arg("-i").arg(identity.display().to_string());
        }
        ssh = ssh
            .arg(format!("{}@{}", self.user, blade.host()))
            .arg("--")
            .arg(spec.command_line());
        ssh.stdin = spec.stdin.clone();
        ssh
    }
}

impl CommandRunner for SshRunner {
    fn run(&self, blade: &BladeInstance, spec: &CommandSpec) -> Result<CommandOutput> {
        let wrapped = self.wrap(blade, spec);
        log::trace!("{}: {}", blade.id, wrapped);
        LocalRunner.run(blade, &wrapped)
    }
}

/// A call seen by a [`RecordingRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub blade: String,
    pub command: String,
    pub stdin: Option<String>,
}

/// Records every command and answers from scripted responses
///
/// A response applies to every command line containing its pattern; the most
/// recently added matching response wins. Unmatched commands succeed with no
/// output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    responses: Mutex<Vec<(String, CommandOutput)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `output`
    pub fn respond(self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push((pattern.into(), output));
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Command lines of every call, in order
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, blade: &BladeInstance, spec: &CommandSpec) -> Result<CommandOutput> {
        let command = spec.command_line();
        let output = self
            .responses
            .lock()
            .ok()
            .and_then(|responses| {
                responses
                    .iter()
                    .rev()
                    .find(|(pattern, _)| command.contains(pattern.as_str()))
                    .map(|(_, output)| output.clone())
            })
            .unwrap_or_else(CommandOutput::success);

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                blade: blade.id.clone(),
                command,
                stdin: spec.stdin.clone(),
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blade() -> BladeInstance {
        BladeInstance::new("blade1", "dhcp_blade").with_address("10.255.1.1")
    }

    #[test]
    fn test_command_line_quotes_arguments() {
        let spec = CommandSpec::new("pip")
            .arg("install")
            .arg("PyYAML>=6")
            .env("DEBIAN_FRONTEND", "noninteractive");
        assert_eq!(
            spec.command_line(),
            "DEBIAN_FRONTEND=noninteractive pip install 'PyYAML>=6'"
        );
    }

    #[test]
    fn test_ssh_wrap() {
        let runner = SshRunner::new("root")
            .with_port(2222)
            .with_identity_file("/root/.ssh/id_blade");
        let spec = CommandSpec::new("systemctl").args(["enable", "--now", "kea-dhcp4-server"]);
        let wrapped = runner.wrap(&blade(), &spec);
        assert_eq!(wrapped.program, "ssh");
        assert_eq!(
            wrapped.args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "NoHostAuthenticationForLocalhost=yes",
                "-o",
                "StrictHostKeyChecking=no",
                "-p",
                "2222",
                "-i",
                "/root/.ssh/id_blade",
                "root@10.255.1.1",
                "--",
                "systemctl enable --now kea-dhcp4-server",
            ]
        );
    }

    #[test]
    fn test_ssh_wrap_keeps_stdin() {
        let spec = CommandSpec::new("debconf-set-selections").stdin("kea kea/start boolean false\n");
        let wrapped = SshRunner::default().wrap(&BladeInstance::new("blade2", "web"), &spec);
        assert_eq!(wrapped.stdin.as_deref(), Some("kea kea/start boolean false\n"));
        assert!(wrapped.args.contains(&"root@blade2".to_string()));
    }

    #[test]
    fn test_recording_runner_scripted_responses() {
        let runner = RecordingRunner::new()
            .respond("pip show", CommandOutput::failure(1, ""))
            .respond("pip show PyYAML", CommandOutput::success());
        let show = |name: &str| {
            CommandSpec::new("/venv/bin/pip").args(["show", name])
        };
        assert!(runner.run(&blade(), &show("PyYAML")).unwrap().is_success());
        assert!(!runner.run(&blade(), &show("requests")).unwrap().is_success());
        assert!(runner
            .run(&blade(), &CommandSpec::new("true"))
            .unwrap()
            .is_success());
        assert_eq!(runner.calls().len(), 3);
        assert_eq!(runner.calls()[0].blade, "blade1");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_runner_captures_output_and_stdin() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "cat; echo err >&2; exit 3"])
            .stdin("hello");
        let output = LocalRunner.run(&blade(), &spec).unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_runner_large_stdin_echoed_back() {
        let input = "d-i debian-installer/locale string en_US\n".repeat(32 * 1024);
        let spec = CommandSpec::new("cat").stdin(input.clone());
        let output = LocalRunner.run(&blade(), &spec).unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout.len(), input.len());
    }

    #[test]
    fn test_local_runner_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-program-4242");
        let err = LocalRunner.run(&blade(), &spec).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_local_runner_env() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "printf %s \"$BLADE_TEST\""])
            .env("BLADE_TEST", "value");
        let output = LocalRunner.run(&blade(), &spec).unwrap();
        assert_eq!(output.stdout, "value");
    }
}
