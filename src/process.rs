//! Command runner abstraction over external programs (`ssh`, `ssh-add`,
//! `ansible-playbook`) so tests can script their outcomes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::process::{Command, Stdio};

use shell_escape::unix::escape;
use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when the process was killed.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while starting or running an external command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Failure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

impl CommandError {
    /// Builds a [`CommandError::Failure`] from captured output.
    #[must_use]
    pub fn failure(program: &str, output: &CommandOutput) -> Self {
        Self::Failure {
            program: program.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        }
    }
}

/// Abstraction over captured command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs a long-lived command whose output belongs on the operator's terminal.
pub trait StreamingRunner {
    /// Runs `program` with inherited stdio and an explicit environment
    /// overlay, returning the exit code (`None` when killed by a signal).
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn stream(
        &self,
        program: &str,
        args: &[OsString],
        env: &BTreeMap<String, String>,
    ) -> Result<Option<i32>, CommandError>;
}

/// Streams child output straight to the parent's stdout and stderr.
#[derive(Clone, Copy, Debug, Default)]
pub struct InheritedStdioRunner;

impl StreamingRunner for InheritedStdioRunner {
    fn stream(
        &self,
        program: &str,
        args: &[OsString],
        env: &BTreeMap<String, String>,
    ) -> Result<Option<i32>, CommandError> {
        let status = Command::new(program)
            .args(args)
            .envs(env)
            .status()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;
        Ok(status.code())
    }
}

/// Renders a command line for log output, shell-escaping each argument.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = escape(program.into()).into_owned();
    for arg in args {
        let lossy = arg.to_string_lossy();
        rendered.push(' ');
        rendered.push_str(escape(lossy).as_ref());
    }
    rendered
}
