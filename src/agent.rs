//! Registration of generated keys with the local SSH agent.

use std::ffi::OsString;

use camino::Utf8Path;
use thiserror::Error;

use crate::process::{CommandError, CommandRunner, render_command};

/// Raised when the agent refuses a key or cannot be reached.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to register {path} with the SSH agent: {source}")]
pub struct AgentError {
    /// Key that could not be registered.
    pub path: String,
    /// Underlying command failure.
    #[source]
    pub source: CommandError,
}

/// Adds private keys to an authentication agent.
pub trait KeyAgent: Send + Sync {
    /// Registers the key stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the agent rejects the key.
    fn register(&self, path: &Utf8Path) -> Result<(), AgentError>;
}

/// Agent backed by the `ssh-add` binary.
#[derive(Clone, Debug)]
pub struct SshAgent<R: CommandRunner> {
    runner: R,
    program: String,
}

impl<R: CommandRunner> SshAgent<R> {
    /// Creates an agent that invokes `program` through `runner`.
    #[must_use]
    pub fn new(runner: R, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

impl<R: CommandRunner> KeyAgent for SshAgent<R> {
    fn register(&self, path: &Utf8Path) -> Result<(), AgentError> {
        let args = vec![OsString::from(path.as_str())];
        tracing::debug!(command = %render_command(&self.program, &args), "registering key");
        let failed = |source| AgentError {
            path: path.to_string(),
            source,
        };
        let output = self.runner.run(&self.program, &args).map_err(failed)?;
        if output.is_success() {
            Ok(())
        } else {
            Err(failed(CommandError::failure(&self.program, &output)))
        }
    }
}
