//! Single-shot remote shell handshakes.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::process::{CommandError, CommandRunner};

/// Host to probe and the identity to present.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProbeTarget {
    /// Address to connect to.
    pub address: String,
    /// Remote user.
    pub user: String,
    /// Private key, when the stack generated one.
    pub identity_file: Option<Utf8PathBuf>,
}

/// Raised when a single handshake does not succeed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{address} is not reachable yet: {message}")]
pub struct ProbeError {
    /// Address that was probed.
    pub address: String,
    /// Reason reported by the probe.
    pub message: String,
}

/// Future returned by [`ConnectivityProbe::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProbeError>> + Send + 'a>>;

/// Attempts exactly one handshake per call; retrying is the caller's job.
pub trait ConnectivityProbe: Send + Sync {
    /// Connects to `target`, authenticates, and disconnects.
    fn probe<'a>(&'a self, target: &'a ProbeTarget) -> ProbeFuture<'a>;
}

/// Probe that runs the `ssh` client in batch mode and executes `true` on the
/// remote side.
#[derive(Debug)]
pub struct SshProbe<R> {
    runner: Arc<R>,
    program: String,
    connect_timeout_secs: u64,
}

impl<R: CommandRunner + 'static> SshProbe<R> {
    /// Creates a probe running `program` through `runner`.
    #[must_use]
    pub fn new(runner: R, program: impl Into<String>, connect_timeout_secs: u64) -> Self {
        Self {
            runner: Arc::new(runner),
            program: program.into(),
            connect_timeout_secs,
        }
    }

    /// Arguments passed to the client for `target`.
    #[must_use]
    pub fn arguments(&self, target: &ProbeTarget) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.connect_timeout_secs
        )));
        if let Some(identity) = &target.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(identity.as_str()));
        }
        args.push(OsString::from(format!("{}@{}", target.user, target.address)));
        args.push(OsString::from("true"));
        args
    }
}

impl<R: CommandRunner + 'static> ConnectivityProbe for SshProbe<R> {
    fn probe<'a>(&'a self, target: &'a ProbeTarget) -> ProbeFuture<'a> {
        Box::pin(async move {
            let runner = Arc::clone(&self.runner);
            let program = self.program.clone();
            let args = self.arguments(target);
            let address = target.address.clone();
            let unreachable = |message: String| ProbeError {
                address: target.address.clone(),
                message,
            };

            let output = tokio::task::spawn_blocking(move || runner.run(&program, &args))
                .await
                .map_err(|err| unreachable(err.to_string()))?
                .map_err(|err| unreachable(err.to_string()))?;
            if output.is_success() {
                tracing::debug!(address = %address, "handshake succeeded");
                Ok(())
            } else {
                Err(unreachable(
                    CommandError::failure(&self.program, &output).to_string(),
                ))
            }
        })
    }
}
