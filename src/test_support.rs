//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::agent::{AgentError, KeyAgent};
use crate::config::ProviderCredentials;
use crate::probe::{ConnectivityProbe, ProbeError, ProbeFuture, ProbeTarget};
use crate::process::{CommandError, CommandOutput, CommandRunner, StreamingRunner};
use crate::stack::{
    ProviderFuture, StackOutputs, StackProvider, StackRequest, StackSnapshot, StackStatus,
};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Environment overlay, for streamed commands.
    pub env: BTreeMap<String, String>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<CommandOutput>,
    invocations: Vec<CommandInvocation>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order and
/// succeeds silently once the script runs out.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_success(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        locked(&self.state).responses.push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Returns `(program, args)` pairs recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<(String, Vec<String>)> {
        locked(&self.state)
            .invocations
            .iter()
            .map(|invocation| {
                (
                    invocation.program.clone(),
                    invocation
                        .args
                        .iter()
                        .map(|arg| arg.to_string_lossy().into_owned())
                        .collect(),
                )
            })
            .collect()
    }

    /// Returns full invocation records, environment overlays included.
    #[must_use]
    pub fn records(&self) -> Vec<CommandInvocation> {
        locked(&self.state).invocations.clone()
    }

    fn next(
        &self,
        program: &str,
        args: &[OsString],
        env: &BTreeMap<String, String>,
    ) -> CommandOutput {
        let mut state = locked(&self.state);
        state.invocations.push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            env: env.clone(),
        });
        state.responses.pop_front().unwrap_or(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        Ok(self.next(program, args, &BTreeMap::new()))
    }
}

impl StreamingRunner for ScriptedRunner {
    fn stream(
        &self,
        program: &str,
        args: &[OsString],
        env: &BTreeMap<String, String>,
    ) -> Result<Option<i32>, CommandError> {
        Ok(self.next(program, args, env).code)
    }
}

/// Error returned by [`ScriptedProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct ScriptedProviderError {
    /// Error text.
    pub message: String,
    /// Whether a later status poll may succeed.
    pub transient: bool,
}

impl ScriptedProviderError {
    /// Error that may clear on a later poll.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// Error that never clears.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// A call observed by [`ScriptedProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `authenticate` was called.
    Authenticate,
    /// `get_stack` was called for the named stack.
    GetStack(String),
    /// `create_stack` was called with the request.
    CreateStack(StackRequest),
    /// `update_stack` was called for the named stack.
    UpdateStack(String),
}

#[derive(Clone, Debug)]
enum ScriptedLookup {
    Snapshot(StackSnapshot),
    Error(ScriptedProviderError),
}

#[derive(Debug, Default)]
struct ProviderState {
    lookups: VecDeque<ScriptedLookup>,
    last: Option<StackSnapshot>,
    reject_submissions: Option<String>,
    calls: Vec<ProviderCall>,
}

/// In-memory provider replaying scripted `get_stack` results in order. Once
/// the script runs out the last snapshot repeats; with no script at all the
/// stack is absent.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl ScriptedProvider {
    /// Creates a provider with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a lookup result.
    pub fn push_snapshot(&self, snapshot: StackSnapshot) {
        locked(&self.state)
            .lookups
            .push_back(ScriptedLookup::Snapshot(snapshot));
    }

    /// Queues a lookup reporting `status` with Heat-style status text and no
    /// outputs.
    pub fn push_status(&self, status: StackStatus) {
        let snapshot = match status {
            StackStatus::Absent => StackSnapshot::absent(),
            StackStatus::InProgress => StackSnapshot::with_status(status, "CREATE_IN_PROGRESS"),
            StackStatus::Complete => StackSnapshot::with_status(status, "CREATE_COMPLETE"),
            StackStatus::Failed => StackSnapshot::with_status(status, "CREATE_FAILED"),
        };
        self.push_snapshot(snapshot);
    }

    /// Queues a complete lookup carrying `outputs`.
    pub fn push_complete(&self, outputs: StackOutputs) {
        self.push_snapshot(StackSnapshot {
            status: StackStatus::Complete,
            status_text: String::from("CREATE_COMPLETE"),
            outputs,
        });
    }

    /// Queues a lookup failing with an error a later poll may clear.
    pub fn push_error(&self, message: impl Into<String>) {
        locked(&self.state)
            .lookups
            .push_back(ScriptedLookup::Error(ScriptedProviderError::transient(
                message,
            )));
    }

    /// Queues a lookup failing with an error that never clears.
    pub fn push_fatal_error(&self, message: impl Into<String>) {
        locked(&self.state)
            .lookups
            .push_back(ScriptedLookup::Error(ScriptedProviderError::fatal(message)));
    }

    /// Makes every create and update fail with `message`.
    pub fn reject_submissions(&self, message: impl Into<String>) {
        locked(&self.state).reject_submissions = Some(message.into());
    }

    /// Calls observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        locked(&self.state).calls.clone()
    }

    /// Number of `get_stack` calls observed so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ProviderCall::GetStack(_)))
            .count()
    }

    /// Returns `true` when a create was submitted.
    #[must_use]
    pub fn created(&self) -> bool {
        self.calls()
            .iter()
            .any(|call| matches!(call, ProviderCall::CreateStack(_)))
    }

    /// Returns `true` when an update was submitted.
    #[must_use]
    pub fn updated(&self) -> bool {
        self.calls()
            .iter()
            .any(|call| matches!(call, ProviderCall::UpdateStack(_)))
    }

    fn record_submission(&self, call: ProviderCall) -> Result<(), ScriptedProviderError> {
        let mut state = locked(&self.state);
        state.calls.push(call);
        state
            .reject_submissions
            .clone()
            .map_or(Ok(()), |message| Err(ScriptedProviderError::fatal(message)))
    }
}

impl StackProvider for ScriptedProvider {
    type Error = ScriptedProviderError;
    type Session = ();

    fn authenticate<'a>(
        &'a self,
        credentials: &'a ProviderCredentials,
    ) -> ProviderFuture<'a, Self::Session, Self::Error> {
        Box::pin(async move {
            locked(&self.state).calls.push(ProviderCall::Authenticate);
            credentials
                .validate()
                .map_err(|err| ScriptedProviderError::fatal(err.to_string()))
        })
    }

    fn get_stack<'a>(
        &'a self,
        _session: &'a Self::Session,
        name: &'a str,
    ) -> ProviderFuture<'a, StackSnapshot, Self::Error> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.calls.push(ProviderCall::GetStack(name.to_owned()));
            match state.lookups.pop_front() {
                Some(ScriptedLookup::Snapshot(snapshot)) => {
                    state.last = Some(snapshot.clone());
                    Ok(snapshot)
                }
                Some(ScriptedLookup::Error(err)) => Err(err),
                None => Ok(state.last.clone().unwrap_or_else(StackSnapshot::absent)),
            }
        })
    }

    fn create_stack<'a>(
        &'a self,
        _session: &'a Self::Session,
        request: &'a StackRequest,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.record_submission(ProviderCall::CreateStack(request.clone())) })
    }

    fn update_stack<'a>(
        &'a self,
        _session: &'a Self::Session,
        name: &'a str,
        _request: &'a StackRequest,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.record_submission(ProviderCall::UpdateStack(name.to_owned())) })
    }

    fn is_transient(&self, error: &Self::Error) -> bool {
        error.transient
    }
}

#[derive(Debug, Default)]
struct ProbeScript {
    failures: BTreeMap<String, Option<u32>>,
    attempts: BTreeMap<String, u32>,
}

/// Probe whose per-address outcome is scripted: succeed, fail a fixed number
/// of times first, or never succeed.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProbe {
    state: Arc<Mutex<ProbeScript>>,
}

impl ScriptedProbe {
    /// Creates a probe for which every address answers at once.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `address` fail `count` times before answering.
    pub fn fail_times(&self, address: &str, count: u32) {
        locked(&self.state)
            .failures
            .insert(address.to_owned(), Some(count));
    }

    /// Makes `address` never answer.
    pub fn always_fail(&self, address: &str) {
        locked(&self.state).failures.insert(address.to_owned(), None);
    }

    /// Attempts made against `address`.
    #[must_use]
    pub fn attempts(&self, address: &str) -> u32 {
        locked(&self.state)
            .attempts
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Addresses probed at least once.
    #[must_use]
    pub fn probed(&self) -> BTreeSet<String> {
        locked(&self.state).attempts.keys().cloned().collect()
    }
}

impl ConnectivityProbe for ScriptedProbe {
    fn probe<'a>(&'a self, target: &'a ProbeTarget) -> ProbeFuture<'a> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            let attempts = state.attempts.entry(target.address.clone()).or_default();
            *attempts = attempts.saturating_add(1);
            let made = *attempts;
            let refused = match state.failures.get(&target.address) {
                Some(None) => true,
                Some(Some(limit)) => made <= *limit,
                None => false,
            };
            if refused {
                Err(ProbeError {
                    address: target.address.clone(),
                    message: String::from("Connection refused"),
                })
            } else {
                Ok(())
            }
        })
    }
}

/// Agent that records registered keys, optionally refusing them.
#[derive(Clone, Debug, Default)]
pub struct RecordingAgent {
    registered: Arc<Mutex<Vec<Utf8PathBuf>>>,
    refusal: Option<String>,
}

impl RecordingAgent {
    /// Creates an agent accepting every key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an agent refusing every key with `message`.
    #[must_use]
    pub fn refusing(message: impl Into<String>) -> Self {
        Self {
            registered: Arc::default(),
            refusal: Some(message.into()),
        }
    }

    /// Keys registered so far.
    #[must_use]
    pub fn registered(&self) -> Vec<Utf8PathBuf> {
        locked(&self.registered).clone()
    }
}

impl KeyAgent for RecordingAgent {
    fn register(&self, path: &Utf8Path) -> Result<(), AgentError> {
        locked(&self.registered).push(path.to_path_buf());
        match &self.refusal {
            Some(message) => Err(AgentError {
                path: path.to_string(),
                source: CommandError::Failure {
                    program: String::from("ssh-add"),
                    status: Some(2),
                    status_text: String::from("2"),
                    stderr: message.clone(),
                },
            }),
            None => Ok(()),
        }
    }
}

/// Credentials with every required field populated.
#[must_use]
pub fn sample_credentials() -> ProviderCredentials {
    ProviderCredentials {
        auth_url: String::from("https://keystone.example:5000/v3"),
        username: String::from("ops"),
        password: String::from("hunter2"),
        project_name: String::from("infra"),
        user_domain_name: String::from("Default"),
        project_domain_name: String::from("Default"),
        region_name: None,
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    /// `None` values remove the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
