//! Drives a stack to a complete, reachable state.
//!
//! The orchestrator decides between create, update, and reuse, polls the
//! stack until it settles, persists the routing file and any generated key,
//! and holds the run at a readiness barrier until the hosts answer. Control
//! then returns to the caller, which hands off to the playbook run.

mod config;
mod error;
mod phase;

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::KeyAgent;
use crate::artifacts::ArtifactStore;
use crate::config::ProviderCredentials;
use crate::environment::EnvironmentLayout;
use crate::probe::{ConnectivityProbe, ProbeTarget};
use crate::readiness::{ReadinessGate, ReadinessReport};
use crate::retry::{RetryPolicy, sleep_or_cancel};
use crate::routing::RoutingTable;
use crate::stack::{
    StackOutputs, StackProvider, StackRequest, StackSnapshot, StackStatus, parse_parameters,
};

pub use config::ProvisionConfig;
pub use error::ProvisionError;
pub use phase::{PhaseTrace, ProvisionPhase};

/// What the orchestrator submitted for the stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StackAction {
    /// The stack did not exist and was created.
    Created,
    /// The stack existed and an update was submitted.
    Updated,
    /// The stack existed and was used as found.
    Reused,
}

/// Inputs for a single provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Stack to create, update, or reuse.
    pub stack: StackRequest,
    /// Submit an update when the stack already exists.
    pub update_existing: bool,
    /// User for generated routing rules and handshakes.
    pub operator_user: String,
    /// Environment directory receiving generated files.
    pub layout: EnvironmentLayout,
}

impl ProvisionRequest {
    /// Builds a request from an environment directory: the template is read
    /// from the directory and the stack name defaults to its base name.
    /// Nothing is sent to the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Template`] when the template is missing and
    /// [`ProvisionError::Configuration`] when parameters or names are invalid.
    pub fn prepare<E: std::error::Error + 'static>(
        layout: EnvironmentLayout,
        stack_name: Option<&str>,
        parameters: &[String],
        update_existing: bool,
        operator_user: &str,
    ) -> Result<Self, ProvisionError<E>> {
        let template = layout.read_template()?;
        let name = match stack_name {
            Some(explicit) => explicit.to_owned(),
            None => layout.stack_name()?,
        };
        let stack = StackRequest::builder()
            .name(name)
            .template(template)
            .parameters(parse_parameters(parameters)?)
            .build()?;
        Ok(Self {
            stack,
            update_existing,
            operator_user: operator_user.to_owned(),
            layout,
        })
    }
}

/// Result of a successful run: the connection profile handed downstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionOutcome {
    /// Stack name.
    pub stack_name: String,
    /// Submission decision.
    pub action: StackAction,
    /// Status polls made after the decision.
    pub status_polls: u32,
    /// Phases entered, from `Idle` to `Done`.
    pub phases: Vec<ProvisionPhase>,
    /// Outputs of the completed stack.
    pub outputs: StackOutputs,
    /// Routing rules derived from the outputs.
    pub routing: RoutingTable,
    /// Persisted routing file.
    pub routing_path: Utf8PathBuf,
    /// Persisted private key, when the stack generated one.
    pub key_path: Option<Utf8PathBuf>,
    /// Attempts per address at the readiness barrier.
    pub readiness: ReadinessReport,
}

/// Runs provisioning against a provider, probe, and key agent.
#[derive(Debug)]
pub struct ProvisionOrchestrator<P, Q, A> {
    provider: P,
    probe: Arc<Q>,
    agent: A,
    settle_delay: Duration,
    stack_policy: RetryPolicy,
    readiness_policy: RetryPolicy,
}

impl<P, Q, A> ProvisionOrchestrator<P, Q, A>
where
    P: StackProvider,
    Q: ConnectivityProbe + 'static,
    A: KeyAgent,
{
    /// Creates an orchestrator using the built-in timing settings.
    #[must_use]
    pub fn new(provider: P, probe: Arc<Q>, agent: A) -> Self {
        Self {
            provider,
            probe,
            agent,
            settle_delay: Duration::ZERO,
            stack_policy: RetryPolicy::unbounded(Duration::ZERO),
            readiness_policy: RetryPolicy::unbounded(Duration::ZERO),
        }
        .with_settings(&ProvisionConfig::defaults())
    }

    /// Applies timing settings from configuration.
    #[must_use]
    pub const fn with_settings(mut self, settings: &ProvisionConfig) -> Self {
        self.settle_delay = settings.settle_delay();
        self.stack_policy = settings.stack_policy();
        self.readiness_policy = settings.readiness_policy();
        self
    }

    /// Overrides the pause after a submission.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Overrides the stack polling budget.
    #[must_use]
    pub const fn with_stack_policy(mut self, policy: RetryPolicy) -> Self {
        self.stack_policy = policy;
        self
    }

    /// Overrides the readiness budget.
    #[must_use]
    pub const fn with_readiness_policy(mut self, policy: RetryPolicy) -> Self {
        self.readiness_policy = policy;
        self
    }

    /// Runs the provisioning state machine to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when authentication, submission, polling,
    /// persistence, key registration, or the readiness barrier fail, or when
    /// `cancel` fires.
    pub async fn execute(
        &self,
        credentials: &ProviderCredentials,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome, ProvisionError<P::Error>> {
        let mut trace = PhaseTrace::default();
        let result = self.run(credentials, request, cancel, &mut trace).await;
        if let Err(err) = &result {
            warn!(
                stack = %request.stack.name,
                phase = %trace.current(),
                error = %err,
                "provisioning failed"
            );
        }
        result
    }

    async fn run(
        &self,
        credentials: &ProviderCredentials,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
        trace: &mut PhaseTrace,
    ) -> Result<ProvisionOutcome, ProvisionError<P::Error>> {
        let name = request.stack.name.as_str();
        let provider_error = |source| ProvisionError::Provider {
            stack: name.to_owned(),
            source,
        };

        credentials.validate()?;
        let session = self
            .provider
            .authenticate(credentials)
            .await
            .map_err(provider_error)?;
        let existing = self
            .provider
            .get_stack(&session, name)
            .await
            .map_err(provider_error)?;

        let action = self
            .submit(&session, request, &existing, trace)
            .await
            .map_err(provider_error)?;
        if action != StackAction::Reused && sleep_or_cancel(self.settle_delay, cancel).await {
            return Err(ProvisionError::Cancelled);
        }

        trace.enter(ProvisionPhase::Polling);
        let (snapshot, status_polls) = self.poll_until_settled(&session, name, cancel).await?;
        trace.enter(ProvisionPhase::OutputsReady);
        info!(stack = %name, ?action, polls = status_polls, "stack complete");

        let key_path = request.layout.generated_key();
        let routing =
            RoutingTable::build(&snapshot.outputs, &request.operator_user, &key_path)?;
        let store = ArtifactStore::open(request.layout.root())?;
        let persisted_key = match routing.private_key() {
            Some(key) => {
                let path = store.write_key(key)?;
                self.agent.register(&path)?;
                Some(path)
            }
            None => None,
        };
        let routing_path = store.write_routing(&routing.render())?;
        trace.enter(ProvisionPhase::RoutingBuilt);

        trace.enter(ProvisionPhase::ReadinessWait);
        let targets = routing
            .readiness_targets()
            .into_iter()
            .map(|address| ProbeTarget {
                address,
                user: request.operator_user.clone(),
                identity_file: persisted_key.clone(),
            })
            .collect();
        let readiness = ReadinessGate::new(Arc::clone(&self.probe), self.readiness_policy)
            .wait(targets, cancel)
            .await?;
        trace.enter(ProvisionPhase::Done);

        Ok(ProvisionOutcome {
            stack_name: name.to_owned(),
            action,
            status_polls,
            phases: trace.phases().to_vec(),
            outputs: snapshot.outputs,
            routing,
            routing_path,
            key_path: persisted_key,
            readiness,
        })
    }

    /// Creates an absent stack, updates a present one when asked, and
    /// otherwise leaves it alone.
    async fn submit(
        &self,
        session: &P::Session,
        request: &ProvisionRequest,
        existing: &StackSnapshot,
        trace: &mut PhaseTrace,
    ) -> Result<StackAction, P::Error> {
        let name = request.stack.name.as_str();
        if existing.status == StackStatus::Absent {
            trace.enter(ProvisionPhase::Submitting);
            info!(stack = %name, "creating stack");
            self.provider.create_stack(session, &request.stack).await?;
            Ok(StackAction::Created)
        } else if request.update_existing {
            trace.enter(ProvisionPhase::Submitting);
            info!(stack = %name, status = %existing.status_text, "updating stack");
            self.provider
                .update_stack(session, name, &request.stack)
                .await?;
            Ok(StackAction::Updated)
        } else {
            info!(stack = %name, status = %existing.status_text, "reusing existing stack");
            Ok(StackAction::Reused)
        }
    }

    async fn poll_until_settled(
        &self,
        session: &P::Session,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(StackSnapshot, u32), ProvisionError<P::Error>> {
        let started = Instant::now();
        let mut polls = 0_u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            polls = polls.saturating_add(1);
            let last_status = match self.provider.get_stack(session, name).await {
                Ok(snapshot) => match snapshot.status {
                    StackStatus::Complete => return Ok((snapshot, polls)),
                    StackStatus::InProgress => {
                        debug!(stack = %name, status = %snapshot.status_text, polls, "waiting on stack");
                        snapshot.status_text
                    }
                    StackStatus::Failed | StackStatus::Absent => {
                        return Err(ProvisionError::StackFailed {
                            name: name.to_owned(),
                            status: snapshot.status_text,
                        });
                    }
                },
                Err(err) if self.provider.is_transient(&err) => {
                    warn!(stack = %name, error = %err, polls, "stack status poll failed; retrying");
                    format!("poll error: {err}")
                }
                Err(source) => {
                    return Err(ProvisionError::Provider {
                        stack: name.to_owned(),
                        source,
                    });
                }
            };
            if self.stack_policy.is_exhausted(polls, started) {
                return Err(ProvisionError::StackTimeout {
                    name: name.to_owned(),
                    status: last_status,
                });
            }
            if sleep_or_cancel(self.stack_policy.interval, cancel).await {
                return Err(ProvisionError::Cancelled);
            }
        }
    }
}
