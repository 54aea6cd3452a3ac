//! Shared fixtures for provisioning BDD scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use stacksmith::test_support::{RecordingAgent, ScriptedProbe, ScriptedProvider};
use stacksmith::{ProvisionError, ProvisionOutcome, StackOutputs};
use tempfile::TempDir;

pub const NODE1: &str = "10.0.0.5";
pub const NODE2: &str = "10.0.0.6";
pub const GATEWAY: &str = "203.0.113.10";

/// Routing document expected for two hosts behind `GATEWAY` and user `ops`.
pub const GATEWAY_ROUTING: &str = "\
Host *
  User ops
  ForwardAgent yes
  UserKnownHostsFile /dev/null
  StrictHostKeyChecking no
  PasswordAuthentication no

Host gateway
  Hostname 203.0.113.10

Host node1
  Hostname 10.0.0.5
  ProxyCommand ssh -W %h:%p -o StrictHostKeyChecking=no ops@203.0.113.10

Host node2
  Hostname 10.0.0.6
  ProxyCommand ssh -W %h:%p -o StrictHostKeyChecking=no ops@203.0.113.10
";

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub root: Utf8PathBuf,
    pub provider: ScriptedProvider,
    pub probe: Arc<ScriptedProbe>,
    pub agent: RecordingAgent,
    pub update_existing: Arc<std::sync::atomic::AtomicBool>,
    _tmp: Arc<TempDir>,
}

impl ProvisionContext {
    pub fn new(name: &str) -> Self {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("create temp dir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().join(name))
            .unwrap_or_else(|path| panic!("non-UTF-8 temp path {}", path.display()));
        std::fs::create_dir(&root).unwrap_or_else(|err| panic!("create {root}: {err}"));
        Self {
            root,
            provider: ScriptedProvider::new(),
            probe: Arc::new(ScriptedProbe::new()),
            agent: RecordingAgent::new(),
            update_existing: Arc::default(),
            _tmp: Arc::new(tmp),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Configuration,
    Template,
    Provider,
    Stack,
    Routing,
    Artifact,
    Credential,
    Connectivity,
    Cancelled,
}

impl FailureKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "configuration" => Some(Self::Configuration),
            "template" => Some(Self::Template),
            "provider" => Some(Self::Provider),
            "stack" => Some(Self::Stack),
            "routing" => Some(Self::Routing),
            "artifact" => Some(Self::Artifact),
            "credential" => Some(Self::Credential),
            "connectivity" => Some(Self::Connectivity),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn of<E: std::error::Error + 'static>(err: &ProvisionError<E>) -> Self {
        match err {
            ProvisionError::Configuration(_) => Self::Configuration,
            ProvisionError::Template(_) => Self::Template,
            ProvisionError::Provider { .. } => Self::Provider,
            ProvisionError::StackFailed { .. } | ProvisionError::StackTimeout { .. } => {
                Self::Stack
            }
            ProvisionError::Routing(_) => Self::Routing,
            ProvisionError::Artifact(_) => Self::Artifact,
            ProvisionError::Credential(_) => Self::Credential,
            ProvisionError::ConnectivityTimeout { .. } => Self::Connectivity,
            ProvisionError::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ProvisionResult {
    Pending,
    Success(Box<ProvisionOutcome>),
    Failure { kind: FailureKind, message: String },
}

pub fn two_hosts() -> StackOutputs {
    [("node1", NODE1), ("node2", NODE2)].into_iter().collect()
}

#[fixture]
pub fn provision_context() -> ProvisionContext {
    ProvisionContext::new("staging")
}

#[fixture]
pub fn provision_result() -> ProvisionResult {
    ProvisionResult::Pending
}
