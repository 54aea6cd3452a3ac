//! Core library for the Stacksmith provisioning tool.
//!
//! The crate drives an OpenStack Heat stack to a complete state, turns its
//! outputs into an SSH routing file, waits for every host to accept a
//! handshake, and then hands the environment to `ansible-playbook` or `ansible`.

pub mod agent;
pub mod artifacts;
pub mod config;
pub mod environment;
pub mod heat;
pub mod logging;
pub mod playbook;
pub mod probe;
pub mod process;
pub mod provision;
pub mod readiness;
pub mod retry;
pub mod routing;
pub mod stack;
pub mod test_support;

pub use agent::{AgentError, KeyAgent, SshAgent};
pub use artifacts::{ArtifactError, ArtifactStore};
pub use config::{ConfigError, OpenStackConfig, ProviderCredentials};
pub use environment::{EnvironmentError, EnvironmentLayout};
pub use heat::{HeatBackend, HeatBackendError, HeatSession};
pub use playbook::{ModuleInvocation, PlaybookEnvironment, PlaybookError, PlaybookInvocation};
pub use probe::{ConnectivityProbe, ProbeError, ProbeTarget, SshProbe};
pub use process::{
    CommandError, CommandOutput, CommandRunner, InheritedStdioRunner, ProcessCommandRunner,
    StreamingRunner,
};
pub use provision::{
    ProvisionConfig, ProvisionError, ProvisionOrchestrator, ProvisionOutcome, ProvisionPhase,
    ProvisionRequest, StackAction,
};
pub use readiness::{ReadinessError, ReadinessGate, ReadinessReport};
pub use retry::RetryPolicy;
pub use routing::{RoutingError, RoutingRule, RoutingTable};
pub use stack::{
    StackError, StackOutputs, StackProvider, StackRequest, StackSnapshot, StackStatus,
};
