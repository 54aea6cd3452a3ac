//! Error type for provisioning runs.

use thiserror::Error;

use crate::agent::AgentError;
use crate::artifacts::ArtifactError;
use crate::config::ConfigError;
use crate::environment::EnvironmentError;
use crate::readiness::ReadinessError;
use crate::routing::RoutingError;
use crate::stack::StackError;

/// Errors surfaced while provisioning an environment.
#[derive(Debug, Error)]
pub enum ProvisionError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Raised when credentials, settings, or parameters are unusable.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// Raised when a required environment file is absent or unreadable.
    #[error(transparent)]
    Template(#[from] EnvironmentError),
    /// Raised when the provider rejects an operation.
    #[error("stack {stack}: {source}")]
    Provider {
        /// Stack being provisioned.
        stack: String,
        /// Provider-specific error.
        #[source]
        source: ProviderError,
    },
    /// Raised when the stack ends in a state other than complete.
    #[error("stack {name} returned an unexpected status ({status})")]
    StackFailed {
        /// Stack name.
        name: String,
        /// Last status reported by the provider.
        status: String,
    },
    /// Raised when the stack is still in progress once the poll budget runs
    /// out.
    #[error("stack {name} did not settle in time; last status {status}")]
    StackTimeout {
        /// Stack name.
        name: String,
        /// Last status reported by the provider.
        status: String,
    },
    /// Raised when stack outputs cannot be turned into routing rules.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// Raised when generated files cannot be persisted.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Raised when the generated key cannot be registered.
    #[error(transparent)]
    Credential(#[from] AgentError),
    /// Raised when hosts never answer a handshake.
    #[error("hosts never became reachable: {}", .unreachable.join(", "))]
    ConnectivityTimeout {
        /// Addresses that never answered.
        unreachable: Vec<String>,
    },
    /// Raised when the run is cancelled.
    #[error("provisioning cancelled")]
    Cancelled,
}

impl<E: std::error::Error + 'static> From<StackError> for ProvisionError<E> {
    fn from(value: StackError) -> Self {
        Self::Configuration(ConfigError::Invalid {
            field: String::from("stack"),
            message: value.to_string(),
        })
    }
}

impl<E: std::error::Error + 'static> From<ReadinessError> for ProvisionError<E> {
    fn from(value: ReadinessError) -> Self {
        match value {
            ReadinessError::ConnectivityTimeout { unreachable } => {
                Self::ConnectivityTimeout { unreachable }
            }
            ReadinessError::Cancelled => Self::Cancelled,
        }
    }
}
