//! Error types for the Heat backend.

use thiserror::Error;

use crate::config::ConfigError;
use crate::stack::StackError;

/// Errors raised by the Heat backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HeatBackendError {
    /// Raised when credentials are incomplete. No request is sent.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a stack request is missing a required field.
    #[error("invalid stack request: {0}")]
    Validation(String),
    /// Raised when the HTTP exchange itself fails.
    #[error("request to {url} failed: {message}")]
    Http {
        /// Endpoint that was contacted.
        url: String,
        /// Transport error string.
        message: String,
    },
    /// Raised when the identity service rejects the credentials.
    #[error("authentication failed with status {status}: {message}")]
    Auth {
        /// HTTP status code.
        status: u16,
        /// Message returned by the identity service.
        message: String,
    },
    /// Raised when no usable orchestration endpoint is published.
    #[error("no public orchestration endpoint in the service catalog{}", region_suffix(.region.as_deref()))]
    Catalog {
        /// Region filter, when one was configured.
        region: Option<String>,
    },
    /// Raised when the orchestration service rejects a call.
    #[error("orchestration service returned {status}: {message}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Message returned by the orchestration service.
        message: String,
    },
    /// Raised when a response body does not match the documented shape.
    #[error("unexpected response from {url}: {message}")]
    MalformedResponse {
        /// Endpoint that returned the body.
        url: String,
        /// Parse error string.
        message: String,
    },
    /// Raised when a stack output cannot be represented as text.
    #[error("stack output '{key}' is not a scalar value")]
    MalformedOutput {
        /// Output key.
        key: String,
    },
}

impl HeatBackendError {
    /// Returns `true` for transport failures and server-side (5xx) rejections,
    /// which may clear on a later request.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn region_suffix(region: Option<&str>) -> String {
    region.map_or_else(String::new, |name| format!(" for region {name}"))
}

impl From<ConfigError> for HeatBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<StackError> for HeatBackendError {
    fn from(value: StackError) -> Self {
        Self::Validation(value.to_string())
    }
}
