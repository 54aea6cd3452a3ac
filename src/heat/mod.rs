//! OpenStack Heat implementation of the stack provider.

mod auth;
mod error;
mod types;

use std::fmt;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::ProviderCredentials;
use crate::stack::{ProviderFuture, StackProvider, StackRequest, StackSnapshot};
use types::{CreateStackBody, StackEnvelope, UpdateStackBody, error_message};

pub use error::HeatBackendError;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated orchestration session.
#[derive(Clone, Eq, PartialEq)]
pub struct HeatSession {
    token: String,
    orchestration_url: String,
}

impl HeatSession {
    /// Orchestration endpoint resolved from the service catalog.
    #[must_use]
    pub fn orchestration_url(&self) -> &str {
        &self.orchestration_url
    }
}

impl fmt::Debug for HeatSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HeatSession")
            .field("token", &"<redacted>")
            .field("orchestration_url", &self.orchestration_url)
            .finish()
    }
}

/// Provider that manages stacks through the Heat v1 REST API.
#[derive(Clone, Debug)]
pub struct HeatBackend {
    client: Client,
}

impl HeatBackend {
    /// Constructs a backend with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`HeatBackendError::Http`] when the HTTP client cannot be
    /// initialised.
    pub fn new() -> Result<Self, HeatBackendError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| HeatBackendError::Http {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing HTTP client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn stack_url(session: &HeatSession, name: &str) -> String {
        format!("{}/stacks/{name}", session.orchestration_url)
    }

    async fn send(
        request: RequestBuilder,
        session: &HeatSession,
        url: &str,
    ) -> Result<Response, HeatBackendError> {
        request
            .header(AUTH_TOKEN_HEADER, &session.token)
            .send()
            .await
            .map_err(|err| HeatBackendError::Http {
                url: url.to_owned(),
                message: err.to_string(),
            })
    }

    async fn expect_success(response: Response) -> Result<Response, HeatBackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(HeatBackendError::Provider {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        url: &str,
    ) -> Result<T, HeatBackendError> {
        response
            .json()
            .await
            .map_err(|err| HeatBackendError::MalformedResponse {
                url: url.to_owned(),
                message: err.to_string(),
            })
    }

    /// Fetches the stack body, or `None` when Heat reports it missing.
    async fn find_stack(
        &self,
        session: &HeatSession,
        name: &str,
    ) -> Result<Option<StackEnvelope>, HeatBackendError> {
        let url = Self::stack_url(session, name);
        let response = Self::send(self.client.get(&url), session, &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let checked = Self::expect_success(response).await?;
        Self::decode(checked, &url).await.map(Some)
    }
}

impl StackProvider for HeatBackend {
    type Error = HeatBackendError;
    type Session = HeatSession;

    fn authenticate<'a>(
        &'a self,
        credentials: &'a ProviderCredentials,
    ) -> ProviderFuture<'a, Self::Session, Self::Error> {
        Box::pin(async move {
            credentials.validate()?;
            auth::issue_token(&self.client, credentials).await
        })
    }

    fn get_stack<'a>(
        &'a self,
        session: &'a Self::Session,
        name: &'a str,
    ) -> ProviderFuture<'a, StackSnapshot, Self::Error> {
        Box::pin(async move {
            match self.find_stack(session, name).await? {
                Some(envelope) => envelope.stack.into_snapshot(),
                None => Ok(StackSnapshot::absent()),
            }
        })
    }

    fn create_stack<'a>(
        &'a self,
        session: &'a Self::Session,
        request: &'a StackRequest,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let url = format!("{}/stacks", session.orchestration_url);
            let body = CreateStackBody {
                stack_name: &request.name,
                template: &request.template,
                parameters: &request.parameters,
            };
            let response = Self::send(self.client.post(&url).json(&body), session, &url).await?;
            Self::expect_success(response).await?;
            tracing::info!(stack = %request.name, "stack create submitted");
            Ok(())
        })
    }

    fn update_stack<'a>(
        &'a self,
        session: &'a Self::Session,
        name: &'a str,
        request: &'a StackRequest,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let envelope = self.find_stack(session, name).await?.ok_or_else(|| {
                HeatBackendError::Provider {
                    status: StatusCode::NOT_FOUND.as_u16(),
                    message: format!("stack {name} disappeared before update"),
                }
            })?;
            let url = format!("{}/{}", Self::stack_url(session, name), envelope.stack.id);
            let body = UpdateStackBody {
                template: &request.template,
                parameters: &request.parameters,
            };
            let response = Self::send(self.client.put(&url).json(&body), session, &url).await?;
            Self::expect_success(response).await?;
            tracing::info!(stack = %name, "stack update submitted");
            Ok(())
        })
    }

    fn is_transient(&self, error: &Self::Error) -> bool {
        error.is_transient()
    }
}
