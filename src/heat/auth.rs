//! Keystone v3 password authentication.

use reqwest::Client;

use super::HeatSession;
use super::error::HeatBackendError;
use super::types::{AuthRequest, TokenResponse, error_message, orchestration_endpoint};
use crate::config::ProviderCredentials;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Token endpoint for `auth_url`. `OS_AUTH_URL` is exported both with and
/// without the version suffix, so `/v3` is appended only when missing.
pub(super) fn token_url(auth_url: &str) -> String {
    let base = auth_url.trim().trim_end_matches('/');
    if base.ends_with("/v3") {
        format!("{base}/auth/tokens")
    } else {
        format!("{base}/v3/auth/tokens")
    }
}

/// Issues a project-scoped token and resolves the orchestration endpoint.
pub(super) async fn issue_token(
    client: &Client,
    credentials: &ProviderCredentials,
) -> Result<HeatSession, HeatBackendError> {
    let url = token_url(&credentials.auth_url);
    let transport = |err: reqwest::Error| HeatBackendError::Http {
        url: url.clone(),
        message: err.to_string(),
    };

    tracing::debug!(url = %url, user = %credentials.username, "requesting token");
    let response = client
        .post(&url)
        .json(&AuthRequest::password(credentials))
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HeatBackendError::Auth {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| HeatBackendError::MalformedResponse {
            url: url.clone(),
            message: format!("missing {SUBJECT_TOKEN_HEADER} header"),
        })?;
    let body: TokenResponse = response.json().await.map_err(|err| {
        HeatBackendError::MalformedResponse {
            url: url.clone(),
            message: err.to_string(),
        }
    })?;

    let region = credentials.region_name.as_deref();
    let orchestration_url = orchestration_endpoint(&body.token.catalog, region).ok_or_else(|| {
        HeatBackendError::Catalog {
            region: credentials.region_name.clone(),
        }
    })?;
    tracing::debug!(endpoint = %orchestration_url, "resolved orchestration endpoint");

    Ok(HeatSession {
        token,
        orchestration_url,
    })
}
