//! Wire types for the Keystone v3 and Heat v1 APIs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::HeatBackendError;
use crate::config::ProviderCredentials;
use crate::stack::{StackOutputs, StackSnapshot, StackStatus};

#[derive(Debug, Serialize)]
pub(super) struct AuthRequest<'a> {
    auth: Auth<'a>,
}

#[derive(Debug, Serialize)]
struct Auth<'a> {
    identity: Identity<'a>,
    scope: Scope<'a>,
}

#[derive(Debug, Serialize)]
struct Identity<'a> {
    methods: [&'static str; 1],
    password: PasswordMethod<'a>,
}

#[derive(Debug, Serialize)]
struct PasswordMethod<'a> {
    user: User<'a>,
}

#[derive(Debug, Serialize)]
struct User<'a> {
    name: &'a str,
    domain: Named<'a>,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct Scope<'a> {
    project: Project<'a>,
}

#[derive(Debug, Serialize)]
struct Project<'a> {
    name: &'a str,
    domain: Named<'a>,
}

#[derive(Debug, Serialize)]
struct Named<'a> {
    name: &'a str,
}

impl<'a> AuthRequest<'a> {
    pub(super) fn password(credentials: &'a ProviderCredentials) -> Self {
        Self {
            auth: Auth {
                identity: Identity {
                    methods: ["password"],
                    password: PasswordMethod {
                        user: User {
                            name: credentials.username.as_str(),
                            domain: Named {
                                name: credentials.user_domain_name.as_str(),
                            },
                            password: credentials.password.as_str(),
                        },
                    },
                },
                scope: Scope {
                    project: Project {
                        name: credentials.project_name.as_str(),
                        domain: Named {
                            name: credentials.project_domain_name.as_str(),
                        },
                    },
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub(super) token: Token,
}

#[derive(Debug, Deserialize)]
pub(super) struct Token {
    #[serde(default)]
    pub(super) catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CatalogEntry {
    #[serde(rename = "type")]
    pub(super) service_type: String,
    #[serde(default)]
    pub(super) endpoints: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Endpoint {
    pub(super) interface: String,
    #[serde(default)]
    pub(super) region: Option<String>,
    #[serde(default)]
    pub(super) region_id: Option<String>,
    pub(super) url: String,
}

/// Picks the public orchestration endpoint, honouring `region` when set.
pub(super) fn orchestration_endpoint(catalog: &[CatalogEntry], region: Option<&str>) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == "orchestration")
        .flat_map(|entry| entry.endpoints.iter())
        .filter(|endpoint| endpoint.interface == "public")
        .find(|endpoint| {
            region.is_none_or(|wanted| {
                endpoint.region.as_deref() == Some(wanted)
                    || endpoint.region_id.as_deref() == Some(wanted)
            })
        })
        .map(|endpoint| endpoint.url.trim_end_matches('/').to_owned())
}

#[derive(Debug, Serialize)]
pub(super) struct CreateStackBody<'a> {
    pub(super) stack_name: &'a str,
    pub(super) template: &'a str,
    pub(super) parameters: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(super) struct UpdateStackBody<'a> {
    pub(super) template: &'a str,
    pub(super) parameters: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StackEnvelope {
    pub(super) stack: StackBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct StackBody {
    pub(super) id: String,
    pub(super) stack_status: String,
    #[serde(default)]
    pub(super) stack_status_reason: Option<String>,
    #[serde(default)]
    pub(super) outputs: Vec<OutputBody>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OutputBody {
    pub(super) output_key: String,
    #[serde(default)]
    pub(super) output_value: Value,
}

impl StackBody {
    pub(super) fn into_snapshot(self) -> Result<StackSnapshot, HeatBackendError> {
        let status = parse_status(&self.stack_status);
        let outputs = if status == StackStatus::Complete {
            self.outputs
                .into_iter()
                .map(|output| {
                    let value = output_text(&output.output_key, output.output_value)?;
                    Ok((output.output_key, value))
                })
                .collect::<Result<StackOutputs, HeatBackendError>>()?
        } else {
            StackOutputs::new()
        };
        let status_text = match self.stack_status_reason {
            Some(reason) if !reason.trim().is_empty() && status == StackStatus::Failed => {
                format!("{} ({})", self.stack_status, reason.trim())
            }
            _ => self.stack_status,
        };
        Ok(StackSnapshot {
            status,
            status_text,
            outputs,
        })
    }
}

/// Normalises a Heat `ACTION_STATE` status. Rollbacks and deletions that
/// complete leave the stack unusable, so they count as failures.
pub(super) fn parse_status(raw: &str) -> StackStatus {
    let Some((action, state)) = raw.split_once('_') else {
        return StackStatus::Failed;
    };
    match state {
        "IN_PROGRESS" => StackStatus::InProgress,
        "COMPLETE" if !matches!(action, "ROLLBACK" | "DELETE" | "SUSPEND") => StackStatus::Complete,
        _ => StackStatus::Failed,
    }
}

fn output_text(key: &str, value: Value) -> Result<String, HeatBackendError> {
    match value {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(HeatBackendError::MalformedOutput {
            key: key.to_owned(),
        }),
    }
}

/// Extracts a readable message from an OpenStack error body, falling back
/// to the raw text.
pub(super) fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
        explanation: Option<String>,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| {
            parsed
                .error
                .and_then(|detail| detail.message)
                .or(parsed.explanation)
        })
        .unwrap_or_else(|| body.trim().to_owned())
}
