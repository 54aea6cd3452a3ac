//! Provider abstraction for orchestration stacks.
//!
//! A stack is a named, provider-managed set of resources created from a
//! template document. The orchestrator needs four capabilities from a
//! provider (authenticate, look up, create, update); everything
//! provider-specific stays behind the [`StackProvider`] trait.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::config::ProviderCredentials;

/// Output key carrying the shared public (bastion) address.
pub const FLOATING_IP_OUTPUT: &str = "floating_ip";

/// Output key carrying a generated private key.
pub const PRIVATE_KEY_OUTPUT: &str = "private_key";

/// Parameters required to create or update a stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackRequest {
    /// Stack name, unique per project.
    pub name: String,
    /// Template document passed to the provider verbatim.
    pub template: String,
    /// Template parameters.
    pub parameters: BTreeMap<String, String>,
}

impl StackRequest {
    /// Starts a builder for a [`StackRequest`].
    #[must_use]
    pub fn builder() -> StackRequestBuilder {
        StackRequestBuilder::new()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Validation`] when the name or template is blank.
    pub fn validate(&self) -> Result<(), StackError> {
        if self.name.trim().is_empty() {
            return Err(StackError::Validation(String::from("name")));
        }
        if self.template.trim().is_empty() {
            return Err(StackError::Validation(String::from("template")));
        }
        Ok(())
    }
}

/// Builder for [`StackRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackRequestBuilder {
    name: String,
    template: String,
    parameters: BTreeMap<String, String>,
}

impl StackRequestBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stack name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the template document.
    #[must_use]
    pub fn template(mut self, value: impl Into<String>) -> Self {
        self.template = value.into();
        self
    }

    /// Adds a single template parameter, replacing any earlier value.
    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Merges a parameter map, replacing earlier values for repeated keys.
    #[must_use]
    pub fn parameters(mut self, values: BTreeMap<String, String>) -> Self {
        self.parameters.extend(values);
        self
    }

    /// Builds and validates the [`StackRequest`]. The name is trimmed; the
    /// template is kept byte for byte.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Validation`] when the name or template is blank.
    pub fn build(self) -> Result<StackRequest, StackError> {
        let request = StackRequest {
            name: self.name.trim().to_owned(),
            template: self.template,
            parameters: self.parameters,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Parses `KEY1=VALUE1;KEY2=VALUE2` parameter strings.
///
/// Each entry may hold several `;`-separated pairs and entries may be
/// repeated; later keys win. Values may themselves contain `=`.
///
/// # Errors
///
/// Returns [`StackError::MalformedParameter`] when a pair lacks `=` or has an
/// empty key.
pub fn parse_parameters<S: AsRef<str>>(
    entries: &[S],
) -> Result<BTreeMap<String, String>, StackError> {
    let mut parameters = BTreeMap::new();
    for entry in entries {
        for pair in entry.as_ref().split(';') {
            if pair.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once('=') else {
                return Err(StackError::MalformedParameter(pair.to_owned()));
            };
            let trimmed_key = key.trim();
            if trimmed_key.is_empty() {
                return Err(StackError::MalformedParameter(pair.to_owned()));
            }
            parameters.insert(trimmed_key.to_owned(), value.to_owned());
        }
    }
    Ok(parameters)
}

/// Coarse lifecycle state of a stack, normalised across providers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StackStatus {
    /// No stack with the requested name exists.
    Absent,
    /// The provider is still creating or updating resources.
    InProgress,
    /// The last operation finished successfully.
    Complete,
    /// The last operation failed or ended in a state the orchestrator cannot
    /// use.
    Failed,
}

impl StackStatus {
    /// Returns `true` once no further polling can change the outcome.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Absent => "absent",
            Self::InProgress => "in progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        })
    }
}

/// Outputs published by a completed stack, keyed by output name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackOutputs {
    values: BTreeMap<String, String>,
}

impl StackOutputs {
    /// Creates an empty output set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an output value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the value of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the shared public address, if the stack published one.
    #[must_use]
    pub fn floating_ip(&self) -> Option<&str> {
        self.get(FLOATING_IP_OUTPUT)
    }

    /// Returns the generated private key, if the stack published one.
    #[must_use]
    pub fn private_key(&self) -> Option<&str> {
        self.get(PRIVATE_KEY_OUTPUT)
    }

    /// Iterates over non-reserved outputs as `(role, address)` pairs in
    /// ascending role order.
    pub fn hosts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter(|(key, _)| !is_reserved_output(key))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of outputs, reserved keys included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when the stack published no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for StackOutputs
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Returns `true` for output keys that do not describe a host.
#[must_use]
pub fn is_reserved_output(key: &str) -> bool {
    key == FLOATING_IP_OUTPUT || key == PRIVATE_KEY_OUTPUT
}

/// Point-in-time view of a stack returned by [`StackProvider::get_stack`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackSnapshot {
    /// Normalised status.
    pub status: StackStatus,
    /// Raw status text reported by the provider, kept for diagnostics.
    pub status_text: String,
    /// Outputs; only meaningful once the status is [`StackStatus::Complete`].
    pub outputs: StackOutputs,
}

impl StackSnapshot {
    /// Snapshot describing a stack that does not exist.
    #[must_use]
    pub fn absent() -> Self {
        Self {
            status: StackStatus::Absent,
            status_text: String::from("NOT_FOUND"),
            outputs: StackOutputs::new(),
        }
    }

    /// Snapshot with the given status and no outputs.
    #[must_use]
    pub fn with_status(status: StackStatus, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            outputs: StackOutputs::new(),
        }
    }
}

/// Errors raised while building stack requests.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StackError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when a parameter pair cannot be parsed.
    #[error("malformed parameter '{0}': expected KEY=VALUE")]
    MalformedParameter(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by orchestration providers.
pub trait StackProvider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;
    /// Authenticated session reused across calls.
    type Session: Send + Sync;

    /// Authenticates and returns a session. Implementations must validate the
    /// credentials before touching the network.
    fn authenticate<'a>(
        &'a self,
        credentials: &'a ProviderCredentials,
    ) -> ProviderFuture<'a, Self::Session, Self::Error>;

    /// Looks up a stack by name. A missing stack yields
    /// [`StackStatus::Absent`] rather than an error.
    fn get_stack<'a>(
        &'a self,
        session: &'a Self::Session,
        name: &'a str,
    ) -> ProviderFuture<'a, StackSnapshot, Self::Error>;

    /// Submits a new stack.
    fn create_stack<'a>(
        &'a self,
        session: &'a Self::Session,
        request: &'a StackRequest,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Submits an update for an existing stack.
    fn update_stack<'a>(
        &'a self,
        session: &'a Self::Session,
        name: &'a str,
        request: &'a StackRequest,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Returns `true` when a later status poll may succeed after `error`.
    /// Anything else stops polling at once.
    fn is_transient(&self, error: &Self::Error) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn builder_trims_name_and_keeps_template() {
        let request = StackRequest::builder()
            .name("  demo ")
            .template("heat_template_version: 2015-04-30\n")
            .parameter("flavor", "m1.small")
            .build()
            .expect("valid request");

        assert_eq!(request.name, "demo");
        assert!(request.template.ends_with('\n'));
        assert_eq!(
            request.parameters.get("flavor").map(String::as_str),
            Some("m1.small")
        );
    }

    #[rstest]
    #[case("", "template", "name")]
    #[case("demo", "   ", "template")]
    fn builder_rejects_blank_fields(
        #[case] name: &str,
        #[case] template: &str,
        #[case] field: &str,
    ) {
        let err = StackRequest::builder()
            .name(name)
            .template(template)
            .build()
            .expect_err("blank field");
        assert_eq!(err, StackError::Validation(field.to_owned()));
    }

    #[test]
    fn parse_parameters_merges_repeated_entries() {
        let parsed = parse_parameters(&["a=1;b=2", "b=3", "c=x=y;"]).expect("parameters");
        let expected: BTreeMap<String, String> = [("a", "1"), ("b", "3"), ("c", "x=y")]
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case("novalue")]
    #[case("=orphan")]
    fn parse_parameters_rejects_malformed_pairs(#[case] entry: &str) {
        let err = parse_parameters(&[entry]).expect_err("malformed");
        assert!(matches!(err, StackError::MalformedParameter(_)));
    }

    #[test]
    fn outputs_partition_reserved_keys() {
        let outputs: StackOutputs = [
            ("node2", "10.0.0.6"),
            (FLOATING_IP_OUTPUT, "203.0.113.9"),
            ("node1", "10.0.0.5"),
            (PRIVATE_KEY_OUTPUT, "KEY"),
        ]
        .into_iter()
        .collect();

        let hosts: Vec<_> = outputs.hosts().collect();
        assert_eq!(hosts, vec![("node1", "10.0.0.5"), ("node2", "10.0.0.6")]);
        assert_eq!(outputs.floating_ip(), Some("203.0.113.9"));
        assert_eq!(outputs.private_key(), Some("KEY"));
    }

    #[test]
    fn only_in_progress_is_non_terminal() {
        assert!(!StackStatus::InProgress.is_terminal());
        for status in [
            StackStatus::Absent,
            StackStatus::Complete,
            StackStatus::Failed,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }
}
