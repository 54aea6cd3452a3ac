//! Provider credential loading via `ortho-config`.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Domain used for users and projects when none is configured.
pub const DEFAULT_DOMAIN: &str = "Default";

/// OpenStack credentials merged from defaults, configuration files, and the
/// conventional `OS_*` environment variables exported by a `stackrc` file.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "OS")]
pub struct OpenStackConfig {
    /// Keystone endpoint, for example `https://keystone.example:5000/v3`.
    pub auth_url: Option<String>,
    /// User name to authenticate as.
    pub username: Option<String>,
    /// Password for [`OpenStackConfig::username`].
    pub password: Option<String>,
    /// Legacy tenant name. Takes precedence over the project name when both
    /// are set.
    pub tenant_name: Option<String>,
    /// Project used to scope the token.
    pub project_name: Option<String>,
    /// Domain owning the user. Defaults to `Default`.
    #[ortho_config(default = DEFAULT_DOMAIN.to_owned())]
    pub user_domain_name: String,
    /// Domain owning the project. Defaults to `Default`.
    #[ortho_config(default = DEFAULT_DOMAIN.to_owned())]
    pub project_domain_name: String,
    /// Region used to pick the orchestration endpoint from the catalogue.
    pub region_name: Option<String>,
}

/// Validated credentials handed to a stack provider.
#[derive(Clone, Eq, PartialEq)]
pub struct ProviderCredentials {
    /// Identity endpoint.
    pub auth_url: String,
    /// User name.
    pub username: String,
    /// User password.
    pub password: String,
    /// Project (tenant) scope for the token.
    pub project_name: String,
    /// Domain owning the user.
    pub user_domain_name: String,
    /// Domain owning the project.
    pub project_domain_name: String,
    /// Optional region filter for endpoint selection.
    pub region_name: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProviderCredentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("project_name", &self.project_name)
            .field("user_domain_name", &self.user_domain_name)
            .field("project_domain_name", &self.project_domain_name)
            .field("region_name", &self.region_name)
            .finish()
    }
}

impl ProviderCredentials {
    /// Checks that every required field carries a non-blank value.
    ///
    /// Fields are checked in a fixed order (auth URL, user name, password,
    /// project) so the first missing one is always the one reported.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first blank field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(Some(&self.auth_url), &AUTH_URL)?;
        require_field(Some(&self.username), &USERNAME)?;
        require_field(Some(&self.password), &PASSWORD)?;
        require_field(Some(&self.project_name), &PROJECT)?;
        Ok(())
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str) -> Self {
        Self {
            description,
            env_var,
        }
    }
}

const AUTH_URL: FieldMetadata = FieldMetadata::new("identity endpoint", "OS_AUTH_URL");
const USERNAME: FieldMetadata = FieldMetadata::new("user name", "OS_USERNAME");
const PASSWORD: FieldMetadata = FieldMetadata::new("password", "OS_PASSWORD");
const PROJECT: FieldMetadata = FieldMetadata::new(
    "project scope",
    "OS_TENANT_NAME or OS_PROJECT_NAME",
);

fn require_field(value: Option<&String>, metadata: &FieldMetadata) -> Result<String, ConfigError> {
    match value.map(|raw| raw.trim()) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed.to_owned()),
        _ => Err(ConfigError::MissingField(format!(
            "{} is missing ({}); ensure your environment (probably the stackrc file) is \
             configured with OpenStack credentials",
            metadata.env_var, metadata.description
        ))),
    }
}

impl OpenStackConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("stacksmith")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the project scope, preferring the legacy tenant name.
    #[must_use]
    pub fn project_scope(&self) -> Option<&String> {
        self.tenant_name
            .as_ref()
            .filter(|value| !value.trim().is_empty())
            .or(self.project_name.as_ref())
    }

    /// Converts the layered configuration into validated credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first required
    /// variable that is absent or blank.
    pub fn credentials(&self) -> Result<ProviderCredentials, ConfigError> {
        let auth_url = require_field(self.auth_url.as_ref(), &AUTH_URL)?;
        let username = require_field(self.username.as_ref(), &USERNAME)?;
        let password = require_field(self.password.as_ref(), &PASSWORD)?;
        let project_name = require_field(self.project_scope(), &PROJECT)?;

        Ok(ProviderCredentials {
            auth_url,
            username,
            password,
            project_name,
            user_domain_name: non_blank_or_default(&self.user_domain_name),
            project_domain_name: non_blank_or_default(&self.project_domain_name),
            region_name: self
                .region_name
                .as_ref()
                .map(|region| region.trim().to_owned())
                .filter(|region| !region.is_empty()),
        })
    }
}

fn non_blank_or_default(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        DEFAULT_DOMAIN.to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a value is present but cannot be interpreted.
    #[error("invalid configuration value for {field}: {message}")]
    Invalid {
        /// Field or flag that carried the value.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
