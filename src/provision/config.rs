//! Timing and tool settings for provisioning runs, loaded via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;
use crate::retry::RetryPolicy;

/// Provisioning settings merged from defaults, `stacksmith.toml`, and
/// `STACKSMITH_*` environment variables. Every `*_timeout_secs` and
/// `*_max_attempts` value of `0` removes that bound.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STACKSMITH",
    discovery(
        app_name = "stacksmith",
        env_var = "STACKSMITH_CONFIG_PATH",
        config_file_name = "stacksmith.toml",
        dotfile_name = ".stacksmith.toml",
        project_file_name = "stacksmith.toml"
    )
)]
pub struct ProvisionConfig {
    /// Pause after a create or update is accepted, before the first poll.
    #[ortho_config(default = 5)]
    pub settle_delay_secs: u64,
    /// Interval between stack status polls.
    #[ortho_config(default = 5)]
    pub stack_poll_interval_secs: u64,
    /// Upper bound on the whole stack polling loop.
    #[ortho_config(default = 3600)]
    pub stack_timeout_secs: u64,
    /// Interval between handshake attempts against one address.
    #[ortho_config(default = 5)]
    pub readiness_poll_interval_secs: u64,
    /// Upper bound on the readiness wait.
    #[ortho_config(default = 900)]
    pub readiness_timeout_secs: u64,
    /// Maximum handshake attempts per address.
    #[ortho_config(default = 0)]
    pub readiness_max_attempts: u32,
    /// Connect timeout passed to each handshake.
    #[ortho_config(default = 10)]
    pub probe_connect_timeout_secs: u64,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `ssh-add` executable.
    #[ortho_config(default = "ssh-add".to_owned())]
    pub ssh_add_bin: String,
    /// Path to the `ansible-playbook` executable.
    #[ortho_config(default = "ansible-playbook".to_owned())]
    pub ansible_playbook_bin: String,
    /// Path to the `ansible` executable used for single-module runs.
    #[ortho_config(default = "ansible".to_owned())]
    pub ansible_bin: String,
}

impl ProvisionConfig {
    /// Built-in settings, identical to what loading yields when no file or
    /// environment variable overrides anything.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            settle_delay_secs: 5,
            stack_poll_interval_secs: 5,
            stack_timeout_secs: 3600,
            readiness_poll_interval_secs: 5,
            readiness_timeout_secs: 900,
            readiness_max_attempts: 0,
            probe_connect_timeout_secs: 10,
            ssh_bin: String::from("ssh"),
            ssh_add_bin: String::from("ssh-add"),
            ansible_playbook_bin: String::from("ansible-playbook"),
            ansible_bin: String::from("ansible"),
        }
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("stacksmith")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures tool paths are non-blank and polling intervals are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("ssh_bin", &self.ssh_bin),
            ("ssh_add_bin", &self.ssh_add_bin),
            ("ansible_playbook_bin", &self.ansible_playbook_bin),
            ("ansible_bin", &self.ansible_bin),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        if self.stack_poll_interval_secs == 0 {
            return Err(invalid("stack_poll_interval_secs", "must be at least 1"));
        }
        if self.readiness_poll_interval_secs == 0 {
            return Err(invalid("readiness_poll_interval_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Pause applied after a submission.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Budget for the stack polling loop.
    #[must_use]
    pub const fn stack_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(self.stack_poll_interval_secs, self.stack_timeout_secs, 0)
    }

    /// Budget for each readiness worker.
    #[must_use]
    pub const fn readiness_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(
            self.readiness_poll_interval_secs,
            self.readiness_timeout_secs,
            self.readiness_max_attempts,
        )
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_owned(),
        message: message.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_bounded() {
        let config = ProvisionConfig::defaults();
        assert_eq!(config.settle_delay(), Duration::from_secs(5));
        assert_eq!(
            config.stack_policy().max_elapsed,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            config.readiness_policy().max_elapsed,
            Some(Duration::from_secs(900))
        );
        assert_eq!(config.readiness_policy().max_attempts, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeouts_remove_bounds() {
        let config = ProvisionConfig {
            stack_timeout_secs: 0,
            readiness_timeout_secs: 0,
            ..ProvisionConfig::defaults()
        };
        assert_eq!(
            config.stack_policy(),
            RetryPolicy::unbounded(Duration::from_secs(5))
        );
        assert_eq!(
            config.readiness_policy(),
            RetryPolicy::unbounded(Duration::from_secs(5))
        );
    }

    #[rstest]
    #[case::ssh(|cfg: &mut ProvisionConfig| cfg.ssh_bin = String::from(" "), "ssh_bin")]
    #[case::ansible(|cfg: &mut ProvisionConfig| cfg.ansible_bin = String::new(), "ansible_bin")]
    #[case::interval(|cfg: &mut ProvisionConfig| cfg.stack_poll_interval_secs = 0, "stack_poll_interval_secs")]
    #[case::readiness(|cfg: &mut ProvisionConfig| cfg.readiness_poll_interval_secs = 0, "readiness_poll_interval_secs")]
    fn validate_names_offending_setting(
        #[case] mutate: fn(&mut ProvisionConfig),
        #[case] field: &str,
    ) {
        let mut config = ProvisionConfig::defaults();
        mutate(&mut config);
        let err = config.validate().expect_err("invalid setting");
        assert!(
            matches!(err, ConfigError::Invalid { field: ref name, .. } if name == field),
            "unexpected error: {err}"
        );
    }
}
