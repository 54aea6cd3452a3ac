//! Command-line interface definitions for the `stacksmith` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `stacksmith` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stacksmith",
    about = "Provision an OpenStack Heat stack and run an Ansible playbook against it",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Environment directory holding the inventory and stack template.
    #[arg(value_name = "ENVIRONMENT")]
    pub(crate) environment: String,
    /// Playbook to run once the environment is ready (ignored by module runs).
    #[arg(value_name = "PLAYBOOK")]
    pub(crate) playbook: String,
    /// Remote user (defaults to `ubuntu`).
    #[arg(long, value_name = "USER")]
    pub(crate) user: Option<String>,
    /// Escalate with sudo on the remote hosts.
    #[arg(long)]
    pub(crate) sudo: bool,
    /// Provision the environment before running the playbook.
    #[arg(long, value_enum, value_name = "PROVISIONER")]
    pub(crate) provisioner: Option<Provisioner>,
    /// Stack name (defaults to the environment directory name).
    #[arg(long, value_name = "NAME")]
    pub(crate) heat_stack_name: Option<String>,
    /// Submit an update when the stack already exists.
    #[arg(long)]
    pub(crate) heat_stack_update: bool,
    /// Stack parameters as `K1=V1;K2=V2`; may be repeated.
    #[arg(long, value_name = "PARAMETERS")]
    pub(crate) heat_parameters: Vec<String>,
    /// SSH configuration used when no provisioner runs.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_config: Option<String>,
    /// Forward the local SSH agent to every host.
    #[arg(long)]
    pub(crate) forward_agent: bool,
    /// Run a single Ansible module instead of the playbook.
    #[arg(long, value_name = "MODULE", requires = "module_args")]
    pub(crate) module: Option<String>,
    /// Arguments for `--module`.
    #[arg(long, value_name = "ARGS")]
    pub(crate) module_args: Option<String>,
    /// Host pattern targeted by `--module` or `--adhoc`.
    #[arg(long, value_name = "PATTERN", default_value = "all")]
    pub(crate) module_hosts: String,
    /// Shell command to run on the hosts; short for `--module shell --module-args`.
    #[arg(long, value_name = "COMMAND", conflicts_with_all = ["module", "module_args"])]
    pub(crate) adhoc: Option<String>,
    /// Check playbook syntax and list tasks without running them.
    #[arg(long)]
    pub(crate) syntax_check: bool,
    /// Emit debug logging.
    #[arg(long)]
    pub(crate) debug: bool,
    /// Arguments passed to Ansible unchanged (after `--`).
    #[arg(last = true, value_name = "ANSIBLE_ARGS")]
    pub(crate) passthrough: Vec<String>,
}

/// Provisioners able to create the environment's hosts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum Provisioner {
    /// OpenStack Heat.
    Heat,
}
