//! Binary entry point for the Stacksmith CLI.

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stacksmith::environment::EnvironmentLayout;
use stacksmith::logging::init_logging;
use stacksmith::playbook::{SHELL_MODULE, SSH_ARGS_VAR, prepare_control_directory};
use stacksmith::{
    ConfigError, EnvironmentError, HeatBackend, HeatBackendError, InheritedStdioRunner,
    ModuleInvocation, OpenStackConfig, PlaybookEnvironment, PlaybookError, PlaybookInvocation,
    ProcessCommandRunner, ProvisionConfig, ProvisionError, ProvisionOrchestrator,
    ProvisionRequest, SshAgent, SshProbe,
};

mod cli;

use cli::{Cli, Provisioner};

const DEFAULT_USER: &str = "ubuntu";

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error("backend error: {0}")]
    Backend(#[from] HeatBackendError),
    #[error(transparent)]
    Provision(#[from] ProvisionError<HeatBackendError>),
    #[error(transparent)]
    Playbook(#[from] PlaybookError),
    #[error("SSH configuration '{0}' does not exist")]
    MissingRoutingFile(Utf8PathBuf),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let layout = EnvironmentLayout::open(Utf8Path::new(&cli.environment))?;
    let inventory = layout.require_inventory()?;
    let settings = ProvisionConfig::load_without_cli_args()?;
    settings.validate()?;

    let heat = cli.provisioner == Some(Provisioner::Heat);
    let user = cli.user.clone().unwrap_or_else(|| DEFAULT_USER.to_owned());
    let routing = if heat {
        Some(provision(&cli, &layout, &user, &settings).await?)
    } else {
        reuse_routing(cli.ssh_config.as_deref(), &layout)?
    };

    let inherited = env::var(SSH_ARGS_VAR).ok();
    let base = PlaybookEnvironment::new(layout.root(), inherited.as_deref());
    let routed = match &routing {
        Some(path) => base.with_routing(path),
        None => base,
    };
    let playbook_env = if cli.forward_agent {
        routed.with_forward_agent()
    } else {
        routed
    };
    if let Some(home) = home_directory() {
        prepare_control_directory(&home)?;
    }

    let become_sudo = cli.sudo || heat;
    let extra_vars = heat.then(|| layout.template_vars()).flatten();
    let code = match module_request(&cli) {
        Some((module, module_args)) => ModuleInvocation {
            program: settings.ansible_bin.clone(),
            hosts: cli.module_hosts,
            inventory,
            module,
            module_args,
            user,
            become_sudo,
            syntax_check: cli.syntax_check,
            extra_vars,
            passthrough: cli.passthrough,
        }
        .run(&InheritedStdioRunner, &playbook_env)?,
        None => PlaybookInvocation {
            program: settings.ansible_playbook_bin.clone(),
            inventory,
            user,
            playbook: cli.playbook,
            become_sudo,
            syntax_check: cli.syntax_check,
            extra_vars,
            passthrough: cli.passthrough,
        }
        .run(&InheritedStdioRunner, &playbook_env)?,
    };
    if code != 0 {
        warn!(code, "ansible exited with a failure status");
    }
    Ok(code)
}

/// `--adhoc` stands for the shell module; clap guarantees `--module` comes
/// with `--module-args`.
fn module_request(cli: &Cli) -> Option<(String, String)> {
    match (&cli.adhoc, &cli.module, &cli.module_args) {
        (Some(command), _, _) => Some((SHELL_MODULE.to_owned(), command.clone())),
        (None, Some(module), Some(args)) => Some((module.clone(), args.clone())),
        _ => None,
    }
}

async fn provision(
    cli: &Cli,
    layout: &EnvironmentLayout,
    user: &str,
    settings: &ProvisionConfig,
) -> Result<Utf8PathBuf, CliError> {
    let request = ProvisionRequest::prepare::<HeatBackendError>(
        layout.clone(),
        cli.heat_stack_name.as_deref(),
        &cli.heat_parameters,
        cli.heat_stack_update,
        user,
    )?;
    let credentials = OpenStackConfig::load_without_cli_args()?.credentials()?;

    let probe = Arc::new(SshProbe::new(
        ProcessCommandRunner,
        settings.ssh_bin.clone(),
        settings.probe_connect_timeout_secs,
    ));
    let agent = SshAgent::new(ProcessCommandRunner, settings.ssh_add_bin.clone());
    let orchestrator =
        ProvisionOrchestrator::new(HeatBackend::new()?, probe, agent).with_settings(settings);

    let cancel = CancellationToken::new();
    let watcher = cancel_on_interrupt(cancel.clone());
    let result = orchestrator.execute(&credentials, &request, &cancel).await;
    watcher.abort();
    let outcome = result?;

    info!(
        stack = %outcome.stack_name,
        action = ?outcome.action,
        routing = %outcome.routing_path,
        hosts = outcome.routing.hosts().len(),
        "environment ready"
    );
    Ok(outcome.routing_path)
}

/// An explicit `--ssh-config` must exist; otherwise files left in the
/// environment are reused when present.
fn reuse_routing(
    explicit: Option<&str>,
    layout: &EnvironmentLayout,
) -> Result<Option<Utf8PathBuf>, CliError> {
    let Some(raw) = explicit else {
        return Ok(layout.existing_routing());
    };
    let path = Utf8PathBuf::from(raw);
    if !path.is_file() {
        return Err(CliError::MissingRoutingFile(path));
    }
    let absolute = std::path::absolute(&path)
        .ok()
        .and_then(|resolved| Utf8PathBuf::from_path_buf(resolved).ok())
        .unwrap_or(path);
    Ok(Some(absolute))
}

fn home_directory() -> Option<Utf8PathBuf> {
    let home = env::var_os("HOME")?;
    Utf8PathBuf::from_path_buf(PathBuf::from(home)).ok()
}

fn cancel_on_interrupt(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling provisioning");
            cancel.cancel();
        }
    })
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
