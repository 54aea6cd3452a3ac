//! Hand-off to Ansible once the environment is ready: a playbook run through
//! `ansible-playbook`, or a single module run through `ansible`.
//!
//! The child's environment is assembled explicitly in a
//! [`PlaybookEnvironment`]; the parent process environment is never mutated.

use std::collections::BTreeMap;
use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, info};

use crate::process::{CommandError, StreamingRunner, render_command};

/// Variable carrying extra `ssh` options for Ansible.
pub const SSH_ARGS_VAR: &str = "ANSIBLE_SSH_ARGS";
/// Variable exposing the absolute environment directory to playbooks.
pub const ENVIRONMENT_VAR: &str = "STACKSMITH_ENV";
/// Connection sharing options applied to every run.
pub const CONTROL_MASTER_ARGS: &str = "-o ControlMaster=auto \
     -o ControlPath=~/.ssh/controlmasters/u-%r@%h:%p -o ControlPersist=300";
/// Directory holding control sockets, relative to the home directory.
pub const CONTROL_DIRECTORY: &str = ".ssh/controlmasters";
/// Module search path passed to every run.
pub const MODULE_PATH: &str = "./library";
/// Host pattern targeted by module runs unless overridden.
pub const DEFAULT_MODULE_HOSTS: &str = "all";
/// Module used for ad-hoc shell commands.
pub const SHELL_MODULE: &str = "shell";

/// Errors raised while preparing or running the playbook.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PlaybookError {
    /// Raised when the control socket directory cannot be created.
    #[error("failed to create {path}: {message}")]
    ControlDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the playbook cannot be started.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when the playbook was killed by a signal.
    #[error("{program} terminated without an exit code")]
    Terminated {
        /// Program that was killed.
        program: String,
    },
}

/// Variables handed to the playbook process on top of the inherited
/// environment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PlaybookEnvironment {
    vars: BTreeMap<String, String>,
}

impl PlaybookEnvironment {
    /// Baseline variables for `environment_root`. `inherited_ssh_args` is the
    /// caller's current `ANSIBLE_SSH_ARGS`, which is extended rather than
    /// replaced.
    #[must_use]
    pub fn new(environment_root: &Utf8Path, inherited_ssh_args: Option<&str>) -> Self {
        let mut env = Self::default();
        env.set("PYTHONUNBUFFERED", "1");
        env.set("PYTHONIOENCODING", "UTF-8");
        env.set("ANSIBLE_FORCE_COLOR", "yes");
        env.set(ENVIRONMENT_VAR, environment_root.as_str());
        if let Some(existing) = inherited_ssh_args.filter(|value| !value.trim().is_empty()) {
            env.set(SSH_ARGS_VAR, existing.trim());
        }
        env.append(SSH_ARGS_VAR, CONTROL_MASTER_ARGS);
        env
    }

    /// Points `ssh` at a routing file.
    #[must_use]
    pub fn with_routing(mut self, routing_file: &Utf8Path) -> Self {
        self.append(SSH_ARGS_VAR, &format!("-F {routing_file}"));
        self
    }

    /// Enables agent forwarding for every connection.
    #[must_use]
    pub fn with_forward_agent(mut self) -> Self {
        self.append(SSH_ARGS_VAR, "-o ForwardAgent=yes");
        self
    }

    /// Value of `key`, if set.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Every variable, in key order.
    #[must_use]
    pub const fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_owned(), value.to_owned());
    }

    fn append(&mut self, key: &str, value: &str) {
        self.vars
            .entry(key.to_owned())
            .and_modify(|current| {
                current.push(' ');
                current.push_str(value);
            })
            .or_insert_with(|| value.to_owned());
    }
}

/// Creates the control socket directory under `home` when missing.
///
/// # Errors
///
/// Returns [`PlaybookError::ControlDirectory`] when creation fails.
pub fn prepare_control_directory(home: &Utf8Path) -> Result<Utf8PathBuf, PlaybookError> {
    let path = home.join(CONTROL_DIRECTORY);
    Dir::create_ambient_dir_all(&path, ambient_authority()).map_err(|err| {
        PlaybookError::ControlDirectory {
            path: path.clone(),
            message: err.to_string(),
        }
    })?;
    Ok(path)
}

/// A single `ansible-playbook` run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlaybookInvocation {
    /// Executable to run.
    pub program: String,
    /// Inventory file.
    pub inventory: Utf8PathBuf,
    /// Remote user.
    pub user: String,
    /// Playbook path.
    pub playbook: String,
    /// Escalate with `sudo` on the remote side.
    pub become_sudo: bool,
    /// Check syntax and list tasks instead of running them.
    pub syntax_check: bool,
    /// Extra variables file passed as `--extra-vars @file`.
    pub extra_vars: Option<Utf8PathBuf>,
    /// Arguments forwarded verbatim.
    pub passthrough: Vec<String>,
}

impl PlaybookInvocation {
    /// Arguments in the order `ansible-playbook` receives them.
    #[must_use]
    pub fn arguments(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--inventory-file".into(),
            self.inventory.as_str().into(),
            "--user".into(),
            self.user.as_str().into(),
            "--module-path".into(),
            MODULE_PATH.into(),
            self.playbook.as_str().into(),
        ];
        if self.become_sudo {
            args.extend(["--become", "--become-method", "sudo"].map(OsString::from));
        }
        if self.syntax_check {
            args.extend(["--syntax-check", "--list-tasks"].map(OsString::from));
        }
        push_extra_vars(&mut args, self.extra_vars.as_deref());
        args.extend(self.passthrough.iter().map(OsString::from));
        args
    }

    /// Runs the playbook with `env` layered over the inherited environment
    /// and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybookError::Command`] when the program cannot start and
    /// [`PlaybookError::Terminated`] when it dies from a signal.
    pub fn run<R: StreamingRunner>(
        &self,
        runner: &R,
        env: &PlaybookEnvironment,
    ) -> Result<i32, PlaybookError> {
        info!(playbook = %self.playbook, user = %self.user, "running playbook");
        stream(runner, &self.program, &self.arguments(), env)
    }
}

/// A single `ansible` module run against a host pattern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleInvocation {
    /// Executable to run.
    pub program: String,
    /// Host pattern, usually [`DEFAULT_MODULE_HOSTS`].
    pub hosts: String,
    /// Inventory file.
    pub inventory: Utf8PathBuf,
    /// Module name.
    pub module: String,
    /// Arguments handed to the module.
    pub module_args: String,
    /// Remote user.
    pub user: String,
    /// Escalate with `sudo` on the remote side.
    pub become_sudo: bool,
    /// Check syntax instead of running.
    pub syntax_check: bool,
    /// Extra variables file passed as `--extra-vars @file`.
    pub extra_vars: Option<Utf8PathBuf>,
    /// Arguments forwarded verbatim, ahead of the module arguments.
    pub passthrough: Vec<String>,
}

impl ModuleInvocation {
    /// Runs `command` through the shell module.
    #[must_use]
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            program: String::from("ansible"),
            hosts: DEFAULT_MODULE_HOSTS.to_owned(),
            inventory: Utf8PathBuf::new(),
            module: SHELL_MODULE.to_owned(),
            module_args: command.into(),
            user: String::new(),
            become_sudo: false,
            syntax_check: false,
            extra_vars: None,
            passthrough: Vec::new(),
        }
    }

    /// Arguments in the order `ansible` receives them. The module arguments
    /// always come last.
    #[must_use]
    pub fn arguments(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.hosts.as_str().into(),
            "--inventory-file".into(),
            self.inventory.as_str().into(),
            "--module-name".into(),
            self.module.as_str().into(),
            "--user".into(),
            self.user.as_str().into(),
            "--module-path".into(),
            MODULE_PATH.into(),
        ];
        if self.become_sudo {
            args.extend(["--become", "--become-method", "sudo"].map(OsString::from));
        }
        if self.syntax_check {
            args.extend(["--syntax-check", "--list-tasks"].map(OsString::from));
        }
        push_extra_vars(&mut args, self.extra_vars.as_deref());
        args.extend(self.passthrough.iter().map(OsString::from));
        args.push(format!("--args={}", self.module_args).into());
        args
    }

    /// Runs the module with `env` layered over the inherited environment and
    /// returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybookError::Command`] when the program cannot start and
    /// [`PlaybookError::Terminated`] when it dies from a signal.
    pub fn run<R: StreamingRunner>(
        &self,
        runner: &R,
        env: &PlaybookEnvironment,
    ) -> Result<i32, PlaybookError> {
        info!(module = %self.module, hosts = %self.hosts, user = %self.user, "running module");
        stream(runner, &self.program, &self.arguments(), env)
    }
}

fn push_extra_vars(args: &mut Vec<OsString>, extra_vars: Option<&Utf8Path>) {
    if let Some(vars) = extra_vars {
        args.push("--extra-vars".into());
        args.push(format!("@{vars}").into());
    }
}

fn stream<R: StreamingRunner>(
    runner: &R,
    program: &str,
    args: &[OsString],
    env: &PlaybookEnvironment,
) -> Result<i32, PlaybookError> {
    debug!(
        command = %render_command(program, args),
        ssh_args = env.get(SSH_ARGS_VAR).unwrap_or_default(),
        "ansible command"
    );
    runner
        .stream(program, args, env.vars())?
        .ok_or_else(|| PlaybookError::Terminated {
            program: program.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn invocation() -> PlaybookInvocation {
        PlaybookInvocation {
            program: String::from("ansible-playbook"),
            inventory: Utf8PathBuf::from("/envs/staging/hosts"),
            user: String::from("ubuntu"),
            playbook: String::from("site.yml"),
            become_sudo: false,
            syntax_check: false,
            extra_vars: None,
            passthrough: Vec::new(),
        }
    }

    fn rendered(invocation: &PlaybookInvocation) -> String {
        invocation
            .arguments()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[rstest]
    fn minimal_invocation_matches_ansible_layout(invocation: PlaybookInvocation) {
        assert_eq!(
            rendered(&invocation),
            "--inventory-file /envs/staging/hosts --user ubuntu --module-path ./library site.yml"
        );
    }

    #[rstest]
    fn optional_flags_follow_the_playbook(mut invocation: PlaybookInvocation) {
        invocation.become_sudo = true;
        invocation.syntax_check = true;
        invocation.extra_vars = Some(Utf8PathBuf::from("/envs/staging/vars_heat.yml"));
        invocation.passthrough = vec![String::from("--tags"), String::from("nova")];

        assert_eq!(
            rendered(&invocation),
            "--inventory-file /envs/staging/hosts --user ubuntu --module-path ./library \
             site.yml --become --become-method sudo --syntax-check --list-tasks \
             --extra-vars @/envs/staging/vars_heat.yml --tags nova"
        );
    }

    #[test]
    fn environment_extends_inherited_ssh_args() {
        let env = PlaybookEnvironment::new(Utf8Path::new("/envs/staging"), Some("-o Foo=bar"))
            .with_routing(Utf8Path::new("/envs/staging/.ssh_config"))
            .with_forward_agent();

        assert_eq!(
            env.get(SSH_ARGS_VAR),
            Some(
                "-o Foo=bar -o ControlMaster=auto \
                 -o ControlPath=~/.ssh/controlmasters/u-%r@%h:%p -o ControlPersist=300 \
                 -F /envs/staging/.ssh_config -o ForwardAgent=yes"
            )
        );
        assert_eq!(env.get(ENVIRONMENT_VAR), Some("/envs/staging"));
        assert_eq!(env.get("PYTHONUNBUFFERED"), Some("1"));
        assert_eq!(env.get("ANSIBLE_FORCE_COLOR"), Some("yes"));
    }

    #[test]
    fn environment_without_inherited_args_starts_with_control_master() {
        let env = PlaybookEnvironment::new(Utf8Path::new("/envs/staging"), None);
        assert_eq!(env.get(SSH_ARGS_VAR), Some(CONTROL_MASTER_ARGS));
    }

    #[rstest]
    fn run_streams_with_environment_and_returns_exit_code(invocation: PlaybookInvocation) {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(2), "", "");
        let env = PlaybookEnvironment::new(Utf8Path::new("/envs/staging"), None);

        let code = invocation.run(&runner, &env).expect("playbook ran");

        assert_eq!(code, 2);
        let records = runner.records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records.first().map(|record| &record.env),
            Some(env.vars())
        );
    }

    #[rstest]
    fn run_reports_signal_termination(invocation: PlaybookInvocation) {
        let runner = ScriptedRunner::new();
        runner.push_output(None, "", "");
        let env = PlaybookEnvironment::new(Utf8Path::new("/envs/staging"), None);

        let err = invocation.run(&runner, &env).expect_err("killed");
        assert!(matches!(err, PlaybookError::Terminated { .. }));
    }

    #[fixture]
    fn module() -> ModuleInvocation {
        ModuleInvocation {
            inventory: Utf8PathBuf::from("/envs/staging/hosts"),
            user: String::from("ubuntu"),
            ..ModuleInvocation::shell("uptime")
        }
    }

    fn rendered_module(module: &ModuleInvocation) -> String {
        module
            .arguments()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[rstest]
    fn shell_module_targets_every_host(module: ModuleInvocation) {
        assert_eq!(
            rendered_module(&module),
            "all --inventory-file /envs/staging/hosts --module-name shell --user ubuntu \
             --module-path ./library --args=uptime"
        );
    }

    #[rstest]
    fn module_arguments_come_last(mut module: ModuleInvocation) {
        module.hosts = String::from("controller");
        module.module = String::from("service");
        module.module_args = String::from("name=nova-api state=restarted");
        module.become_sudo = true;
        module.extra_vars = Some(Utf8PathBuf::from("/envs/staging/vars_heat.yml"));
        module.passthrough = vec![String::from("--forks"), String::from("5")];

        let args = module.arguments();

        assert_eq!(
            rendered_module(&module),
            "controller --inventory-file /envs/staging/hosts --module-name service \
             --user ubuntu --module-path ./library --become --become-method sudo \
             --extra-vars @/envs/staging/vars_heat.yml --forks 5 \
             --args=name=nova-api state=restarted"
        );
        assert_eq!(
            args.last(),
            Some(&OsString::from("--args=name=nova-api state=restarted"))
        );
    }

    #[rstest]
    fn module_run_uses_ansible_binary(module: ModuleInvocation) {
        let runner = ScriptedRunner::new();
        let env = PlaybookEnvironment::new(Utf8Path::new("/envs/staging"), None);

        let code = module.run(&runner, &env).expect("module ran");

        assert_eq!(code, 0);
        let invocations = runner.invocations();
        assert_eq!(
            invocations.first().map(|(program, _)| program.as_str()),
            Some("ansible")
        );
    }

    #[test]
    fn control_directory_is_created_under_home() {
        let tmp = TempDir::new().expect("tempdir");
        let home = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
        let path = prepare_control_directory(&home).expect("control dir");
        assert!(path.is_dir());
        assert_eq!(path, home.join(CONTROL_DIRECTORY));
    }
}
