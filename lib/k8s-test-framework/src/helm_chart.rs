//! Manage a Helm release.

use std::{
    process::{Command, Stdio},
    time::Duration,
};

use crate::up_down;

/// Default time Helm waits for release resources to become ready.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Parameters required to build `helm` commands that install and uninstall a
/// chart release.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    helm_command: String,
    namespace: String,
    release_name: String,
    helm_chart: String,
    repository: Option<String>,
    version: Option<String>,
    values: Vec<(String, String)>,
    timeout: Duration,
}

impl CommandBuilder {
    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// How long Helm itself waits on install and uninstall.
    pub const fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn timeout_arg(&self) -> String {
        format!("{}s", self.timeout.as_secs().max(1))
    }
}

impl up_down::CommandBuilder for CommandBuilder {
    fn build(&self, command_to_build: up_down::CommandToBuild) -> Command {
        let mut command = Command::new(&self.helm_command);
        match command_to_build {
            up_down::CommandToBuild::Up => {
                command
                    .arg("upgrade")
                    .arg("--install")
                    .arg(&self.release_name)
                    .arg(&self.helm_chart);
                if let Some(repository) = &self.repository {
                    command.arg("--repo").arg(repository);
                }
                if let Some(version) = &self.version {
                    command.arg("--version").arg(version);
                }
                command.arg("--create-namespace");
                for (key, value) in &self.values {
                    command.arg("--set").arg(format!("{key}={value}"));
                }
            }
            up_down::CommandToBuild::Down => {
                command.arg("uninstall").arg(&self.release_name);
            }
        }
        command
            .arg("--namespace")
            .arg(&self.namespace)
            .arg("--wait")
            .arg("--timeout")
            .arg(self.timeout_arg())
            .stdin(Stdio::null());
        command
    }
}

/// The release to manage.
#[derive(Debug, Default)]
pub struct Config<'a> {
    pub release_name: &'a str,
    pub namespace: &'a str,
    /// Chart reference, e.g. `nvidia-dra-driver-gpu`.
    pub helm_chart: &'a str,
    /// Repository URL the chart is fetched from. Empty when `helm_chart`
    /// already points at a local path or an added repo.
    pub repository: &'a str,
    /// Chart version; empty picks the latest.
    pub version: &'a str,
    /// Values passed with `--set`, in order.
    pub values: Vec<(String, String)>,
}

/// Takes care of installing a chart release into the cluster and removing it
/// again.
pub fn manager(helm_command: &str, config: Config<'_>) -> up_down::Manager<CommandBuilder> {
    let Config {
        release_name,
        namespace,
        helm_chart,
        repository,
        version,
        values,
    } = config;
    let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_owned());

    up_down::Manager::new(CommandBuilder {
        helm_command: helm_command.to_owned(),
        namespace: namespace.to_owned(),
        release_name: release_name.to_owned(),
        helm_chart: helm_chart.to_owned(),
        repository: non_empty(repository),
        version: non_empty(version),
        values,
        timeout: DEFAULT_TIMEOUT,
    })
}
