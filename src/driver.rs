//! Installing and removing the device driver stack around workload runs.

use std::time::Duration;

use async_trait::async_trait;
use k8s_test_framework::{helm_chart, up_down::Manager};
use snafu::{ResultExt, Snafu};

pub const DRA_DRIVER_CHART: &str = "nvidia-dra-driver-gpu";
pub const DRA_DRIVER_REPOSITORY: &str = "https://helm.ngc.nvidia.com/nvidia";
pub const DRA_DRIVER_NAMESPACE: &str = "nvidia-dra-driver-gpu";

#[derive(Debug, Snafu)]
pub enum DriverError {
    #[snafu(display("installing release {} failed: {}", release, source))]
    Install {
        release: String,
        source: k8s_test_framework::Error,
    },

    #[snafu(display("installing release {} did not finish within {:?}", release, timeout))]
    InstallTimeout { release: String, timeout: Duration },

    #[snafu(display("uninstalling release {} failed: {}", release, source))]
    Uninstall {
        release: String,
        source: k8s_test_framework::Error,
    },

    #[snafu(display("uninstalling release {} did not finish within {:?}", release, timeout))]
    UninstallTimeout { release: String, timeout: Duration },
}

/// Something that puts a driver onto the cluster and takes it off again,
/// each step bounded by a timeout.
#[async_trait]
pub trait DriverInstaller: Send {
    async fn install(&mut self, timeout: Duration) -> Result<(), DriverError>;

    async fn uninstall(&mut self, timeout: Duration) -> Result<(), DriverError>;
}

/// The NVIDIA DRA driver, installed from its Helm chart.
///
/// An installed release that is never uninstalled is removed when the value
/// is dropped.
#[derive(Debug)]
pub struct DraDriver {
    helm_command: String,
    release_name: String,
    namespace: String,
    version: String,
    gpu_resources: bool,
    gpu_resources_override: bool,
    release: Option<Manager<helm_chart::CommandBuilder>>,
}

impl Default for DraDriver {
    fn default() -> Self {
        Self {
            helm_command: "helm".to_owned(),
            release_name: DRA_DRIVER_CHART.to_owned(),
            namespace: DRA_DRIVER_NAMESPACE.to_owned(),
            version: String::new(),
            gpu_resources: false,
            gpu_resources_override: false,
            release: None,
        }
    }
}

impl DraDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_helm_command(self, helm_command: impl Into<String>) -> Self {
        Self {
            helm_command: helm_command.into(),
            ..self
        }
    }

    /// Pin the chart version instead of taking the latest.
    pub fn with_version(self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..self
        }
    }

    /// Have the driver publish whole GPUs (and MIG devices) as DRA devices.
    pub fn with_gpu_resources(self, gpu_resources: bool) -> Self {
        Self {
            gpu_resources,
            ..self
        }
    }

    /// Allow GPU resources even where the chart considers them unsupported.
    pub fn with_gpu_resources_override(self, gpu_resources_override: bool) -> Self {
        Self {
            gpu_resources_override,
            ..self
        }
    }

    /// `--set` values rendered for the chart.
    pub fn values(&self) -> Vec<(String, String)> {
        let mut values = vec![(
            "resources.gpus.enabled".to_owned(),
            self.gpu_resources.to_string(),
        )];
        if self.gpu_resources_override {
            values.push(("gpuResourcesEnabledOverride".to_owned(), "true".to_owned()));
        }
        values
    }

    pub const fn is_installed(&self) -> bool {
        self.release.is_some()
    }

    fn manager(&self) -> Manager<helm_chart::CommandBuilder> {
        helm_chart::manager(
            &self.helm_command,
            helm_chart::Config {
                release_name: &self.release_name,
                namespace: &self.namespace,
                helm_chart: DRA_DRIVER_CHART,
                repository: DRA_DRIVER_REPOSITORY,
                version: &self.version,
                values: self.values(),
            },
        )
    }
}

#[async_trait]
impl DriverInstaller for DraDriver {
    async fn install(&mut self, timeout: Duration) -> Result<(), DriverError> {
        let release = self.release_name.clone();
        info!(message = "Installing DRA driver.", %release, namespace = %self.namespace, ?timeout);

        let manager = self.manager();
        let manager = self.release.insert(manager);
        manager.command_builder_mut().set_timeout(timeout);
        tokio::time::timeout(timeout, manager.up())
            .await
            .map_err(|_| DriverError::InstallTimeout {
                release: release.clone(),
                timeout,
            })?
            .context(InstallSnafu { release })
    }

    async fn uninstall(&mut self, timeout: Duration) -> Result<(), DriverError> {
        let release = self.release_name.clone();
        let Some(mut manager) = self.release.take() else {
            debug!(message = "DRA driver not installed, nothing to uninstall.", %release);
            return Ok(());
        };
        info!(message = "Uninstalling DRA driver.", %release, ?timeout);

        manager.command_builder_mut().set_timeout(timeout);
        tokio::time::timeout(timeout, manager.down())
            .await
            .map_err(|_| DriverError::UninstallTimeout {
                release: release.clone(),
                timeout,
            })?
            .context(UninstallSnafu { release })
    }
}
