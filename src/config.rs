//! Harness configuration.
//!
//! Every setting has a default, so an empty file (or no environment at all)
//! is a valid configuration. Values come either from a YAML file or from
//! `GPU_VERIFY_*` environment variables layered over the defaults.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use snafu::{ResultExt, Snafu, ensure};

use crate::{
    params,
    workloads::{GpuBurn, ImageTable, ValidationError, gpu_burn},
};

/// Prefix of the environment variables read by [`HarnessConfig::from_env`].
pub const ENV_PREFIX: &str = "GPU_VERIFY_";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("unable to read {}: {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("unable to parse {}: {}", path.display(), source))]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("invalid value {:?} for {}: {}", value, variable, source))]
    InvalidNumber {
        variable: String,
        value: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("{} must be greater than zero", field))]
    Zero { field: &'static str },

    #[snafu(display(
        "poll interval of {}s exceeds the {} of {}s",
        interval,
        field,
        timeout
    ))]
    IntervalExceedsTimeout {
        field: &'static str,
        interval: u64,
        timeout: u64,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Namespace verification workloads run in.
    pub namespace: String,

    /// Cluster architecture, used to pick architecture specific images.
    pub architecture: String,

    pub poll_interval_secs: u64,

    /// Upper bound on a workload run, from submission to terminal phase.
    pub workload_timeout_secs: u64,

    pub gpu_burn_duration_secs: u64,

    pub driver_install_timeout_secs: u64,

    /// Filter directives for the log subscriber, e.g. `gpu_verify=debug`.
    pub log_level: String,

    /// Kubeconfig to use instead of the inferred one.
    pub kubeconfig: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            namespace: params::DEFAULT_WORKLOAD_NAMESPACE.to_owned(),
            architecture: "amd64".to_owned(),
            poll_interval_secs: params::DEFAULT_POLL_INTERVAL.as_secs(),
            workload_timeout_secs: params::DEFAULT_WORKLOAD_TIMEOUT.as_secs(),
            gpu_burn_duration_secs: gpu_burn::DEFAULT_DURATION.as_secs(),
            driver_install_timeout_secs: params::DEFAULT_DRIVER_INSTALL_TIMEOUT.as_secs(),
            log_level: "info".to_owned(),
            kubeconfig: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml(input: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(input).context(ParseSnafu { path })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        Self::from_yaml(&input, path)
    }

    /// Defaults overridden by `GPU_VERIFY_*` variables from the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Like [`HarnessConfig::from_env`] with an explicit set of variables.
    /// Variables without the prefix are ignored, as are empty values.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.into();
            if value.is_empty() {
                continue;
            }
            let variable = key.as_ref();
            match name {
                "NAMESPACE" => config.namespace = value,
                "ARCHITECTURE" => config.architecture = value,
                "LOG_LEVEL" => config.log_level = value,
                "KUBECONFIG" => config.kubeconfig = Some(PathBuf::from(value)),
                "POLL_INTERVAL_SECS" => config.poll_interval_secs = number(variable, value)?,
                "WORKLOAD_TIMEOUT_SECS" => config.workload_timeout_secs = number(variable, value)?,
                "GPU_BURN_DURATION_SECS" => {
                    config.gpu_burn_duration_secs = number(variable, value)?
                }
                "DRIVER_INSTALL_TIMEOUT_SECS" => {
                    config.driver_install_timeout_secs = number(variable, value)?
                }
                _ => warn!(message = "Ignoring unknown configuration variable.", %variable),
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.poll_interval_secs > 0,
            ZeroSnafu {
                field: "poll_interval_secs"
            }
        );
        for (field, timeout) in [
            ("workload_timeout_secs", self.workload_timeout_secs),
            ("driver_install_timeout_secs", self.driver_install_timeout_secs),
        ] {
            ensure!(
                timeout >= self.poll_interval_secs,
                IntervalExceedsTimeoutSnafu {
                    field,
                    interval: self.poll_interval_secs,
                    timeout,
                }
            );
        }
        Ok(())
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn workload_timeout(&self) -> Duration {
        Duration::from_secs(self.workload_timeout_secs)
    }

    pub const fn gpu_burn_duration(&self) -> Duration {
        Duration::from_secs(self.gpu_burn_duration_secs)
    }

    pub const fn driver_install_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_install_timeout_secs)
    }

    /// A gpu-burn workload named `name` for the configured architecture and
    /// duration.
    pub fn gpu_burn(&self, name: &str, images: &ImageTable) -> Result<GpuBurn, ValidationError> {
        Ok(GpuBurn::for_architecture(name, &self.architecture, images)?
            .with_duration(self.gpu_burn_duration()))
    }
}

fn number(variable: &str, value: String) -> Result<u64, ConfigError> {
    value.parse().context(InvalidNumberSnafu { variable, value })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use similar_asserts::assert_eq;

    use super::*;

    fn parse(input: &str) -> Result<HarnessConfig, ConfigError> {
        HarnessConfig::from_yaml(input, Path::new("harness.yaml"))
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(parse("{}").unwrap(), HarnessConfig::default());
    }

    #[test]
    fn parse_yaml() {
        let config = parse(indoc! {r#"
            namespace: gpu-tests
            architecture: arm64
            poll_interval_secs: 10
            gpu_burn_duration_secs: 60
            kubeconfig: /tmp/kubeconfig
        "#})
        .unwrap();

        assert_eq!(
            config,
            HarnessConfig {
                namespace: "gpu-tests".to_owned(),
                architecture: "arm64".to_owned(),
                poll_interval_secs: 10,
                gpu_burn_duration_secs: 60,
                kubeconfig: Some(PathBuf::from("/tmp/kubeconfig")),
                ..HarnessConfig::default()
            }
        );
        assert_eq!(config.gpu_burn_duration(), Duration::from_secs(60));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let error = parse("namespaces: typo\n").unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }), "{error}");
        assert!(error.to_string().starts_with("unable to parse harness.yaml"));
    }

    #[test]
    fn interval_must_fit_in_timeouts() {
        let error = parse("poll_interval_secs: 0\n").unwrap_err();
        assert_eq!(error.to_string(), "poll_interval_secs must be greater than zero");

        let error = parse("poll_interval_secs: 30\nworkload_timeout_secs: 20\n").unwrap_err();
        assert_eq!(
            error.to_string(),
            "poll interval of 30s exceeds the workload_timeout_secs of 20s"
        );
    }

    #[test]
    fn env_overrides_defaults() {
        let config = HarnessConfig::from_vars([
            ("GPU_VERIFY_NAMESPACE", "gpu-tests"),
            ("GPU_VERIFY_WORKLOAD_TIMEOUT_SECS", "120"),
            ("GPU_VERIFY_LOG_LEVEL", ""),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(config.namespace, "gpu-tests");
        assert_eq!(config.workload_timeout(), Duration::from_secs(120));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.poll_interval(), params::DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn env_rejects_bad_numbers() {
        let error =
            HarnessConfig::from_vars([("GPU_VERIFY_POLL_INTERVAL_SECS", "5s")]).unwrap_err();
        assert!(
            error
                .to_string()
                .starts_with(r#"invalid value "5s" for GPU_VERIFY_POLL_INTERVAL_SECS"#),
            "{error}"
        );
    }

    #[test]
    fn gpu_burn_for_configured_architecture() {
        let config = HarnessConfig {
            architecture: "arm64".to_owned(),
            gpu_burn_duration_secs: 5,
            ..HarnessConfig::default()
        };
        let burn = config
            .gpu_burn(gpu_burn::POD_NAME, &gpu_burn::default_images())
            .unwrap();
        assert_eq!(burn.image(), "quay.io/wabouham/gpu_burn_arm64:ubi9");
        assert_eq!(burn.duration(), Duration::from_secs(5));

        let unsupported = HarnessConfig {
            architecture: "ppc64le".to_owned(),
            ..HarnessConfig::default()
        };
        assert!(unsupported
            .gpu_burn(gpu_burn::POD_NAME, &gpu_burn::default_images())
            .is_err());
    }
}
