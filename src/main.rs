#[macro_use]
extern crate tracing;

use std::{path::Path, process::ExitCode};

use gpu_verify::{
    KubeCluster, QueryError, WorkloadBuilder, WorkloadError,
    cluster::ConnectError,
    config::{ConfigError, HarnessConfig},
    params, trace,
    wait::{ClusterPolicyState, PollError, PollSpec},
    workloads::{ValidationError, gpu_burn},
};
use snafu::{ResultExt, Snafu};

/// Path of a YAML configuration file. Without it the configuration is read
/// from `GPU_VERIFY_*` variables.
const CONFIG_VAR: &str = "GPU_VERIFY_CONFIG";

#[derive(Debug, Snafu)]
enum RunError {
    #[snafu(display("{}", source))]
    Config { source: ConfigError },

    #[snafu(display("{}", source))]
    Connect { source: ConnectError },

    #[snafu(display("GPU operator not ready: {}", source))]
    OperatorNotReady { source: PollError<QueryError> },

    #[snafu(display("{}", source))]
    Workload { source: ValidationError },

    #[snafu(display("gpu-burn did not pass: {}", source))]
    Verification { source: WorkloadError },
}

fn load_config() -> Result<HarnessConfig, ConfigError> {
    match std::env::var_os(CONFIG_VAR) {
        Some(path) => HarnessConfig::load(Path::new(&path)),
        None => HarnessConfig::from_env(),
    }
}

async fn run(config: &HarnessConfig) -> Result<(), RunError> {
    let cluster = match &config.kubeconfig {
        Some(path) => KubeCluster::from_kubeconfig(path).await,
        None => KubeCluster::try_default().await,
    }
    .context(ConnectSnafu)?;

    PollSpec::new(config.poll_interval(), config.workload_timeout())
        .wait(&ClusterPolicyState::ready(
            &cluster,
            params::CLUSTER_POLICY_NAME,
        ))
        .await
        .context(OperatorNotReadySnafu)?;

    let burn = config
        .gpu_burn(gpu_burn::POD_NAME, &gpu_burn::default_images())
        .context(WorkloadSnafu)?;
    let mut workload = WorkloadBuilder::new(&cluster, config.namespace.as_str(), burn)
        .with_poll_interval(config.poll_interval());
    workload
        .create()
        .await
        .wait_until_success(config.workload_timeout() + config.gpu_burn_duration())
        .await;

    if let Err(error) = workload.delete().await {
        warn!(message = "Unable to delete workload pod.", %error);
    }
    match workload.into_error() {
        None => Ok(()),
        Some(source) => Err(RunError::Verification { source }),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{}", RunError::Config { source: error });
            return ExitCode::FAILURE;
        }
    };
    trace::init(true, false, &config.log_level);

    match run(&config).await {
        Ok(()) => {
            info!(message = "GPU verification passed.");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(message = "GPU verification failed.", %error);
            ExitCode::FAILURE
        }
    }
}
