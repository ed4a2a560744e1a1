//! Labels, resource names and default timings shared by the conditions and
//! the workloads.

use std::time::Duration;

/// Extended resource advertised by the device plugin for whole GPUs.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Prefix of the extended resources advertised for MIG slices, e.g.
/// `nvidia.com/mig-1g.10gb`.
pub const MIG_RESOURCE_PREFIX: &str = "nvidia.com/mig-";

/// Taint key carried by GPU nodes.
pub const GPU_TAINT_KEY: &str = "nvidia.com/gpu";

/// Node label set by feature discovery when a GPU is present.
pub const GPU_PRESENT_LABEL: &str = "nvidia.com/gpu.present";

/// Node label carrying the GPU product name.
pub const GPU_PRODUCT_LABEL: &str = "nvidia.com/gpu.product";

/// Namespace the GPU operator is installed into.
pub const GPU_OPERATOR_NAMESPACE: &str = "nvidia-gpu-operator";

/// Name of the singleton `ClusterPolicy`.
pub const CLUSTER_POLICY_NAME: &str = "gpu-cluster-policy";

/// Default namespace for verification workloads.
pub const DEFAULT_WORKLOAD_NAMESPACE: &str = "test-gpu-burn";

/// Interval between pod phase observations while a workload runs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Timeout applied to a workload when the caller has no opinion.
pub const DEFAULT_WORKLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Bound on a driver Helm install or uninstall.
pub const DEFAULT_DRIVER_INSTALL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// `ClusterPolicy` state reported once every operand is deployed.
pub const CLUSTER_POLICY_READY: &str = "ready";

/// `ClusterPolicy` state reported while operands are still converging.
pub const CLUSTER_POLICY_NOT_READY: &str = "notReady";

/// `ClusterServiceVersion` phase reported after a successful install.
pub const CSV_SUCCEEDED: &str = "Succeeded";
