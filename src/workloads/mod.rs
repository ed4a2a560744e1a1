//! Verification workloads and the orchestrator that runs them.
//!
//! A [`Workload`] knows how to turn its configuration into a pod and how to
//! judge that pod's output. [`WorkloadBuilder`] submits the pod, waits for it
//! to terminate and hands the logs back to the workload.

mod builder;
pub mod gpu_burn;
pub mod vector_add;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{
        Capabilities, Container, Pod, PodResourceClaim, PodSpec, ResourceClaim,
        ResourceRequirements, SeccompProfile, SecurityContext, Toleration,
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};
use snafu::Snafu;

pub use self::{
    builder::{WorkloadBuilder, WorkloadError, WorkloadState},
    gpu_burn::GpuBurn,
    vector_add::VectorAdd,
};
use crate::params;

/// A runnable verification unit.
///
/// Implementations are plain configuration values: building the pod has no
/// side effects and checking the output never touches the cluster.
pub trait Workload: Send + Sync {
    /// Materialize the pod to submit. The first container is the one whose
    /// logs are handed to [`Workload::check_success`].
    fn build_spec(&self) -> Result<Pod, ValidationError>;

    /// Judge the full output of the primary container of a pod that
    /// terminated successfully.
    fn check_success(&self, logs: &str) -> Result<(), SuccessCriteriaError>;
}

/// A workload configuration that cannot be turned into a pod.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum ValidationError {
    #[snafu(display("pod name cannot be empty"))]
    EmptyName,

    #[snafu(display("container image cannot be empty"))]
    EmptyImage,

    #[snafu(display("no image known for architecture {:?}", architecture))]
    UnsupportedArchitecture { architecture: String },

    #[snafu(display("pod spec has no container to run"))]
    MissingContainer,
}

/// Output of a terminated workload that lacks required evidence.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum SuccessCriteriaError {
    #[snafu(display("logs do not contain {:?}", marker))]
    MissingMarker { marker: String },
}

pub(crate) fn validate(name: &str, image: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if image.is_empty() {
        return Err(ValidationError::EmptyImage);
    }
    Ok(())
}

pub(crate) fn require_marker(logs: &str, marker: &str) -> Result<(), SuccessCriteriaError> {
    if logs.contains(marker) {
        Ok(())
    } else {
        Err(SuccessCriteriaError::MissingMarker {
            marker: marker.to_owned(),
        })
    }
}

/// Read-only mapping from cluster architecture (`amd64`, `arm64`, ...) to a
/// container image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageTable(BTreeMap<String, String>);

impl ImageTable {
    pub fn get(&self, architecture: &str) -> Option<&str> {
        self.0.get(architecture).map(String::as_str)
    }

    pub fn architectures(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<A, I> FromIterator<(A, I)> for ImageTable
where
    A: Into<String>,
    I: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (A, I)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(architecture, image)| (architecture.into(), image.into()))
                .collect(),
        )
    }
}

/// The accelerator resources a workload asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceRequest {
    /// Whole GPUs through the device plugin.
    Gpus(u32),
    /// MIG slices of a given profile, e.g. `1g.10gb`.
    Mig { profile: String, count: u32 },
    /// Devices allocated through DRA claims, named as in the pod's
    /// `resourceClaims`.
    Claims(Vec<String>),
    /// Anything else.
    Custom(ResourceRequirements),
}

impl Default for DeviceRequest {
    fn default() -> Self {
        Self::Gpus(1)
    }
}

impl DeviceRequest {
    pub fn requirements(&self) -> ResourceRequirements {
        match self {
            Self::Gpus(count) => limits(params::GPU_RESOURCE, *count),
            Self::Mig { profile, count } => {
                limits(&format!("{}{profile}", params::MIG_RESOURCE_PREFIX), *count)
            }
            Self::Claims(names) => ResourceRequirements {
                claims: Some(
                    names
                        .iter()
                        .map(|name| ResourceClaim {
                            name: name.clone(),
                            ..ResourceClaim::default()
                        })
                        .collect(),
                ),
                ..ResourceRequirements::default()
            },
            Self::Custom(requirements) => requirements.clone(),
        }
    }
}

fn limits(resource: &str, count: u32) -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([(
            resource.to_owned(),
            Quantity(count.to_string()),
        )])),
        ..ResourceRequirements::default()
    }
}

/// Where a workload may be scheduled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Placement {
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
}

impl Placement {
    /// Tolerate the taint GPU nodes carry, without restricting node choice.
    pub fn gpu_nodes() -> Self {
        Self::default().tolerate(params::GPU_TAINT_KEY, "NoSchedule")
    }

    /// Add an `Exists` toleration for `key` with `effect`.
    pub fn tolerate(mut self, key: &str, effect: &str) -> Self {
        self.tolerations.push(exists_toleration(key, effect));
        self
    }

    /// Require nodes labelled `key=value`.
    pub fn on_nodes(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node_selector.insert(key.into(), value.into());
        self
    }
}

/// A toleration matching any taint with `key` and `effect`, whatever its value.
pub fn exists_toleration(key: &str, effect: &str) -> Toleration {
    Toleration {
        key: Some(key.to_owned()),
        effect: Some(effect.to_owned()),
        operator: Some("Exists".to_owned()),
        ..Toleration::default()
    }
}

/// A container that runs without privileges or added capabilities.
pub fn unprivileged_container(
    name: &str,
    image: &str,
    resources: ResourceRequirements,
) -> Container {
    Container {
        name: name.to_owned(),
        image: Some(image.to_owned()),
        image_pull_policy: Some("IfNotPresent".to_owned()),
        resources: Some(resources),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_owned()]),
                ..Capabilities::default()
            }),
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_owned(),
                ..SeccompProfile::default()
            }),
            ..SecurityContext::default()
        }),
        ..Container::default()
    }
}

/// A run-to-completion pod around `containers`.
pub fn unprivileged_pod(
    name: &str,
    containers: Vec<Container>,
    placement: &Placement,
    labels: BTreeMap<String, String>,
    resource_claims: Vec<PodResourceClaim>,
) -> Pod {
    let Placement {
        node_selector,
        tolerations,
    } = placement.clone();

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers,
            restart_policy: Some("Never".to_owned()),
            node_selector: (!node_selector.is_empty()).then_some(node_selector),
            tolerations: (!tolerations.is_empty()).then_some(tolerations),
            resource_claims: (!resource_claims.is_empty()).then_some(resource_claims),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}
