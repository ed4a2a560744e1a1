//! `vectorAdd` from the CUDA samples: a tiny kernel whose result is checked
//! on the host.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, PodResourceClaim};

use super::{
    DeviceRequest, Placement, SuccessCriteriaError, ValidationError, Workload, require_marker,
    unprivileged_container, unprivileged_pod, validate,
};

pub const DEFAULT_IMAGE: &str = "nvcr.io/nvidia/k8s/cuda-sample:vectoradd-cuda12.5.0";

pub const CONTAINER_NAME: &str = "cuda-vectoradd-ctr";

pub const APP_LABEL: (&str, &str) = ("app", "cuda-vectoradd");

/// Printed by the sample when the device result matches the host result.
pub const PASS_MARKER: &str = "Test PASSED";

/// The CUDA vectorAdd correctness workload.
///
/// The image is multi-arch, so unlike [`super::GpuBurn`] no architecture
/// table is involved. Devices come either from the device plugin or, with
/// [`VectorAdd::with_resource_claims`], from DRA claims.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorAdd {
    name: String,
    image: String,
    devices: DeviceRequest,
    placement: Placement,
    resource_claims: Vec<PodResourceClaim>,
}

impl VectorAdd {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: DEFAULT_IMAGE.to_owned(),
            devices: DeviceRequest::default(),
            placement: Placement::gpu_nodes(),
            resource_claims: Vec::new(),
        }
    }

    pub fn with_image(self, image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..self
        }
    }

    pub fn with_devices(self, devices: DeviceRequest) -> Self {
        Self { devices, ..self }
    }

    pub fn with_placement(self, placement: Placement) -> Self {
        Self { placement, ..self }
    }

    /// Attach pod level claims and have the container consume all of them in
    /// place of any device plugin limit.
    pub fn with_resource_claims(self, resource_claims: Vec<PodResourceClaim>) -> Self {
        let devices = DeviceRequest::Claims(
            resource_claims
                .iter()
                .map(|claim| claim.name.clone())
                .collect(),
        );
        Self {
            devices,
            resource_claims,
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

impl Workload for VectorAdd {
    fn build_spec(&self) -> Result<Pod, ValidationError> {
        validate(&self.name, &self.image)?;

        let container =
            unprivileged_container(CONTAINER_NAME, &self.image, self.devices.requirements());
        Ok(unprivileged_pod(
            &self.name,
            vec![container],
            &self.placement,
            BTreeMap::from([(APP_LABEL.0.to_owned(), APP_LABEL.1.to_owned())]),
            self.resource_claims.clone(),
        ))
    }

    fn check_success(&self, logs: &str) -> Result<(), SuccessCriteriaError> {
        require_marker(logs, PASS_MARKER)
    }
}
