//! `gpu_burn`: saturate every visible GPU for a while and report per-device
//! health.

use std::{collections::BTreeMap, time::Duration};

use k8s_openapi::api::core::v1::{Pod, Toleration};

use super::{
    DeviceRequest, ImageTable, Placement, SuccessCriteriaError, ValidationError, Workload,
    require_marker, unprivileged_container, unprivileged_pod, validate,
};

/// Name of the gpu-burn container.
pub const CONTAINER_NAME: &str = "gpu-burn-ctr";

/// Default pod name for gpu-burn workloads.
pub const POD_NAME: &str = "gpu-burn-pod";

/// Label attached to gpu-burn pods.
pub const APP_LABEL: (&str, &str) = ("app", "gpu-burn-app");

/// Printed once the burn has processed its whole workload.
pub const COMPLETION_MARKER: &str = "100.0%  proc'd:";

pub const DEFAULT_DURATION: Duration = Duration::from_secs(300);

/// The published gpu-burn images per architecture.
pub fn default_images() -> ImageTable {
    [
        ("amd64", "quay.io/wabouham/gpu_burn_amd64:ubi9"),
        ("arm64", "quay.io/wabouham/gpu_burn_arm64:ubi9"),
    ]
    .into_iter()
    .collect()
}

/// Marker printed for a healthy device `index`.
pub fn device_marker(index: u32) -> String {
    format!("GPU {index}: OK")
}

/// The gpu-burn stress workload.
///
/// Defaults: one whole GPU, a 300 second burn, and a toleration for the GPU
/// node taint. Every `with_*` call returns a new value with one field changed.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuBurn {
    name: String,
    image: String,
    duration: Duration,
    gpu_count: u32,
    devices: DeviceRequest,
    placement: Placement,
}

impl GpuBurn {
    /// `image` is architecture specific; see [`GpuBurn::for_architecture`].
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        let name = name.into();
        debug!(message = "Creating gpu-burn workload.", %name);
        Self {
            name,
            image: image.into(),
            duration: DEFAULT_DURATION,
            gpu_count: 1,
            devices: DeviceRequest::default(),
            placement: Placement::gpu_nodes(),
        }
    }

    /// Pick the image matching the cluster architecture from `images`.
    pub fn for_architecture(
        name: impl Into<String>,
        architecture: &str,
        images: &ImageTable,
    ) -> Result<Self, ValidationError> {
        let image = images
            .get(architecture)
            .ok_or_else(|| ValidationError::UnsupportedArchitecture {
                architecture: architecture.to_owned(),
            })?;
        Ok(Self::new(name, image))
    }

    pub fn with_image(self, image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..self
        }
    }

    /// How long `gpu_burn` runs, truncated to whole seconds.
    pub fn with_duration(self, duration: Duration) -> Self {
        Self { duration, ..self }
    }

    /// Resource shape, e.g. [`DeviceRequest::Mig`] for MIG profiles.
    pub fn with_devices(self, devices: DeviceRequest) -> Self {
        Self { devices, ..self }
    }

    pub fn with_node_selector(self, node_selector: BTreeMap<String, String>) -> Self {
        Self {
            placement: Placement {
                node_selector,
                ..self.placement
            },
            ..self
        }
    }

    pub fn with_tolerations(self, tolerations: Vec<Toleration>) -> Self {
        Self {
            placement: Placement {
                tolerations,
                ..self.placement
            },
            ..self
        }
    }

    pub fn with_placement(self, placement: Placement) -> Self {
        Self { placement, ..self }
    }

    /// Number of devices expected to report `GPU i: OK`. Set this when a
    /// request spans several devices or MIG slices.
    pub fn with_gpu_count(self, gpu_count: u32) -> Self {
        Self { gpu_count, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub const fn duration(&self) -> Duration {
        self.duration
    }

    pub const fn gpu_count(&self) -> u32 {
        self.gpu_count
    }
}

impl Workload for GpuBurn {
    fn build_spec(&self) -> Result<Pod, ValidationError> {
        debug!(message = "Building gpu-burn pod spec.", name = %self.name);
        validate(&self.name, &self.image)?;

        let mut container =
            unprivileged_container(CONTAINER_NAME, &self.image, self.devices.requirements());
        container.command = Some(vec![
            "./gpu_burn".to_owned(),
            self.duration.as_secs().to_string(),
        ]);

        Ok(unprivileged_pod(
            &self.name,
            vec![container],
            &self.placement,
            BTreeMap::from([(APP_LABEL.0.to_owned(), APP_LABEL.1.to_owned())]),
            Vec::new(),
        ))
    }

    /// Every device index must report OK and the run must reach 100%.
    fn check_success(&self, logs: &str) -> Result<(), SuccessCriteriaError> {
        for index in 0..self.gpu_count {
            require_marker(logs, &device_marker(index))?;
        }
        require_marker(logs, COMPLETION_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::workloads::exists_toleration;

    const PASSING_LOGS: &str = indoc! {"
        GPU 0: NVIDIA A100-SXM4-40GB (UUID: GPU-5ac1c7c6)
        GPU 1: NVIDIA A100-SXM4-40GB (UUID: GPU-0f1e2d3c)
        Initialized device 0 with 40339 MB of memory
        Initialized device 1 with 40339 MB of memory
        100.0%  proc'd: 9660 (17398 Gflop/s) - 9660 (17388 Gflop/s)   errors: 0 - 0   temps: 56 C - 58 C
        Tested 2 GPUs:
        \tGPU 0: OK
        \tGPU 1: OK
    "};

    #[test]
    fn defaults() {
        let burn = GpuBurn::new(POD_NAME, "img:arch");
        assert_eq!(burn.duration(), DEFAULT_DURATION);
        assert_eq!(burn.gpu_count(), 1);
        assert_eq!(burn.devices, DeviceRequest::Gpus(1));
        assert_eq!(burn.placement, Placement::gpu_nodes());
    }

    #[test]
    fn overrides_change_one_field() {
        let base = GpuBurn::new("w1", "img:arch");
        let longer = base.clone().with_duration(Duration::from_secs(5));

        assert_eq!(longer.duration(), Duration::from_secs(5));
        assert_eq!(longer.image(), base.image());
        assert_eq!(longer.gpu_count(), base.gpu_count());
        assert_eq!(longer.placement, base.placement);
        assert_eq!(base.duration(), DEFAULT_DURATION);
    }

    #[test]
    fn image_from_architecture() {
        let images = default_images();
        let burn = GpuBurn::for_architecture("w1", "arm64", &images).unwrap();
        assert_eq!(burn.image(), "quay.io/wabouham/gpu_burn_arm64:ubi9");

        assert_eq!(
            GpuBurn::for_architecture("w1", "s390x", &images).unwrap_err(),
            ValidationError::UnsupportedArchitecture {
                architecture: "s390x".to_owned()
            }
        );
    }

    #[test]
    fn spec_encodes_duration_resources_and_placement() {
        let pod = GpuBurn::new("w1", "img:arch")
            .with_duration(Duration::from_millis(5_900))
            .with_node_selector(BTreeMap::from([(
                "nvidia.com/gpu.present".to_owned(),
                "true".to_owned(),
            )]))
            .build_spec()
            .unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("w1"));
        assert_eq!(
            pod.metadata.labels,
            Some(BTreeMap::from([(
                "app".to_owned(),
                "gpu-burn-app".to_owned()
            )]))
        );

        let spec = pod.spec.unwrap();
        assert_eq!(
            spec.tolerations,
            Some(vec![exists_toleration("nvidia.com/gpu", "NoSchedule")])
        );
        assert_eq!(
            spec.node_selector
                .as_ref()
                .and_then(|selector| selector.get("nvidia.com/gpu.present"))
                .map(String::as_str),
            Some("true")
        );

        let container = &spec.containers[0];
        assert_eq!(container.name, CONTAINER_NAME);
        assert_eq!(container.image.as_deref(), Some("img:arch"));
        assert_eq!(
            container.command,
            Some(vec!["./gpu_burn".to_owned(), "5".to_owned()])
        );
        assert_eq!(
            container.resources.as_ref().and_then(|r| r.limits.clone()),
            DeviceRequest::Gpus(1).requirements().limits
        );
    }

    #[test]
    fn mig_slices() {
        let pod = GpuBurn::new("w1", "img:arch")
            .with_devices(DeviceRequest::Mig {
                profile: "1g.5gb".to_owned(),
                count: 2,
            })
            .with_gpu_count(2)
            .build_spec()
            .unwrap();

        let limits = pod.spec.unwrap().containers[0]
            .resources
            .clone()
            .and_then(|r| r.limits)
            .unwrap();
        assert!(limits.contains_key("nvidia.com/mig-1g.5gb"));
        assert!(!limits.contains_key("nvidia.com/gpu"));
    }

    #[test]
    fn empty_name_or_image_fails_validation() {
        assert_eq!(
            GpuBurn::new("", "img:arch").build_spec().unwrap_err(),
            ValidationError::EmptyName
        );
        assert_eq!(
            GpuBurn::new("w1", "img").with_image("").build_spec().unwrap_err(),
            ValidationError::EmptyImage
        );
    }

    #[test]
    fn passes_with_every_device_and_completion() {
        let burn = GpuBurn::new("w1", "img:arch").with_gpu_count(2);
        assert_eq!(burn.check_success(PASSING_LOGS), Ok(()));
    }

    #[test]
    fn fails_when_any_device_marker_is_missing() {
        let burn = GpuBurn::new("w1", "img:arch").with_gpu_count(3);
        assert_eq!(
            burn.check_success(PASSING_LOGS),
            Err(SuccessCriteriaError::MissingMarker {
                marker: "GPU 2: OK".to_owned()
            })
        );

        let faulty = PASSING_LOGS.replace("GPU 1: OK", "GPU 1: FAULTY");
        assert_eq!(
            GpuBurn::new("w1", "img:arch")
                .with_gpu_count(2)
                .check_success(&faulty),
            Err(SuccessCriteriaError::MissingMarker {
                marker: "GPU 1: OK".to_owned()
            })
        );
    }

    #[test]
    fn fails_without_completion_even_if_every_device_is_ok() {
        let truncated = PASSING_LOGS.replace("100.0%", "87.5%");
        assert_eq!(
            GpuBurn::new("w1", "img:arch")
                .with_gpu_count(2)
                .check_success(&truncated),
            Err(SuccessCriteriaError::MissingMarker {
                marker: COMPLETION_MARKER.to_owned()
            })
        );
    }
}
