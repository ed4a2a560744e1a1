//! Dynamic Resource Allocation helpers for MIG workloads.
//!
//! A MIG slice is requested through a `ResourceClaimTemplate` whose single
//! request names the MIG device class; pods reference the template through a
//! pod level resource claim and the container consumes that claim by name.

use std::sync::LazyLock;

use k8s_openapi::api::core::v1::PodResourceClaim;
use kube::{
    ResourceExt,
    api::{DynamicObject, GroupVersionKind},
    discovery::ApiResource,
};
use regex::Regex;
use serde_json::json;

use crate::{
    cluster::{Cluster, QueryError, Selector},
    params,
};

/// Device class published by the DRA driver for MIG instances.
pub const MIG_DEVICE_CLASS: &str = "mig.nvidia.com";

/// Name of the single request in a MIG claim template.
pub const MIG_REQUEST_NAME: &str = "mig";

/// GPU products able to run the DRA MIG flow: Hopper and Grace Blackwell
/// parts, e.g. `NVIDIA-H100-PCIE-80GB` or `NVIDIA-GB200`.
static MIG_CAPABLE_PRODUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^NVIDIA-(H|GB)\d{3}($|-)").expect("valid regex"));

pub fn resource_claim_template_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("resource.k8s.io", "v1", "ResourceClaimTemplate"),
        "resourceclaimtemplates",
    )
}

/// A `ResourceClaimTemplate` asking for exactly one MIG device.
pub fn mig_claim_template(namespace: &str, name: &str) -> DynamicObject {
    let mut template =
        DynamicObject::new(name, &resource_claim_template_resource()).within(namespace);
    template.data = json!({
        "spec": {
            "spec": {
                "devices": {
                    "requests": [{
                        "name": MIG_REQUEST_NAME,
                        "exactly": { "deviceClassName": MIG_DEVICE_CLASS },
                    }],
                },
            },
        },
    });
    template
}

/// Create [`mig_claim_template`] in `namespace`.
pub async fn create_mig_claim_template<C>(
    cluster: &C,
    namespace: &str,
    name: &str,
) -> Result<(), QueryError>
where
    C: Cluster + ?Sized,
{
    let template = mig_claim_template(namespace, name);
    cluster
        .create_dynamic(namespace, &resource_claim_template_resource(), &template)
        .await?;
    info!(message = "Created MIG resource claim template.", %namespace, %name);
    Ok(())
}

/// A pod level claim named `claim_name` generated from `template_name`.
///
/// The template name sits directly on the claim, the only shape API servers
/// serving `resource.k8s.io/v1` accept.
pub fn pod_claim(claim_name: &str, template_name: &str) -> PodResourceClaim {
    PodResourceClaim {
        name: claim_name.to_owned(),
        resource_claim_template_name: Some(template_name.to_owned()),
        ..PodResourceClaim::default()
    }
}

pub fn is_mig_capable(product: &str) -> bool {
    MIG_CAPABLE_PRODUCT.is_match(product)
}

/// Name of the first node whose GPU product supports MIG, if any.
pub async fn find_mig_capable_node<C>(cluster: &C) -> Result<Option<String>, QueryError>
where
    C: Cluster + ?Sized,
{
    let nodes = cluster.list_nodes(&Selector::new()).await?;
    let found = nodes.iter().find_map(|node| {
        let product = node.labels().get(params::GPU_PRODUCT_LABEL)?;
        debug!(message = "Found GPU node.", node = %node.name_any(), %product);
        is_mig_capable(product).then(|| node.name_any())
    });
    if found.is_none() {
        info!(message = "No MIG capable GPU nodes found.");
    }
    Ok(found)
}
