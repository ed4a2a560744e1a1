//! Operator-owned custom resources, reduced to the status fields conditions
//! look at.

use kube::{
    ResourceExt,
    api::{DynamicObject, GroupVersionKind},
    discovery::ApiResource,
};
use serde::Deserialize;

/// The GPU operator's `ClusterPolicy` (`nvidia.com/v1`, cluster scoped).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterPolicy {
    pub name: String,
    /// `status.state`, absent until the operator first reconciles.
    pub state: Option<String>,
}

/// An OLM `ClusterServiceVersion` (`operators.coreos.com/v1alpha1`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterServiceVersion {
    pub name: String,
    pub namespace: String,
    /// `status.phase`.
    pub phase: Option<String>,
}

#[derive(Deserialize, Default)]
struct PolicyStatus {
    state: Option<String>,
}

#[derive(Deserialize, Default)]
struct CsvStatus {
    phase: Option<String>,
}

impl ClusterPolicy {
    pub const KIND: &'static str = "ClusterPolicy";

    pub fn api_resource() -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("nvidia.com", "v1", Self::KIND),
            "clusterpolicies",
        )
    }

    pub fn from_dynamic(object: &DynamicObject) -> Result<Self, serde_json::Error> {
        let status: PolicyStatus = decode_status(object)?;
        Ok(Self {
            name: object.name_any(),
            state: status.state,
        })
    }
}

impl ClusterServiceVersion {
    pub const KIND: &'static str = "ClusterServiceVersion";

    pub fn api_resource() -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("operators.coreos.com", "v1alpha1", Self::KIND),
            "clusterserviceversions",
        )
    }

    pub fn from_dynamic(object: &DynamicObject) -> Result<Self, serde_json::Error> {
        let status: CsvStatus = decode_status(object)?;
        Ok(Self {
            name: object.name_any(),
            namespace: object.namespace().unwrap_or_default(),
            phase: status.phase,
        })
    }
}

fn decode_status<T>(object: &DynamicObject) -> Result<T, serde_json::Error>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match object.data.get("status") {
        Some(status) if !status.is_null() => serde_json::from_value(status.clone()),
        _ => Ok(T::default()),
    }
}
