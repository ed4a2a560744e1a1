//! The cluster seen through the narrow interface the harness needs.
//!
//! [`Cluster`] covers object reads and the few writes the orchestrator
//! performs, [`PodLogs`] fetches container output. [`KubeCluster`] implements
//! both on top of a `kube` client.

mod client;
mod resources;
mod selector;

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment},
    core::v1::{Node, Pod},
};
use kube::{api::DynamicObject, discovery::ApiResource};
use snafu::Snafu;

pub use self::{
    client::{ConnectError, KubeCluster},
    resources::{ClusterPolicy, ClusterServiceVersion},
    selector::Selector,
};
use crate::wait::ConditionError;

/// An error returned by a cluster query.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    /// The object does not exist (yet).
    #[snafu(display("{} {:?} not found", kind, name))]
    NotFound { kind: &'static str, name: String },

    /// The API server answered with an error status other than "not found".
    #[snafu(display("{} {} {:?} rejected ({}): {}", verb, kind, name, code, reason))]
    Rejected {
        verb: &'static str,
        kind: &'static str,
        name: String,
        code: u16,
        reason: String,
    },

    /// The request never produced an API response.
    #[snafu(display("{} {} {:?} failed: {}", verb, kind, name, source))]
    Transport {
        verb: &'static str,
        kind: &'static str,
        name: String,
        source: kube::Error,
    },

    /// The object was returned but its status could not be decoded.
    #[snafu(display("unable to decode {} {:?}: {}", kind, name, source))]
    Decode {
        kind: &'static str,
        name: String,
        source: serde_json::Error,
    },

    /// A list returned nothing where at least one object was required.
    #[snafu(display("no {} matched selector {:?}", kind, selector))]
    NoMatches { kind: &'static str, selector: String },
}

impl QueryError {
    /// Whether this error only means the object is absent.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl ConditionError for QueryError {
    fn is_absent(&self) -> bool {
        self.is_not_found()
    }
}

/// Object access used by conditions and the workload orchestrator.
///
/// Implementations must tolerate concurrent calls; the harness never holds a
/// lock around them.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, QueryError>;

    async fn list_pods(&self, namespace: &str, selector: &Selector)
    -> Result<Vec<Pod>, QueryError>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, QueryError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), QueryError>;

    async fn get_node(&self, name: &str) -> Result<Node, QueryError>;

    async fn list_nodes(&self, selector: &Selector) -> Result<Vec<Node>, QueryError>;

    async fn get_deployment(&self, namespace: &str, name: &str)
    -> Result<Deployment, QueryError>;

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Deployment>, QueryError>;

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, QueryError>;

    async fn list_daemon_sets(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<DaemonSet>, QueryError>;

    async fn get_cluster_policy(&self, name: &str) -> Result<ClusterPolicy, QueryError>;

    async fn get_cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ClusterServiceVersion, QueryError>;

    async fn list_cluster_service_versions(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterServiceVersion>, QueryError>;

    /// Create an object the crate has no typed bindings for.
    async fn create_dynamic(
        &self,
        namespace: &str,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<(), QueryError>;
}

/// Container output retrieval.
#[async_trait]
pub trait PodLogs: Send + Sync {
    /// Full stdout/stderr of `container` in `pod`, as one string.
    async fn logs(&self, namespace: &str, pod: &str, container: &str)
    -> Result<String, QueryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_found_is_absent() {
        let not_found = QueryError::NotFound {
            kind: "Pod",
            name: "w1".into(),
        };
        assert!(not_found.is_absent());

        let rejected = QueryError::Rejected {
            verb: "get",
            kind: "Pod",
            name: "w1".into(),
            code: 403,
            reason: "forbidden".into(),
        };
        assert!(!rejected.is_absent());

        let no_matches = QueryError::NoMatches {
            kind: "Node",
            selector: "nvidia.com/gpu.present=true".into(),
        };
        assert!(!no_matches.is_absent());
    }

    #[test]
    fn messages_name_the_object() {
        let error = QueryError::Rejected {
            verb: "create",
            kind: "Pod",
            name: "w1".into(),
            code: 409,
            reason: "already exists".into(),
        };
        assert_eq!(
            error.to_string(),
            r#"create Pod "w1" rejected (409): already exists"#
        );
    }
}
