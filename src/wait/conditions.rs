//! Ready-made [`Condition`]s over the [`Cluster`] collaborator.
//!
//! Each condition captures only the identifiers and expected values it needs;
//! the evaluation logic for composite states lives in plain functions so it
//! can be checked without a cluster.

use async_trait::async_trait;
use k8s_openapi::{
    api::{apps::v1::DaemonSet, core::v1::Node},
    apimachinery::pkg::api::resource::Quantity,
};

use super::{Condition, Observation};
use crate::{
    cluster::{Cluster, QueryError, Selector},
    params,
};

/// Waits for the `ClusterPolicy` to report a given `status.state`.
#[derive(Debug)]
pub struct ClusterPolicyState<'a, C: ?Sized> {
    cluster: &'a C,
    name: String,
    state: &'static str,
}

impl<'a, C: ?Sized> ClusterPolicyState<'a, C> {
    pub fn ready(cluster: &'a C, name: impl Into<String>) -> Self {
        Self {
            cluster,
            name: name.into(),
            state: params::CLUSTER_POLICY_READY,
        }
    }

    pub fn not_ready(cluster: &'a C, name: impl Into<String>) -> Self {
        Self {
            cluster,
            name: name.into(),
            state: params::CLUSTER_POLICY_NOT_READY,
        }
    }
}

#[async_trait]
impl<C: Cluster + ?Sized> Condition for ClusterPolicyState<'_, C> {
    type Output = ();
    type Error = QueryError;

    fn describe(&self) -> String {
        format!("ClusterPolicy {:?} to be {}", self.name, self.state)
    }

    async fn check(&self) -> Result<Observation, QueryError> {
        let policy = self.cluster.get_cluster_policy(&self.name).await?;
        match policy.state.as_deref() {
            Some(state) if state == self.state => {
                info!(message = "ClusterPolicy reached state.", name = %policy.name, state);
                Ok(Observation::Satisfied(()))
            }
            Some(state) => Ok(Observation::pending(format!("state {state:?}"))),
            None => Ok(Observation::pending("no state reported")),
        }
    }
}

/// Waits for a `ClusterServiceVersion` to reach the `Succeeded` phase.
#[derive(Debug)]
pub struct CsvSucceeded<'a, C: ?Sized> {
    cluster: &'a C,
    namespace: String,
    name: String,
}

impl<'a, C: ?Sized> CsvSucceeded<'a, C> {
    pub fn new(cluster: &'a C, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl<C: Cluster + ?Sized> Condition for CsvSucceeded<'_, C> {
    type Output = ();
    type Error = QueryError;

    fn describe(&self) -> String {
        format!(
            "ClusterServiceVersion {}/{} to succeed",
            self.namespace, self.name
        )
    }

    async fn check(&self) -> Result<Observation, QueryError> {
        let csv = self
            .cluster
            .get_cluster_service_version(&self.namespace, &self.name)
            .await?;
        match csv.phase.as_deref() {
            Some(params::CSV_SUCCEEDED) => Ok(Observation::Satisfied(())),
            Some(phase) => Ok(Observation::pending(format!("phase {phase:?}"))),
            None => Ok(Observation::pending("no phase reported")),
        }
    }
}

/// Waits for a `ClusterServiceVersion` other than `previous` to show up in a
/// namespace, as happens after a subscription upgrade. Yields the new name.
#[derive(Debug)]
pub struct CsvReplaced<'a, C: ?Sized> {
    cluster: &'a C,
    namespace: String,
    previous: String,
}

impl<'a, C: ?Sized> CsvReplaced<'a, C> {
    pub fn new(cluster: &'a C, namespace: impl Into<String>, previous: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            previous: previous.into(),
        }
    }
}

#[async_trait]
impl<C: Cluster + ?Sized> Condition for CsvReplaced<'_, C> {
    type Output = String;
    type Error = QueryError;

    fn describe(&self) -> String {
        format!(
            "a ClusterServiceVersion replacing {:?} in {}",
            self.previous, self.namespace
        )
    }

    async fn check(&self) -> Result<Observation<String>, QueryError> {
        let csvs = self
            .cluster
            .list_cluster_service_versions(&self.namespace)
            .await?;
        Ok(csvs
            .into_iter()
            .find(|csv| csv.name != self.previous)
            .map_or_else(
                || Observation::pending(format!("only {:?} present", self.previous)),
                |csv| Observation::Satisfied(csv.name),
            ))
    }
}

/// Waits for a `Deployment` to exist.
#[derive(Debug)]
pub struct DeploymentExists<'a, C: ?Sized> {
    cluster: &'a C,
    namespace: String,
    name: String,
}

impl<'a, C: ?Sized> DeploymentExists<'a, C> {
    pub fn new(cluster: &'a C, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl<C: Cluster + ?Sized> Condition for DeploymentExists<'_, C> {
    type Output = ();
    type Error = QueryError;

    fn describe(&self) -> String {
        format!("Deployment {}/{} to be created", self.namespace, self.name)
    }

    async fn check(&self) -> Result<Observation, QueryError> {
        // Absence surfaces as `NotFound` and keeps the wait going.
        self.cluster
            .get_deployment(&self.namespace, &self.name)
            .await?;
        Ok(Observation::Satisfied(()))
    }
}

/// Waits for at least one node matched by `selector` to carry `key=value`.
#[derive(Debug)]
pub struct NodeLabelPresent<'a, C: ?Sized> {
    cluster: &'a C,
    selector: Selector,
    key: String,
    value: String,
}

impl<'a, C: ?Sized> NodeLabelPresent<'a, C> {
    pub fn new(
        cluster: &'a C,
        selector: Selector,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            selector,
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl<C: Cluster + ?Sized> Condition for NodeLabelPresent<'_, C> {
    type Output = ();
    type Error = QueryError;

    fn describe(&self) -> String {
        format!(
            "node label {}={} on nodes matching {:?}",
            self.key, self.value, self.selector.to_string()
        )
    }

    async fn check(&self) -> Result<Observation, QueryError> {
        let nodes = self.cluster.list_nodes(&self.selector).await?;
        let found = nodes.iter().find(|node| {
            node.metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(&self.key))
                .is_some_and(|value| *value == self.value)
        });

        match found {
            Some(node) => {
                debug!(
                    message = "Found node label.",
                    node = node.metadata.name.as_deref().unwrap_or_default(),
                    key = %self.key,
                );
                Ok(Observation::Satisfied(()))
            }
            None => Ok(Observation::pending(format!(
                "label absent on {} node(s)",
                nodes.len()
            ))),
        }
    }
}

/// A check applied to every node selected by [`NodesSatisfy`].
pub trait NodePredicate: Send + Sync {
    fn describe(&self) -> String;

    fn matches(&self, node: &Node) -> bool;
}

/// Holds when a node advertises no whole-GPU capacity, as is the case once
/// the device plugin has been switched off.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoGpuCapacity;

impl NodePredicate for NoGpuCapacity {
    fn describe(&self) -> String {
        format!("no {} capacity", params::GPU_RESOURCE)
    }

    fn matches(&self, node: &Node) -> bool {
        node.status
            .as_ref()
            .and_then(|status| status.capacity.as_ref())
            .and_then(|capacity| capacity.get(params::GPU_RESOURCE))
            .is_none_or(quantity_is_zero)
    }
}

/// Whether a resource quantity is zero. The unit suffix (`m`, `k`, `Ki`,
/// ...) only scales the number, so it is dropped before comparing; a value
/// that does not parse counts as non-zero.
fn quantity_is_zero(quantity: &Quantity) -> bool {
    let number = quantity
        .0
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_alphabetic());
    number.parse::<f64>().is_ok_and(|value| value == 0.0)
}

/// Waits for every node matched by `selector` to satisfy a predicate.
///
/// Matching no node at all is a hard error rather than a reason to wait.
#[derive(Debug)]
pub struct NodesSatisfy<'a, C: ?Sized, P> {
    cluster: &'a C,
    selector: Selector,
    predicate: P,
}

impl<'a, C: ?Sized, P> NodesSatisfy<'a, C, P> {
    pub const fn new(cluster: &'a C, selector: Selector, predicate: P) -> Self {
        Self {
            cluster,
            selector,
            predicate,
        }
    }
}

#[async_trait]
impl<C, P> Condition for NodesSatisfy<'_, C, P>
where
    C: Cluster + ?Sized,
    P: NodePredicate,
{
    type Output = ();
    type Error = QueryError;

    fn describe(&self) -> String {
        format!(
            "{} on nodes matching {:?}",
            self.predicate.describe(),
            self.selector.to_string()
        )
    }

    async fn check(&self) -> Result<Observation, QueryError> {
        let nodes = self.cluster.list_nodes(&self.selector).await?;
        if nodes.is_empty() {
            return Err(QueryError::NoMatches {
                kind: "Node",
                selector: self.selector.to_string(),
            });
        }

        let lagging = nodes
            .iter()
            .filter(|node| !self.predicate.matches(node))
            .filter_map(|node| node.metadata.name.as_deref())
            .collect::<Vec<_>>();
        if lagging.is_empty() {
            Ok(Observation::Satisfied(()))
        } else {
            Ok(Observation::pending(format!(
                "not yet satisfied on {}",
                lagging.join(", ")
            )))
        }
    }
}

/// Waits for a `DaemonSet` rollout to be complete and available.
#[derive(Debug)]
pub struct DaemonSetReady<'a, C: ?Sized> {
    cluster: &'a C,
    namespace: String,
    name: String,
}

impl<'a, C: ?Sized> DaemonSetReady<'a, C> {
    pub fn new(cluster: &'a C, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl<C: Cluster + ?Sized> Condition for DaemonSetReady<'_, C> {
    type Output = ();
    type Error = QueryError;

    fn describe(&self) -> String {
        format!("DaemonSet {}/{} to be ready", self.namespace, self.name)
    }

    async fn check(&self) -> Result<Observation, QueryError> {
        let daemon_set = self
            .cluster
            .get_daemon_set(&self.namespace, &self.name)
            .await?;
        Ok(daemon_set_readiness(&daemon_set))
    }
}

/// Evaluate `DaemonSet` readiness from a single observation.
///
/// All of the following must hold at once:
/// - the controller has observed the current generation,
/// - every desired node runs the updated revision,
/// - every desired node has an available pod of the current revision.
///
/// `numberAvailable` is used rather than `numberReady` since the latter still
/// counts pods of the previous revision during a rolling update.
pub fn daemon_set_readiness(daemon_set: &DaemonSet) -> Observation {
    let generation = daemon_set.metadata.generation;
    let Some(status) = daemon_set.status.as_ref() else {
        return Observation::pending("no status reported");
    };

    if status.observed_generation != generation {
        return Observation::pending(format!(
            "observed generation {:?} != generation {:?}",
            status.observed_generation, generation
        ));
    }

    let desired = status.desired_number_scheduled;
    let updated = status.updated_number_scheduled.unwrap_or_default();
    if updated != desired {
        return Observation::pending(format!("{updated}/{desired} pods updated"));
    }

    let available = status.number_available.unwrap_or_default();
    if desired > 0 && available == desired {
        Observation::Satisfied(())
    } else {
        Observation::pending(format!("{available}/{desired} pods available"))
    }
}

/// Terminal phase of a pod that ran to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalPhase {
    Succeeded,
    Failed,
}

/// Waits for a pod to reach `Succeeded` or `Failed`. Yields which one.
#[derive(Debug)]
pub struct PodTerminal<'a, C: ?Sized> {
    cluster: &'a C,
    namespace: String,
    name: String,
}

impl<'a, C: ?Sized> PodTerminal<'a, C> {
    pub fn new(cluster: &'a C, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl<C: Cluster + ?Sized> Condition for PodTerminal<'_, C> {
    type Output = TerminalPhase;
    type Error = QueryError;

    fn describe(&self) -> String {
        format!("pod {}/{} to terminate", self.namespace, self.name)
    }

    async fn check(&self) -> Result<Observation<TerminalPhase>, QueryError> {
        let pod = self.cluster.get_pod(&self.namespace, &self.name).await?;
        let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());
        Ok(pod_phase_observation(phase))
    }
}

/// Map a reported pod phase onto the terminal/not-yet split. `Pending`,
/// `Running`, `Unknown` and anything unrecognized keep the wait going.
pub fn pod_phase_observation(phase: Option<&str>) -> Observation<TerminalPhase> {
    match phase {
        Some("Succeeded") => Observation::Satisfied(TerminalPhase::Succeeded),
        Some("Failed") => Observation::Satisfied(TerminalPhase::Failed),
        Some(phase) => Observation::pending(format!("phase {phase}")),
        None => Observation::pending("no phase reported"),
    }
}
