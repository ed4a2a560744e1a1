//! An in-memory [`Cluster`] for exercising conditions and workloads without
//! an API server.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment},
    core::v1::{Node, Pod, PodStatus},
};
use kube::{api::DynamicObject, discovery::ApiResource};

use crate::cluster::{
    Cluster, ClusterPolicy, ClusterServiceVersion, PodLogs, QueryError, Selector,
};

type Key = (String, String);

#[derive(Debug, Default)]
struct ScriptedPod {
    pod: Pod,
    /// Phases reported by successive reads; the last one sticks.
    phases: VecDeque<String>,
}

#[derive(Debug, Default)]
struct State {
    pods: BTreeMap<Key, ScriptedPod>,
    phase_scripts: HashMap<Key, VecDeque<String>>,
    created_pods: Vec<Pod>,
    deleted_pods: Vec<Key>,
    nodes: BTreeMap<String, Node>,
    deployments: BTreeMap<Key, Deployment>,
    daemon_sets: BTreeMap<Key, DaemonSet>,
    cluster_policies: BTreeMap<String, ClusterPolicy>,
    csvs: BTreeMap<Key, ClusterServiceVersion>,
    dynamic_objects: Vec<(String, ApiResource, DynamicObject)>,
    logs: HashMap<(String, String, String), String>,
    failures: HashMap<(&'static str, &'static str), (u16, String)>,
}

/// Mock cluster.
///
/// Objects are seeded with the `set_*`/`add_*` methods. Pods created through
/// [`Cluster::create_pod`] report the phases registered with
/// [`MockCluster::script_pod_phases`] (or `Pending` forever). Failures for a
/// `(verb, kind)` pair are injected with [`MockCluster::fail`].
#[derive(Debug, Default)]
pub struct MockCluster {
    state: Mutex<State>,
    calls: AtomicUsize,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_owned(), name.to_owned())
}

fn not_found(kind: &'static str, name: &str) -> QueryError {
    QueryError::NotFound {
        kind,
        name: name.to_owned(),
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mock cluster state poisoned")
    }

    /// Record a call and return the injected failure for it, if any.
    fn enter(&self, verb: &'static str, kind: &'static str, name: &str) -> Result<(), QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.state().failures.get(&(verb, kind)) {
            Some((code, reason)) => Err(QueryError::Rejected {
                verb,
                kind,
                name: name.to_owned(),
                code: *code,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Make every `verb` call on `kind` fail with an API error.
    pub fn fail(&self, verb: &'static str, kind: &'static str, code: u16, reason: &str) {
        self.state()
            .failures
            .insert((verb, kind), (code, reason.to_owned()));
    }

    /// Number of collaborator calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Phases the named pod reports once created, one per read.
    pub fn script_pod_phases(&self, namespace: &str, name: &str, phases: &[&str]) {
        self.state().phase_scripts.insert(
            key(namespace, name),
            phases.iter().map(|phase| (*phase).to_owned()).collect(),
        );
    }

    pub fn created_pods(&self) -> Vec<Pod> {
        self.state().created_pods.clone()
    }

    pub fn deleted_pods(&self) -> Vec<(String, String)> {
        self.state().deleted_pods.clone()
    }

    pub fn dynamic_objects(&self) -> Vec<(String, ApiResource, DynamicObject)> {
        self.state().dynamic_objects.clone()
    }

    pub fn set_logs(&self, namespace: &str, pod: &str, container: &str, logs: &str) {
        self.state().logs.insert(
            (namespace.to_owned(), pod.to_owned(), container.to_owned()),
            logs.to_owned(),
        );
    }

    /// Insert or replace a node.
    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.state().nodes.insert(name, node);
    }

    pub fn set_deployment(&self, namespace: &str, deployment: Deployment) {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.state()
            .deployments
            .insert(key(namespace, &name), deployment);
    }

    pub fn set_daemon_set(&self, namespace: &str, daemon_set: DaemonSet) {
        let name = daemon_set.metadata.name.clone().unwrap_or_default();
        self.state()
            .daemon_sets
            .insert(key(namespace, &name), daemon_set);
    }

    pub fn set_cluster_policy(&self, policy: ClusterPolicy) {
        self.state()
            .cluster_policies
            .insert(policy.name.clone(), policy);
    }

    pub fn set_cluster_service_version(&self, csv: ClusterServiceVersion) {
        self.state()
            .csvs
            .insert(key(&csv.namespace, &csv.name), csv);
    }
}

#[async_trait]
impl Cluster for MockCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, QueryError> {
        self.enter("get", "Pod", name)?;
        let mut state = self.state();
        let scripted = state
            .pods
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("Pod", name))?;

        let phase = if scripted.phases.len() > 1 {
            scripted.phases.pop_front()
        } else {
            scripted.phases.front().cloned()
        }
        .unwrap_or_else(|| "Pending".to_owned());

        let mut pod = scripted.pod.clone();
        pod.status = Some(PodStatus {
            phase: Some(phase),
            ..PodStatus::default()
        });
        Ok(pod)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Pod>, QueryError> {
        self.enter("list", "Pod", &selector.to_string())?;
        Ok(self
            .state()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, scripted)| scripted.pod.clone())
            .filter(|pod| selector.matches(pod.metadata.labels.as_ref()))
            .collect())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, QueryError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.enter("create", "Pod", &name)?;
        let mut state = self.state();
        let pod_key = key(namespace, &name);
        if state.pods.contains_key(&pod_key) {
            return Err(QueryError::Rejected {
                verb: "create",
                kind: "Pod",
                name,
                code: 409,
                reason: "already exists".to_owned(),
            });
        }

        let mut created = pod.clone();
        created.metadata.namespace = Some(namespace.to_owned());
        let phases = state.phase_scripts.remove(&pod_key).unwrap_or_default();
        state.created_pods.push(created.clone());
        state.pods.insert(
            pod_key,
            ScriptedPod {
                pod: created.clone(),
                phases,
            },
        );
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), QueryError> {
        self.enter("delete", "Pod", name)?;
        let mut state = self.state();
        state
            .pods
            .remove(&key(namespace, name))
            .ok_or_else(|| not_found("Pod", name))?;
        state.deleted_pods.push(key(namespace, name));
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Node, QueryError> {
        self.enter("get", "Node", name)?;
        self.state()
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("Node", name))
    }

    async fn list_nodes(&self, selector: &Selector) -> Result<Vec<Node>, QueryError> {
        self.enter("list", "Node", &selector.to_string())?;
        Ok(self
            .state()
            .nodes
            .values()
            .filter(|node| selector.matches(node.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, QueryError> {
        self.enter("get", "Deployment", name)?;
        self.state()
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("Deployment", name))
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Deployment>, QueryError> {
        self.enter("list", "Deployment", &selector.to_string())?;
        Ok(self
            .state()
            .deployments
            .iter()
            .filter(|((ns, _), deployment)| {
                ns == namespace && selector.matches(deployment.metadata.labels.as_ref())
            })
            .map(|(_, deployment)| deployment.clone())
            .collect())
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, QueryError> {
        self.enter("get", "DaemonSet", name)?;
        self.state()
            .daemon_sets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("DaemonSet", name))
    }

    async fn list_daemon_sets(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<DaemonSet>, QueryError> {
        self.enter("list", "DaemonSet", &selector.to_string())?;
        Ok(self
            .state()
            .daemon_sets
            .iter()
            .filter(|((ns, _), daemon_set)| {
                ns == namespace && selector.matches(daemon_set.metadata.labels.as_ref())
            })
            .map(|(_, daemon_set)| daemon_set.clone())
            .collect())
    }

    async fn get_cluster_policy(&self, name: &str) -> Result<ClusterPolicy, QueryError> {
        self.enter("get", ClusterPolicy::KIND, name)?;
        self.state()
            .cluster_policies
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ClusterPolicy::KIND, name))
    }

    async fn get_cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ClusterServiceVersion, QueryError> {
        self.enter("get", ClusterServiceVersion::KIND, name)?;
        self.state()
            .csvs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found(ClusterServiceVersion::KIND, name))
    }

    async fn list_cluster_service_versions(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterServiceVersion>, QueryError> {
        self.enter("list", ClusterServiceVersion::KIND, namespace)?;
        Ok(self
            .state()
            .csvs
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, csv)| csv.clone())
            .collect())
    }

    async fn create_dynamic(
        &self,
        namespace: &str,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<(), QueryError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.enter("create", "object", &name)?;
        self.state()
            .dynamic_objects
            .push((namespace.to_owned(), resource.clone(), object.clone()));
        Ok(())
    }
}

#[async_trait]
impl PodLogs for MockCluster {
    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, QueryError> {
        self.enter("logs", "Pod", pod)?;
        self.state()
            .logs
            .get(&(namespace.to_owned(), pod.to_owned(), container.to_owned()))
            .cloned()
            .ok_or_else(|| not_found("Pod", pod))
    }
}
