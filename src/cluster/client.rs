//! [`Cluster`] and [`PodLogs`] backed by the Kubernetes API.

use std::{fmt, path::Path};

use async_trait::async_trait;
use k8s_openapi::{
    NamespaceResourceScope,
    api::{
        apps::v1::{DaemonSet, Deployment},
        core::v1::{Node, Pod},
    },
};
use kube::{
    Api, Client, Config,
    api::{DeleteParams, DynamicObject, ListParams, LogParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
    discovery::ApiResource,
};
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};

use super::{
    Cluster, ClusterPolicy, ClusterServiceVersion, DecodeSnafu, PodLogs, QueryError, Selector,
};

/// An error returned while connecting to a cluster.
#[derive(Debug, Snafu)]
pub enum ConnectError {
    #[snafu(display("unable to read kubeconfig {:?}: {}", path, source))]
    ReadKubeconfig {
        path: String,
        source: KubeconfigError,
    },

    #[snafu(display("unable to load kubeconfig {:?}: {}", path, source))]
    LoadKubeconfig {
        path: String,
        source: KubeconfigError,
    },

    #[snafu(display("unable to build a Kubernetes client: {}", source))]
    BuildClient { source: kube::Error },
}

/// The production cluster collaborator.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCluster")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

impl KubeCluster {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the in-cluster configuration or the local kubeconfig,
    /// whichever the environment provides.
    pub async fn try_default() -> Result<Self, ConnectError> {
        let client = Client::try_default().await.context(BuildClientSnafu)?;
        Ok(Self::new(client))
    }

    /// Connect with an explicit kubeconfig file.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, ConnectError> {
        let display = path.display().to_string();
        let kubeconfig = Kubeconfig::read_from(path).context(ReadKubeconfigSnafu {
            path: display.clone(),
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(LoadKubeconfigSnafu { path: display })?;
        let client = Client::try_from(config).context(BuildClientSnafu)?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_dynamic(
        &self,
        api: Api<DynamicObject>,
        kind: &'static str,
        name: &str,
    ) -> Result<DynamicObject, QueryError> {
        api.get(name)
            .await
            .map_err(|error| classify(error, "get", kind, name))
    }
}

/// Split a `kube` error into the absence signal and everything else.
fn classify(error: kube::Error, verb: &'static str, kind: &'static str, name: &str) -> QueryError {
    match error {
        kube::Error::Api(response) if response.code == 404 => QueryError::NotFound {
            kind,
            name: name.to_owned(),
        },
        kube::Error::Api(response) => QueryError::Rejected {
            verb,
            kind,
            name: name.to_owned(),
            code: response.code,
            reason: response.message,
        },
        source => QueryError::Transport {
            verb,
            kind,
            name: name.to_owned(),
            source,
        },
    }
}

async fn get_typed<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<K, QueryError>
where
    K: Clone + DeserializeOwned + fmt::Debug,
{
    api.get(name)
        .await
        .map_err(|error| classify(error, "get", kind, name))
}

async fn list_typed<K>(
    api: &Api<K>,
    kind: &'static str,
    selector: &Selector,
) -> Result<Vec<K>, QueryError>
where
    K: Clone + DeserializeOwned + fmt::Debug,
{
    let selector = selector.to_string();
    let params = if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector)
    };
    api.list(&params)
        .await
        .map(|list| list.items)
        .map_err(|error| classify(error, "list", kind, &selector))
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, QueryError> {
        get_typed(&self.namespaced::<Pod>(namespace), "Pod", name).await
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Pod>, QueryError> {
        list_typed(&self.namespaced::<Pod>(namespace), "Pod", selector).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, QueryError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.namespaced::<Pod>(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|error| classify(error, "create", "Pod", &name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), QueryError> {
        self.namespaced::<Pod>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|error| classify(error, "delete", "Pod", name))
    }

    async fn get_node(&self, name: &str) -> Result<Node, QueryError> {
        get_typed(&Api::<Node>::all(self.client.clone()), "Node", name).await
    }

    async fn list_nodes(&self, selector: &Selector) -> Result<Vec<Node>, QueryError> {
        list_typed(&Api::<Node>::all(self.client.clone()), "Node", selector).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, QueryError> {
        get_typed(&self.namespaced::<Deployment>(namespace), "Deployment", name).await
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Deployment>, QueryError> {
        list_typed(
            &self.namespaced::<Deployment>(namespace),
            "Deployment",
            selector,
        )
        .await
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, QueryError> {
        get_typed(&self.namespaced::<DaemonSet>(namespace), "DaemonSet", name).await
    }

    async fn list_daemon_sets(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<DaemonSet>, QueryError> {
        list_typed(
            &self.namespaced::<DaemonSet>(namespace),
            "DaemonSet",
            selector,
        )
        .await
    }

    async fn get_cluster_policy(&self, name: &str) -> Result<ClusterPolicy, QueryError> {
        let api = Api::all_with(self.client.clone(), &ClusterPolicy::api_resource());
        let object = self.get_dynamic(api, ClusterPolicy::KIND, name).await?;
        ClusterPolicy::from_dynamic(&object).context(DecodeSnafu {
            kind: ClusterPolicy::KIND,
            name,
        })
    }

    async fn get_cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ClusterServiceVersion, QueryError> {
        let api = Api::namespaced_with(
            self.client.clone(),
            namespace,
            &ClusterServiceVersion::api_resource(),
        );
        let object = self
            .get_dynamic(api, ClusterServiceVersion::KIND, name)
            .await?;
        ClusterServiceVersion::from_dynamic(&object).context(DecodeSnafu {
            kind: ClusterServiceVersion::KIND,
            name,
        })
    }

    async fn list_cluster_service_versions(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterServiceVersion>, QueryError> {
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            namespace,
            &ClusterServiceVersion::api_resource(),
        );
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|error| classify(error, "list", ClusterServiceVersion::KIND, namespace))?;

        list.items
            .iter()
            .map(|object| {
                ClusterServiceVersion::from_dynamic(object).context(DecodeSnafu {
                    kind: ClusterServiceVersion::KIND,
                    name: object.metadata.name.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn create_dynamic(
        &self,
        namespace: &str,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<(), QueryError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, resource);
        api.create(&PostParams::default(), object)
            .await
            .map(|_| ())
            .map_err(|error| classify(error, "create", "object", &name))
    }
}

#[async_trait]
impl PodLogs for KubeCluster {
    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, QueryError> {
        let params = LogParams {
            container: Some(container.to_owned()),
            ..LogParams::default()
        };
        self.namespaced::<Pod>(namespace)
            .logs(pod, &params)
            .await
            .map_err(|error| classify(error, "logs", "Pod", pod))
    }
}
