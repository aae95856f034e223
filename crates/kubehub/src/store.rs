use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use console_core::{ObjectStore, StoreError};

/// Typed storage for one kind, backed by the API server.
pub struct KubeStore<K> {
    api: Api<K>,
    status_subresource: bool,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = ()>,
{
    pub fn namespaced(client: Client, ns: &str) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        Self { api: Api::namespaced(client, ns), status_subresource: false }
    }

    pub fn cluster(client: Client) -> Self
    where
        K: Resource<Scope = ClusterResourceScope>,
    {
        Self { api: Api::all(client), status_subresource: false }
    }

    /// Route `update_status` through the `/status` subresource.
    pub fn with_status_subresource(mut self) -> Self {
        self.status_subresource = true;
        self
    }

    pub fn api(&self) -> &Api<K> {
        &self.api
    }
}

/// 404 is `NotFound`, 409 is `Conflict`; decode failures are `Serialization`;
/// everything else is transport.
pub fn map_kube_error(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message),
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
        kube::Error::SerdeError(se) => StoreError::Serialization(se.to_string()),
        other => StoreError::Transport(other.to_string()),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<K, StoreError> {
        trace!(kind = %K::kind(&()), name, "get");
        self.api.get(name).await.map_err(map_kube_error)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        self.api.create(&PostParams::default(), obj).await.map_err(map_kube_error)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        self.api.replace(&obj.name_any(), &PostParams::default(), obj).await.map_err(map_kube_error)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        if !self.status_subresource {
            return self.update(obj).await;
        }
        let body = serde_json::to_vec(obj).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.api.replace_status(&obj.name_any(), &PostParams::default(), body).await.map_err(map_kube_error)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.api.delete(name, &DeleteParams::default()).await.map(|_| ()).map_err(map_kube_error)
    }
}
