//! Typed access to Backup and Restore objects

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::{api::PostParams, Api, Client};

use crate::crd::ProgressResource;
use crate::error::{Error, Result};
use crate::queue::ObjectKey;

/// Read and status-write access to a custom resource kind
#[async_trait]
pub trait ResourceStore<K>: Send + Sync {
    /// Fetch the current object, `None` if it no longer exists
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// Replace the status sub-resource with the one carried by `resource`.
    ///
    /// The write is conditional on `resource`'s `resourceVersion`; a stale
    /// version fails with [`Error::Conflict`].
    async fn replace_status(&self, key: &ObjectKey, resource: &K) -> Result<K>;
}

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeResourceStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeResourceStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: ProgressResource> ResourceStore<K> for KubeResourceStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn replace_status(&self, key: &ObjectKey, resource: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let data = serde_json::to_vec(resource)?;

        api.replace_status(&key.name, &PostParams::default(), data)
            .await
            .map_err(|e| match e {
                kube::Error::Api(api_err) if api_err.code == 409 => {
                    Error::Conflict(key.to_string())
                }
                kube::Error::Api(api_err) if api_err.code == 404 => Error::NotFound {
                    kind: K::kind(&()).to_string(),
                    key: key.to_string(),
                },
                other => Error::Kube(other),
            })
    }
}
