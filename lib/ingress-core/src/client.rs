//! Access to VirtualService objects on the API server

use crate::error::ClientError;
use async_trait::async_trait;
use istio_api::VirtualService;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// Get/Create/Update/Delete boundary for the derived resource
#[async_trait]
pub trait VirtualServiceClient: Send + Sync {
    /// Fetch `namespace/name`; `Ok(None)` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<VirtualService>, ClientError>;

    async fn create(&self, vs: &VirtualService) -> Result<VirtualService, ClientError>;

    /// Replace the object. Fails with [`ClientError::Conflict`] when the
    /// stored resourceVersion differs from the one carried by `vs`.
    async fn update(&self, vs: &VirtualService) -> Result<VirtualService, ClientError>;

    /// Delete `namespace/name`; [`ClientError::NotFound`] when absent.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError>;
}

/// VirtualService client talking to the API server
#[derive(Clone)]
pub struct KubeVirtualServices {
    client: Client,
}

impl KubeVirtualServices {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VirtualService> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of(vs: &VirtualService) -> &str {
    vs.metadata.namespace.as_deref().unwrap_or("default")
}

fn name_of(vs: &VirtualService) -> &str {
    vs.metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl VirtualServiceClient for KubeVirtualServices {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<VirtualService>, ClientError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, vs: &VirtualService) -> Result<VirtualService, ClientError> {
        debug!("Creating VirtualService {}/{}", namespace_of(vs), name_of(vs));
        Ok(self
            .api(namespace_of(vs))
            .create(&PostParams::default(), vs)
            .await?)
    }

    async fn update(&self, vs: &VirtualService) -> Result<VirtualService, ClientError> {
        debug!("Replacing VirtualService {}/{}", namespace_of(vs), name_of(vs));
        Ok(self
            .api(namespace_of(vs))
            .replace(name_of(vs), &PostParams::default(), vs)
            .await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        debug!("Deleting VirtualService {}/{}", namespace, name);
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
