use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Error as KubeError};

use crate::core::errors::AgentResult;
use crate::k8s::K8sClient;

/// Direct reads and writes against the cluster, no caching layer.
pub struct DefaultK8sClient {
    client: Client,
}

impl DefaultK8sClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), resource)
    }
}

#[async_trait]
impl K8sClient for DefaultK8sClient {
    async fn get(&self, resource: &ApiResource, name: &str) -> AgentResult<Option<DynamicObject>> {
        match self.api(resource).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, resource: &ApiResource, label_selector: &str) -> AgentResult<Vec<DynamicObject>> {
        let lp = ListParams::default().labels(label_selector);
        let list = self.api(resource).list(&lp).await?;
        Ok(list.items)
    }

    async fn create(&self, resource: &ApiResource, object: DynamicObject) -> AgentResult<Option<DynamicObject>> {
        match self.api(resource).create(&PostParams::default(), &object).await {
            Ok(obj) => Ok(Some(obj)),
            Err(KubeError::Api(e)) if e.code == 409 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, resource: &ApiResource, object: DynamicObject) -> AgentResult<DynamicObject> {
        let name = object
            .metadata
            .name
            .clone()
            .unwrap_or_default();
        let patch = Patch::Merge(&object);
        Ok(self
            .api(resource)
            .patch(&name, &PatchParams::default(), &patch)
            .await?)
    }

    async fn delete(&self, resource: &ApiResource, name: &str) -> AgentResult<()> {
        match self.api(resource).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
