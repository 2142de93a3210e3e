mod cached;
mod default_client;
#[cfg(test)]
pub mod tests_support;

pub use cached::CachedK8sClient;
pub use default_client::DefaultK8sClient;

use async_trait::async_trait;
use kube::api::ApiResource;
use kube::core::DynamicObject;

use crate::core::errors::AgentResult;

/// Typed and cached reads/writes against arbitrary, cluster-scoped custom
/// resources (C5). Every stack and child resource this agent touches is
/// cluster-scoped, so there is no namespace parameter.
#[async_trait]
pub trait K8sClient: Send + Sync {
    async fn get(&self, resource: &ApiResource, name: &str) -> AgentResult<Option<DynamicObject>>;

    async fn list(&self, resource: &ApiResource, label_selector: &str) -> AgentResult<Vec<DynamicObject>>;

    /// `AlreadyExists` is treated as success by callers; this returns
    /// `Ok(None)` in that case so the caller can decide whether to re-fetch.
    async fn create(&self, resource: &ApiResource, object: DynamicObject) -> AgentResult<Option<DynamicObject>>;

    async fn update(&self, resource: &ApiResource, object: DynamicObject) -> AgentResult<DynamicObject>;

    /// `NotFound` is treated as a successful, idempotent delete.
    async fn delete(&self, resource: &ApiResource, name: &str) -> AgentResult<()>;
}
