use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::reflector::{ObjectRef, Store};

use crate::core::errors::AgentResult;
use crate::k8s::{DefaultK8sClient, K8sClient};

fn resource_key(resource: &ApiResource) -> String {
    format!("{}/{}/{}", resource.group, resource.version, resource.kind)
}

/// Layers a read-through cache over the informer stores built by C6 (one
/// `Store<DynamicObject>` per watched resource). Cache misses fall back to a
/// direct `Api::get`; all writes go straight through to the cluster, matching
/// §4.5's "a caching variant layers a read-through over the dynamic informer
/// cache; writes go direct."
pub struct CachedK8sClient {
    direct: DefaultK8sClient,
    stores: HashMap<String, Arc<Store<DynamicObject>>>,
}

impl CachedK8sClient {
    pub fn new(direct: DefaultK8sClient) -> Self {
        Self {
            direct,
            stores: HashMap::new(),
        }
    }

    pub fn register_store(&mut self, resource: &ApiResource, store: Arc<Store<DynamicObject>>) {
        self.stores.insert(resource_key(resource), store);
    }

    fn cached_get(&self, resource: &ApiResource, name: &str) -> Option<DynamicObject> {
        let store = self.stores.get(&resource_key(resource))?;
        let key = ObjectRef::new_with(name, resource.clone());
        store.get(&key).map(|obj| (*obj).clone())
    }

    fn cached_list(&self, resource: &ApiResource, label_selector: &str) -> Option<Vec<DynamicObject>> {
        let store = self.stores.get(&resource_key(resource))?;
        let wanted = parse_label_selector(label_selector);
        Some(
            store
                .state()
                .into_iter()
                .filter(|obj| matches_labels(obj, &wanted))
                .map(|obj| (*obj).clone())
                .collect(),
        )
    }
}

fn parse_label_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn matches_labels(obj: &DynamicObject, wanted: &[(String, String)]) -> bool {
    let labels = obj.metadata.labels.as_ref();
    wanted
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)).map(|actual| actual == v).unwrap_or(false))
}

#[async_trait]
impl K8sClient for CachedK8sClient {
    async fn get(&self, resource: &ApiResource, name: &str) -> AgentResult<Option<DynamicObject>> {
        if let Some(obj) = self.cached_get(resource, name) {
            return Ok(Some(obj));
        }
        self.direct.get(resource, name).await
    }

    async fn list(&self, resource: &ApiResource, label_selector: &str) -> AgentResult<Vec<DynamicObject>> {
        if let Some(items) = self.cached_list(resource, label_selector) {
            return Ok(items);
        }
        self.direct.list(resource, label_selector).await
    }

    async fn create(&self, resource: &ApiResource, object: DynamicObject) -> AgentResult<Option<DynamicObject>> {
        self.direct.create(resource, object).await
    }

    async fn update(&self, resource: &ApiResource, object: DynamicObject) -> AgentResult<DynamicObject> {
        self.direct.update(resource, object).await
    }

    async fn delete(&self, resource: &ApiResource, name: &str) -> AgentResult<()> {
        self.direct.delete(resource, name).await
    }
}
