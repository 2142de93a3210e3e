//! An in-memory `K8sClient` used by the sync engine's and listener's own
//! tests, in the spirit of `spineldb`'s `tests/integration/test_helpers.rs`
//! fakes — no real cluster required.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use serde_json::Value;

use crate::core::errors::AgentResult;
use crate::k8s::K8sClient;
use crate::listener::labels;

fn key(resource: &ApiResource, name: &str) -> String {
    format!("{}/{}/{}/{}", resource.group, resource.version, resource.kind, name)
}

fn prefix(resource: &ApiResource) -> String {
    format!("{}/{}/{}/", resource.group, resource.version, resource.kind)
}

fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn matches_labels(obj: &DynamicObject, wanted: &[(String, String)]) -> bool {
    let obj_labels = obj.metadata.labels.as_ref();
    wanted
        .iter()
        .all(|(k, v)| obj_labels.and_then(|l| l.get(k)).map(|actual| actual == v).unwrap_or(false))
}

#[derive(Default)]
pub struct FakeK8sClient {
    objects: Mutex<HashMap<String, DynamicObject>>,
    update_calls: AtomicUsize,
}

impl FakeK8sClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_labelled(&self, resource: &ApiResource, stack_name: &str, name: &str, spec: Value) {
        let mut obj = DynamicObject::new(name, resource);
        obj.metadata.labels = Some(labels::child_labels(stack_name));
        obj.data = serde_json::json!({ "spec": spec });
        self.objects.lock().unwrap().insert(key(resource, name), obj);
    }

    pub async fn seed_unlabelled(&self, resource: &ApiResource, name: &str) {
        let obj = DynamicObject::new(name, resource);
        self.objects.lock().unwrap().insert(key(resource, name), obj);
    }

    pub async fn get_object(&self, resource: &ApiResource, name: &str) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(&key(resource, name)).cloned()
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl K8sClient for FakeK8sClient {
    async fn get(&self, resource: &ApiResource, name: &str) -> AgentResult<Option<DynamicObject>> {
        Ok(self.objects.lock().unwrap().get(&key(resource, name)).cloned())
    }

    async fn list(&self, resource: &ApiResource, label_selector: &str) -> AgentResult<Vec<DynamicObject>> {
        let wanted = parse_selector(label_selector);
        let pfx = prefix(resource);
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(&pfx))
            .map(|(_, v)| v)
            .filter(|obj| matches_labels(obj, &wanted))
            .cloned()
            .collect())
    }

    async fn create(&self, resource: &ApiResource, object: DynamicObject) -> AgentResult<Option<DynamicObject>> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let k = key(resource, &name);
        let mut guard = self.objects.lock().unwrap();
        if guard.contains_key(&k) {
            return Ok(None);
        }
        guard.insert(k, object.clone());
        Ok(Some(object))
    }

    async fn update(&self, resource: &ApiResource, object: DynamicObject) -> AgentResult<DynamicObject> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let name = object.metadata.name.clone().unwrap_or_default();
        self.objects.lock().unwrap().insert(key(resource, &name), object.clone());
        Ok(object)
    }

    async fn delete(&self, resource: &ApiResource, name: &str) -> AgentResult<()> {
        self.objects.lock().unwrap().remove(&key(resource, name));
        Ok(())
    }
}
