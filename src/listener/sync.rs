use kube::api::{ApiResource, DynamicObject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::Value;

use crate::core::errors::AgentResult;
use crate::k8s::K8sClient;
use crate::listener::labels;

/// One entry of a labelled sync's desired set: a child keyed by name, with
/// the `spec` field it should carry.
#[derive(Debug, Clone)]
pub struct DesiredChild {
    pub name: String,
    pub spec: Value,
}

/// Identifies the stack a freshly created child should be owned by (O1).
#[derive(Debug, Clone)]
pub struct StackRef<'a> {
    pub name: &'a str,
    pub uid: &'a str,
}

/// The labelled sync at the heart of child reconciliation (§4.7): list
/// existing children carrying O1's labels for this stack, then create
/// missing, update changed, and delete surplus entries so the cluster
/// matches `desired` exactly (O2).
///
/// Passing an empty `desired` deletes every labelled child in `resource` for
/// this stack — this is the delete-module algorithm (§4.7), reusing the same
/// code path rather than duplicating it.
pub async fn sync_category(
    k8s: &dyn K8sClient,
    resource: &ApiResource,
    stack: StackRef<'_>,
    desired: &[DesiredChild],
) -> AgentResult<()> {
    let existing = k8s.list(resource, &labels::selector(stack.name)).await?;

    for obj in &existing {
        let name = obj.metadata.name.clone().unwrap_or_default();
        if !desired.iter().any(|d| d.name == name) {
            k8s.delete(resource, &name).await?;
        }
    }

    for wanted in desired {
        match existing.iter().find(|obj| obj.metadata.name.as_deref() == Some(wanted.name.as_str())) {
            Some(current) => {
                if current.data.get("spec") != Some(&wanted.spec) {
                    let mut updated = current.clone();
                    updated.data["spec"] = wanted.spec.clone();
                    k8s.update(resource, updated).await?;
                }
            }
            None => {
                let child = build_child(resource, stack, &wanted.name, wanted.spec.clone());
                k8s.create(resource, child).await?;
            }
        }
    }

    Ok(())
}

/// Deletes every child the agent owns for `stack_name` in `resource`,
/// treating `NotFound` as success (§4.7 "Delete-module algorithm").
pub async fn delete_module(k8s: &dyn K8sClient, resource: &ApiResource, stack_name: &str) -> AgentResult<()> {
    sync_category(k8s, resource, StackRef { name: stack_name, uid: "" }, &[]).await
}

fn build_child(resource: &ApiResource, stack: StackRef<'_>, name: &str, spec: Value) -> DynamicObject {
    let mut child = DynamicObject::new(name, resource);
    child.metadata.labels = Some(labels::child_labels(stack.name));
    child.metadata.owner_references = Some(vec![OwnerReference {
        api_version: format!("{}/{}", resource.group, resource.version),
        kind: "Stack".to_string(),
        name: stack.name.to_string(),
        uid: stack.uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]);
    child.data = serde_json::json!({ "spec": spec });
    child
}
