//! The membership listener (C7): dispatches orders from C4 onto cluster
//! mutations through C5, and turns informer events from C6 into upstream
//! status messages sent back through C4.

pub mod labels;
mod messages;
pub mod resources;
mod sync;

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::core::errors::{AgentError, AgentResult};
use crate::core::modules::ModuleDescriptor;
use crate::informers::ClusterEvent;
use crate::k8s::K8sClient;
use crate::membership_client::MembershipSink;
use crate::stream::pb::{order, Message, Order, Stack as PbStack};
use sync::{DesiredChild, StackRef};

/// The send-only capability the listener needs from C4: enough to push a
/// status message upstream, without owning the stream itself (§3
/// "Ownership (design sense)": C7 holds only borrowed handles to C4).
#[async_trait]
pub trait UpstreamSink: Send + Sync {
    async fn send(&self, msg: Message) -> AgentResult<()>;
}

#[async_trait]
impl UpstreamSink for MembershipSink {
    async fn send(&self, msg: Message) -> AgentResult<()> {
        MembershipSink::send(self, msg).await
    }
}

/// The resources C6 watches and C7 reconciles against: stacks, versions, and
/// every discovered module category (§4.6).
pub fn watched_resources(modules: &[ModuleDescriptor]) -> Vec<ApiResource> {
    let mut resources = vec![resources::stacks(), resources::versions()];
    resources.extend(modules.iter().map(resources::module));
    resources
}

pub struct MembershipListener {
    k8s: Arc<dyn K8sClient>,
    modules: Vec<ModuleDescriptor>,
}

impl MembershipListener {
    pub fn new(k8s: Arc<dyn K8sClient>, modules: Vec<ModuleDescriptor>) -> Self {
        Self { k8s, modules }
    }

    /// Consumes orders and cluster events until both channels close. Runs
    /// until the membership client's attach ends (orders channel closes) or
    /// all informer tasks have exited (events channel closes) — whichever
    /// the caller decides to wait on; in practice the caller tears this down
    /// once the attach ends.
    pub async fn run(
        &self,
        mut orders: mpsc::Receiver<Order>,
        mut events: mpsc::Receiver<ClusterEvent>,
        sink: &dyn UpstreamSink,
    ) {
        loop {
            tokio::select! {
                order = orders.recv() => {
                    match order {
                        Some(order) => {
                            if let Err(err) = self.dispatch(order).await {
                                error!(error = %err, "order dispatch failed; state will be reasserted on the next order or resync");
                            }
                        }
                        None => return,
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(err) = self.handle_cluster_event(event, sink).await {
                                warn!(error = %err, "dropping informer-driven status update");
                            }
                        }
                        None => {
                            // Informer tasks have all exited; keep serving orders.
                            std::future::pending::<()>().await;
                        }
                    }
                }
            }
        }
    }

    /// Dispatches one order by variant (§4.7's table). `Ping` never reaches
    /// here: C4's receiver intercepts it and answers with a `Pong` itself.
    pub async fn dispatch(&self, order: Order) -> AgentResult<()> {
        match order.command {
            Some(order::Command::Ping(_)) => Ok(()),
            Some(order::Command::ExistingStack(o))
            | Some(order::Command::CreatedStack(o))
            | Some(order::Command::UpdatedStack(o))
            | Some(order::Command::EnabledStack(o)) => {
                let stack = o
                    .stack
                    .ok_or_else(|| AgentError::Protocol("stack order missing stack payload".to_string()))?;
                self.upsert_and_reconcile(&stack).await
            }
            Some(order::Command::DisabledStack(o)) => self.disable_stack(&o.stack_name).await,
            Some(order::Command::DeletedStack(o)) => self.delete_stack(&o.stack_name).await,
            None => Err(AgentError::Protocol("order missing command".to_string())),
        }
    }

    async fn upsert_and_reconcile(&self, stack: &PbStack) -> AgentResult<()> {
        let stack_obj = self.upsert_stack(stack).await?;
        let stack_uid = stack_obj.metadata.uid.clone().unwrap_or_default();
        let stack_ref = StackRef { name: &stack.name, uid: &stack_uid };

        let desired_auth_clients: Vec<DesiredChild> = stack
            .auth_clients
            .iter()
            .map(|c| DesiredChild {
                name: c.id.clone(),
                spec: serde_json::json!({ "public": c.public, "scopes": c.scopes }),
            })
            .collect();
        sync::sync_category(self.k8s.as_ref(), &resources::auth_clients(), stack_ref.clone(), &desired_auth_clients).await?;

        let desired_stargate: Vec<DesiredChild> = match &stack.stargate_config {
            Some(cfg) if cfg.enabled => vec![DesiredChild {
                name: stack.name.clone(),
                spec: serde_json::json!({
                    "serverUrl": cfg.server_url,
                    "clientId": stack.auth_config.as_ref().map(|a| a.client_id.clone()).unwrap_or_default(),
                }),
            }],
            _ => Vec::new(),
        };
        sync::sync_category(self.k8s.as_ref(), &resources::stargates(), stack_ref.clone(), &desired_stargate).await?;

        for descriptor in &self.modules {
            let resource = resources::module(descriptor);
            let desired: Vec<DesiredChild> = stack
                .modules
                .iter()
                .filter(|m| m.name == descriptor.singular)
                .map(|m| DesiredChild {
                    name: stack.name.clone(),
                    spec: serde_json::json!({ "spec": m.spec }),
                })
                .collect();
            sync::sync_category(self.k8s.as_ref(), &resource, stack_ref.clone(), &desired).await?;
        }

        Ok(())
    }

    async fn upsert_stack(&self, stack: &PbStack) -> AgentResult<DynamicObject> {
        let resource = resources::stacks();
        let mut obj = DynamicObject::new(&stack.name, &resource);
        obj.data = serde_json::json!({ "spec": stack.spec, "disabled": stack.disabled });

        match self.k8s.create(&resource, obj.clone()).await? {
            Some(created) => Ok(created),
            None => {
                // Already exists: merge-patch the desired fields in, and
                // carry over the UID the create response would have had so
                // owner references still resolve correctly.
                let updated = self.k8s.update(&resource, obj.clone()).await?;
                Ok(updated)
            }
        }
    }

    async fn disable_stack(&self, stack_name: &str) -> AgentResult<()> {
        let resource = resources::stacks();
        let Some(existing) = self.k8s.get(&resource, stack_name).await? else {
            warn!(stack = stack_name, "DisabledStack order for unknown stack");
            return Ok(());
        };
        let mut patched = existing;
        patched.data["disabled"] = serde_json::Value::Bool(true);
        self.k8s.update(&resource, patched).await?;
        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> AgentResult<()> {
        sync::delete_module(self.k8s.as_ref(), &resources::auth_clients(), stack_name).await?;
        sync::delete_module(self.k8s.as_ref(), &resources::stargates(), stack_name).await?;
        for descriptor in &self.modules {
            sync::delete_module(self.k8s.as_ref(), &resources::module(descriptor), stack_name).await?;
        }
        self.k8s.delete(&resources::stacks(), stack_name).await
    }

    async fn handle_cluster_event(&self, event: ClusterEvent, sink: &dyn UpstreamSink) -> AgentResult<()> {
        let (resource, object, deleted) = match event {
            ClusterEvent::Applied { resource, object } => (resource, object, false),
            ClusterEvent::Deleted { resource, object } => (resource, object, true),
        };

        let name = object.metadata.name.clone().unwrap_or_default();
        let status = render_status(&object);

        let message = if resource.kind == resources::stacks().kind {
            messages::stack_status(&name, status, deleted)
        } else if resource.kind == resources::versions().kind {
            messages::version_status(&name, status, deleted)
        } else if let Some(descriptor) = self.modules.iter().find(|d| d.kind == resource.kind) {
            let stack_name = labels::stack_of(object.metadata.labels.as_ref()).unwrap_or_default();
            messages::module_status(&descriptor.singular, &stack_name, status, deleted)
        } else {
            // Not a resource this listener reports on (e.g. stargates,
            // auth clients) — informers for those aren't registered by C6,
            // but stay defensive in case the watch set grows.
            return Ok(());
        };

        match sink.send(message).await {
            Ok(()) => Ok(()),
            Err(AgentError::Stopped) => Ok(()),
            Err(err) => {
                warn!(error = %err, "upstream send failed for informer-driven status; not retried");
                Ok(())
            }
        }
    }
}

fn render_status(object: &DynamicObject) -> String {
    let payload = object.data.get("status").unwrap_or(&object.data);
    serde_json::to_string(payload).unwrap_or_default()
}
