use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::runtime::watcher::{self, Event};
use kube::Client;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// An add/update/delete notification for one watched resource (C6), fanned
/// into a single bounded channel consumed by the listener (C7) so
/// reconciliation stays sequential and testable.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Applied {
        resource: ApiResource,
        object: Box<DynamicObject>,
    },
    Deleted {
        resource: ApiResource,
        object: Box<DynamicObject>,
    },
}

/// Watches one cluster-scoped resource and forwards add/update/delete events
/// onto `tx`, resyncing the full list every `resync_period` in addition to
/// the underlying watch stream, the way the original's
/// `dynamicinformer.DynamicSharedInformerFactory` resyncs informers
/// periodically.
pub async fn watch_resource(
    client: Client,
    resource: ApiResource,
    resync_period: Duration,
    tx: mpsc::Sender<ClusterEvent>,
) {
    let api: Api<DynamicObject> = Api::all_with(client, &resource);
    let mut watch_stream = std::pin::pin!(watcher::watcher(api.clone(), watcher::Config::default()));
    let mut resync = tokio::time::interval(resync_period);
    resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the watch stream already delivers an
    // initial listing, so skip it.
    resync.tick().await;

    loop {
        tokio::select! {
            event = watch_stream.next() => {
                match event {
                    Some(Ok(Event::Apply(obj))) => emit(&tx, ClusterEvent::Applied { resource: resource.clone(), object: Box::new(obj) }).await,
                    Some(Ok(Event::Delete(obj))) => emit(&tx, ClusterEvent::Deleted { resource: resource.clone(), object: Box::new(obj) }).await,
                    Some(Ok(Event::InitApply(obj))) => emit(&tx, ClusterEvent::Applied { resource: resource.clone(), object: Box::new(obj) }).await,
                    Some(Ok(Event::Init)) | Some(Ok(Event::InitDone)) => {}
                    Some(Err(err)) => warn!(resource = %resource.kind, error = %err, "watch stream error"),
                    None => {
                        warn!(resource = %resource.kind, "watch stream ended");
                        break;
                    }
                }
            }
            _ = resync.tick() => {
                if let Err(err) = resync_once(&api, &resource, &tx).await {
                    error!(resource = %resource.kind, error = %err, "resync listing failed");
                }
            }
        }
    }
}

async fn resync_once(
    api: &Api<DynamicObject>,
    resource: &ApiResource,
    tx: &mpsc::Sender<ClusterEvent>,
) -> kube::Result<()> {
    let list = api.list(&ListParams::default()).await?;
    for obj in list.items {
        emit(
            tx,
            ClusterEvent::Applied {
                resource: resource.clone(),
                object: Box::new(obj),
            },
        )
        .await;
    }
    Ok(())
}

async fn emit(tx: &mpsc::Sender<ClusterEvent>, event: ClusterEvent) {
    if tx.send(event).await.is_err() {
        error!("cluster event channel closed; listener task has exited");
    }
}
