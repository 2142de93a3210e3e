//! Cluster-resident agent bridging a Kubernetes cluster to the membership
//! control plane (see `SPEC_FULL.md`). `main.rs` is a thin entry point;
//! `run` here owns wiring C1–C7 together for the lifetime of one attach.

pub mod auth;
pub mod config;
pub mod core;
pub mod informers;
pub mod k8s;
pub mod listener;
pub mod membership_client;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tonic::transport::ClientTlsConfig;
use tracing::{error, info};

use crate::auth::{Authenticator, ClientCredentialsAuthenticator, StaticTokenAuthenticator};
use crate::config::{AuthMode, Config};
use crate::core::client_info::ClientInfo;
use crate::core::errors::{AgentError, AgentResult};
use crate::core::modules;
use crate::informers::ClusterEvent;
use crate::k8s::{DefaultK8sClient, K8sClient};
use crate::listener::MembershipListener;
use crate::membership_client::{build_connect_metadata, MembershipClient};
use crate::stream::{Connection, TonicConnection, TracedConnection};

/// Channel depth for the fan-in of cluster events from C6 into C7; generous
/// enough to absorb a burst of informer resyncs without blocking watchers.
const CLUSTER_EVENT_CHANNEL_DEPTH: usize = 256;

fn build_authenticator(config: &Config) -> AgentResult<Arc<dyn Authenticator>> {
    match config.auth_mode {
        AuthMode::Token => {
            let token = config
                .auth_token
                .clone()
                .ok_or_else(|| AgentError::Config("auth_token is required when auth_mode = token".to_string()))?;
            Ok(Arc::new(StaticTokenAuthenticator::new(token)))
        }
        AuthMode::Bearer => {
            let issuer = config
                .auth_issuer
                .as_deref()
                .ok_or_else(|| AgentError::Config("auth_issuer is required when auth_mode = bearer".to_string()))?;
            let client_id = config
                .auth_client_id
                .as_deref()
                .ok_or_else(|| AgentError::Config("auth_client_id is required when auth_mode = bearer".to_string()))?;
            let client_secret = config.auth_client_secret.as_deref().ok_or_else(|| {
                AgentError::Config("auth_client_secret is required when auth_mode = bearer".to_string())
            })?;
            Ok(Arc::new(ClientCredentialsAuthenticator::new(issuer, client_id, client_secret)?))
        }
    }
}

async fn build_kube_client(config: &Config) -> AgentResult<kube::Client> {
    let client = match &config.kube_config_path {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .map_err(|e| AgentError::Config(format!("reading kube config at {path}: {e}")))?;
            let options = kube::config::KubeConfigOptions::default();
            let client_config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| AgentError::Config(format!("building kube client config: {e}")))?;
            kube::Client::try_from(client_config)?
        }
        None => kube::Client::try_default().await?,
    };
    Ok(client)
}

fn build_tls_config(config: &Config) -> AgentResult<Option<ClientTlsConfig>> {
    if !config.tls.enabled {
        return Ok(None);
    }
    // `tonic`'s `ClientTlsConfig` has no hook to disable certificate
    // verification (unlike a raw `rustls::ClientConfig` with a custom
    // `ServerCertVerifier`); rather than accept `skip_verify = true` and
    // silently keep verifying anyway, `Config::validate` rejects it at
    // startup (a Config error, not a runtime no-op).
    let mut tls = ClientTlsConfig::new();
    if let Some(ca_path) = &config.tls.ca_pem_path {
        let pem = std::fs::read_to_string(ca_path)
            .map_err(|e| AgentError::Config(format!("reading CA PEM at {ca_path}: {e}")))?;
        tls = tls.ca_certificate(tonic::transport::Certificate::from_pem(pem));
    }
    Ok(Some(tls))
}

/// Wires C1–C7 together for one attach and runs it to completion: connects
/// the membership stream, lists the module registry, spawns one informer
/// task per watched resource (§4.6), and drives the listener's dispatch
/// loop until the attach ends. Returns once the stream terminates, either
/// gracefully (via a `ctrl_c`) or with a fatal transport/auth error — the
/// process lifecycle (here, `main`) decides whether to retry.
pub async fn run(config: Config) -> AgentResult<()> {
    let authenticator = build_authenticator(&config)?;
    let kube_client = build_kube_client(&config).await?;

    info!("discovering module registry");
    let module_descriptors = modules::list_modules(kube_client.clone()).await?;
    info!(count = module_descriptors.len(), "module registry discovered");

    let client_info = ClientInfo {
        id: config.id.clone(),
        base_url: config.base_url.clone(),
        production: config.production,
        outdated: config.outdated,
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: vec!["EE".to_string(), "MODULE_LIST".to_string()],
    };

    let metadata = build_connect_metadata(authenticator.as_ref(), &client_info, &module_descriptors).await?;
    let tls = build_tls_config(&config)?;

    info!(server_address = %config.server_address, "attaching to membership server");
    let base_conn = TonicConnection::connect(&config.server_address, metadata, tls).await?;
    // Trace-context propagation (§4.2 bullet 1) is unconditional; `debug`
    // only gates the extra span attribute recorded per frame.
    let conn: Box<dyn Connection> = Box::new(TracedConnection::new(base_conn, config.debug));

    let (client, sink, orders_rx) = MembershipClient::new();

    let k8s: Arc<dyn K8sClient> = Arc::new(DefaultK8sClient::new(kube_client.clone()));
    let resync_period = Duration::from_secs(config.resync_period_secs);
    let (events_tx, events_rx) = mpsc::channel::<ClusterEvent>(CLUSTER_EVENT_CHANNEL_DEPTH);

    let mut informer_tasks = Vec::new();
    for resource in listener::watched_resources(&module_descriptors) {
        let kube_client = kube_client.clone();
        let events_tx = events_tx.clone();
        informer_tasks.push(tokio::spawn(async move {
            crate::informers::watch_resource(kube_client, resource, resync_period, events_tx).await;
        }));
    }
    drop(events_tx);

    let listener = MembershipListener::new(k8s, module_descriptors);
    let listener_sink = sink.clone();
    let listener_task = tokio::spawn(async move {
        listener.run(orders_rx, events_rx, &listener_sink).await;
    });

    let shutdown_sink = sink.clone();
    let shutdown_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt; requesting graceful shutdown");
            let _ = shutdown_sink.stop().await;
        }
    });

    let attach_result = client.start(conn).await;

    shutdown_task.abort();
    listener_task.abort();
    for task in informer_tasks {
        task.abort();
    }

    if let Err(err) = &attach_result {
        error!(error = %err, "membership stream attach ended with an error");
    } else {
        info!("membership stream attach ended cleanly");
    }

    attach_result
}
