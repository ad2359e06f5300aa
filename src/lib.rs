//! edgebus library crate
//!
//! Cluster-side agent for a multi-tenant AI control plane: consumes intent
//! messages from a per-cluster broker vhost, reconciles them against
//! Kubernetes, watches the resulting objects, and publishes status feedback
//! on the shared vhost.

pub mod broker;
pub mod config;
pub mod error;
pub mod health;
pub mod message;
pub mod reconcile;
pub mod repository;
pub mod status;
pub mod watch;

pub use config::Config;
pub use error::{Error, Result};
pub use health::HealthState;
pub use message::Envelope;

use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::DynamicObject;
use kube::runtime::watcher;
use kube::{Api, Client};
use tokio::sync::{mpsc, watch as signal};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use broker::publisher::{Publisher, Target};
use broker::registry::ConnectionRegistry;
use broker::transport::Connector;
use reconcile::{PROJECT_ID_LABEL, STORAGE_ID_LABEL, namespace, secrets, storage};
use watch::crd::installed_crd_version;
use watch::stream::{ResourceEvent, spawn_watch};

/// Create the default watcher configuration for all watch workers.
fn default_watcher_config() -> watcher::Config {
    watcher::Config::default().any_semantic()
}

/// Pump translated watch events onto the common vhost until the watch
/// worker stops. Events the translator ignores are dropped silently.
async fn publish_watch_events<C, K, F>(
    registry: Arc<ConnectionRegistry<C>>,
    health_state: Arc<HealthState>,
    mut events: mpsc::Receiver<ResourceEvent<K>>,
    translate: F,
) where
    C: Connector,
    F: Fn(&ResourceEvent<K>) -> Option<Envelope>,
{
    while let Some(event) = events.recv().await {
        let Some(message) = translate(&event) else {
            continue;
        };
        health_state.metrics.watch_events_total.inc();
        let message_type = message.message_type();
        let mut publisher = Publisher::new(registry.clone());
        publisher.enqueue(Target::Common, message);
        match publisher.flush().await {
            Ok(()) => health_state.metrics.record_published(message_type),
            Err(e) => {
                warn!(message_type, error = %e, "failed to publish watch status");
            }
        }
    }
}

/// Start the watch workers that turn observed Kubernetes state into status
/// feedback: project namespaces, storage ConfigMaps, and (when the CRD is
/// installed) ExternalSecrets.
pub async fn spawn_status_bridges<C: Connector>(
    client: Client,
    registry: Arc<ConnectionRegistry<C>>,
    health_state: Arc<HealthState>,
    shutdown: signal::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let (events, worker) = spawn_watch(
        namespaces,
        default_watcher_config().labels(PROJECT_ID_LABEL),
        "Namespace",
        shutdown.clone(),
    );
    handles.push(worker);
    handles.push(tokio::spawn(publish_watch_events(
        registry.clone(),
        health_state.clone(),
        events,
        namespace::event_status,
    )));

    let configmaps: Api<ConfigMap> = Api::all(client.clone());
    let (events, worker) = spawn_watch(
        configmaps,
        default_watcher_config().labels(STORAGE_ID_LABEL),
        "ConfigMap",
        shutdown.clone(),
    );
    handles.push(worker);
    handles.push(tokio::spawn(publish_watch_events(
        registry.clone(),
        health_state.clone(),
        events,
        storage::event_status,
    )));

    // ExternalSecret is an optional CRD; without it secret status only
    // flows from the create/update/delete handlers.
    match installed_crd_version(
        &client,
        secrets::EXTERNAL_SECRETS_GROUP,
        secrets::EXTERNAL_SECRETS_PLURAL,
    )
    .await?
    {
        Some(version) => {
            let resource = secrets::external_secret_resource(&version);
            let external_secrets: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
            let (events, worker) = spawn_watch(
                external_secrets,
                default_watcher_config().labels(reconcile::SECRET_ID_LABEL),
                "ExternalSecret",
                shutdown,
            );
            handles.push(worker);
            handles.push(tokio::spawn(publish_watch_events(
                registry,
                health_state,
                events,
                secrets::event_status,
            )));
        }
        None => {
            info!("ExternalSecret CRD not installed, skipping secret watch");
        }
    }

    Ok(handles)
}
