//! Project S3 storage reconciliation.
//!
//! A storage binding materializes as a ConfigMap carrying the bucket URL
//! and the names of the credential secrets; downstream workloads mount it
//! to reach the bucket. Objects are scoped by the project-storage-id label
//! with the usual "not found means already deleted" rule.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};
use uuid::Uuid;

use super::{FIELD_MANAGER, STORAGE_ID_LABEL};
use crate::error::Result;
use crate::message::Envelope;
use crate::status::ProjectResourceStatus;
use crate::watch::stream::{ResourceEvent, WatchEventKind};

/// Reason reported when a delete request finds no matching storage.
pub const NOT_FOUND_REASON: &str = "Project storage not found";

/// Build the storage ConfigMap for a bucket binding.
pub fn build_configmap(
    storage_id: Uuid,
    namespace: &str,
    name: &str,
    bucket_url: &str,
    access_key_secret_ref: &str,
    secret_key_secret_ref: &str,
) -> ConfigMap {
    let mut labels = BTreeMap::new();
    labels.insert(STORAGE_ID_LABEL.to_string(), storage_id.to_string());

    let mut data = BTreeMap::new();
    data.insert("bucket_url".to_string(), bucket_url.to_string());
    data.insert(
        "access_key_secret_ref".to_string(),
        access_key_secret_ref.to_string(),
    );
    data.insert(
        "secret_key_secret_ref".to_string(),
        secret_key_secret_ref.to_string(),
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("s3-{name}")),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..ConfigMap::default()
    }
}

fn status_message(
    storage_id: Uuid,
    status: ProjectResourceStatus,
    reason: Option<String>,
) -> Envelope {
    Envelope::ProjectS3StorageStatus {
        storage_id,
        status,
        reason,
    }
}

/// Create the storage ConfigMap.
#[allow(clippy::too_many_arguments)]
pub async fn create(
    client: &Client,
    storage_id: Uuid,
    namespace: &str,
    name: &str,
    bucket_url: &str,
    access_key_secret_ref: &str,
    secret_key_secret_ref: &str,
) -> Result<Vec<Envelope>> {
    let configmap = build_configmap(
        storage_id,
        namespace,
        name,
        bucket_url,
        access_key_secret_ref,
        secret_key_secret_ref,
    );
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    match api.create(&PostParams::default(), &configmap).await {
        Ok(_) | Err(kube::Error::Api(kube::core::ErrorResponse { code: 409, .. })) => {
            info!(storage_id = %storage_id, namespace, "created storage configmap");
            Ok(Vec::new())
        }
        Err(e) => {
            warn!(storage_id = %storage_id, error = %e, "failed to create storage configmap");
            Ok(vec![status_message(
                storage_id,
                ProjectResourceStatus::Failed,
                Some(e.to_string()),
            )])
        }
    }
}

/// Apply the updated storage ConfigMap.
#[allow(clippy::too_many_arguments)]
pub async fn update(
    client: &Client,
    storage_id: Uuid,
    namespace: &str,
    name: &str,
    bucket_url: &str,
    access_key_secret_ref: &str,
    secret_key_secret_ref: &str,
) -> Result<Vec<Envelope>> {
    let configmap = build_configmap(
        storage_id,
        namespace,
        name,
        bucket_url,
        access_key_secret_ref,
        secret_key_secret_ref,
    );
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let configmap_name = format!("s3-{name}");
    let params = PatchParams::apply(FIELD_MANAGER).force();
    match api
        .patch(&configmap_name, &params, &Patch::Apply(&configmap))
        .await
    {
        Ok(_) => {
            info!(storage_id = %storage_id, namespace, "updated storage configmap");
            Ok(Vec::new())
        }
        Err(e) => {
            warn!(storage_id = %storage_id, error = %e, "failed to update storage configmap");
            Ok(vec![status_message(
                storage_id,
                ProjectResourceStatus::Failed,
                Some(e.to_string()),
            )])
        }
    }
}

/// Delete every ConfigMap labelled with the storage id.
pub async fn delete(client: &Client, storage_id: Uuid, namespace: &str) -> Result<Vec<Envelope>> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let selector = format!("{STORAGE_ID_LABEL}={storage_id}");
    let names: Vec<String> = api
        .list(&ListParams::default().labels(&selector))
        .await?
        .items
        .into_iter()
        .filter_map(|configmap| configmap.metadata.name)
        .collect();

    if names.is_empty() {
        info!(storage_id = %storage_id, namespace, "storage already gone");
        return Ok(vec![status_message(
            storage_id,
            ProjectResourceStatus::Deleted,
            Some(NOT_FOUND_REASON.to_string()),
        )]);
    }

    for name in names {
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => {
                warn!(storage_id = %storage_id, name, error = %e, "failed to delete storage configmap");
                return Ok(vec![status_message(
                    storage_id,
                    ProjectResourceStatus::DeleteFailed,
                    Some(e.to_string()),
                )]);
            }
        }
    }
    // terminal DELETED arrives via the watcher
    Ok(Vec::new())
}

/// Translate an observed storage ConfigMap event into a status message.
/// ConfigMaps without a parseable project-storage-id label are ignored.
pub fn event_status(event: &ResourceEvent<ConfigMap>) -> Option<Envelope> {
    let storage_id = event
        .object
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(STORAGE_ID_LABEL))
        .and_then(|value| Uuid::parse_str(value).ok())?;

    // ConfigMaps have no phase; presence is success
    let message = match event.kind {
        WatchEventKind::Applied => status_message(storage_id, ProjectResourceStatus::Synced, None),
        WatchEventKind::Deleted => status_message(storage_id, ProjectResourceStatus::Deleted, None),
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_configmap_shape() {
        let storage_id = Uuid::new_v4();
        let configmap = build_configmap(
            storage_id,
            "proj-ns",
            "datasets",
            "s3://bucket/datasets",
            "datasets-access-key",
            "datasets-secret-key",
        );
        assert_eq!(configmap.metadata.name.as_deref(), Some("s3-datasets"));
        assert_eq!(configmap.metadata.namespace.as_deref(), Some("proj-ns"));
        let labels = configmap.metadata.labels.unwrap();
        assert_eq!(labels[STORAGE_ID_LABEL], storage_id.to_string());
        let data = configmap.data.unwrap();
        assert_eq!(data["bucket_url"], "s3://bucket/datasets");
        assert_eq!(data["access_key_secret_ref"], "datasets-access-key");
        assert_eq!(data["secret_key_secret_ref"], "datasets-secret-key");
    }

    #[test]
    fn test_event_status_applied_is_synced() {
        let storage_id = Uuid::new_v4();
        let configmap = build_configmap(storage_id, "ns", "d", "s3://b", "a", "s");
        let event = ResourceEvent {
            kind: WatchEventKind::Applied,
            object: configmap,
        };
        assert_eq!(
            event_status(&event),
            Some(Envelope::ProjectS3StorageStatus {
                storage_id,
                status: ProjectResourceStatus::Synced,
                reason: None,
            })
        );
    }

    #[test]
    fn test_event_status_deleted_is_terminal() {
        let storage_id = Uuid::new_v4();
        let configmap = build_configmap(storage_id, "ns", "d", "s3://b", "a", "s");
        let event = ResourceEvent {
            kind: WatchEventKind::Deleted,
            object: configmap,
        };
        let Some(Envelope::ProjectS3StorageStatus { status, .. }) = event_status(&event) else {
            panic!("expected a status message");
        };
        assert_eq!(status, ProjectResourceStatus::Deleted);
    }

    #[test]
    fn test_event_without_label_is_ignored() {
        let event = ResourceEvent {
            kind: WatchEventKind::Applied,
            object: ConfigMap::default(),
        };
        assert_eq!(event_status(&event), None);
    }
}
