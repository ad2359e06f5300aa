//! Workload manifest reconciliation.
//!
//! A workload arrives as rendered manifest documents. Submit applies each
//! document with server-side apply and remembers the manifest so a later
//! delete can address the same objects; per-component readiness is reported
//! separately by the component watchers and merged by the status resolver.

use kube::api::{ApiResource, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::{Api, Client};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::FIELD_MANAGER;
use crate::error::Result;
use crate::message::Envelope;
use crate::repository::Repository;
use crate::status::WorkloadStatus;

/// Reason reported when a delete request finds no stored manifest.
pub const NOT_FOUND_REASON: &str = "Workload not found";

/// Split a manifest payload into its documents: either a JSON array of
/// objects or a single object.
pub fn manifest_documents(manifest: &Value) -> Vec<Value> {
    match manifest {
        Value::Array(documents) => documents.clone(),
        Value::Object(_) => vec![manifest.clone()],
        _ => Vec::new(),
    }
}

/// Resolve the dynamic API coordinates of one manifest document.
pub fn document_gvk(document: &Value) -> Option<GroupVersionKind> {
    let api_version = document.get("apiVersion")?.as_str()?;
    let kind = document.get("kind")?.as_str()?;
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    Some(GroupVersionKind::gvk(group, version, kind))
}

fn document_namespace(document: &Value) -> Option<&str> {
    document.get("metadata")?.get("namespace")?.as_str()
}

fn status_message(workload_id: Uuid, status: WorkloadStatus, reason: Option<String>) -> Envelope {
    Envelope::WorkloadStatusUpdate {
        workload_id,
        status,
        reason,
        timestamp: jiff::Timestamp::now(),
    }
}

fn dynamic_api(client: &Client, gvk: &GroupVersionKind, namespace: Option<&str>) -> Api<DynamicObject> {
    let resource = ApiResource::from_gvk(gvk);
    match namespace {
        Some(namespace) => Api::namespaced_with(client.clone(), namespace, &resource),
        None => Api::all_with(client.clone(), &resource),
    }
}

/// Apply a submitted workload manifest.
pub async fn submit<R: Repository>(
    client: &Client,
    repository: &R,
    workload_id: Uuid,
    manifest: Value,
) -> Result<Vec<Envelope>> {
    let documents = manifest_documents(&manifest);
    if documents.is_empty() {
        return Ok(vec![status_message(
            workload_id,
            WorkloadStatus::Failed,
            Some("manifest contains no documents".to_string()),
        )]);
    }

    repository
        .store_workload_manifest(workload_id, manifest.clone())
        .await?;

    let params = PatchParams::apply(FIELD_MANAGER).force();
    for document in &documents {
        let Some(gvk) = document_gvk(document) else {
            return Ok(vec![status_message(
                workload_id,
                WorkloadStatus::Failed,
                Some("document is missing apiVersion or kind".to_string()),
            )]);
        };
        let Some(name) = document
            .get("metadata")
            .and_then(|metadata| metadata.get("name"))
            .and_then(Value::as_str)
        else {
            return Ok(vec![status_message(
                workload_id,
                WorkloadStatus::Failed,
                Some(format!("{} document has no metadata.name", gvk.kind)),
            )]);
        };
        let api = dynamic_api(client, &gvk, document_namespace(document));
        if let Err(e) = api.patch(name, &params, &Patch::Apply(document)).await {
            warn!(workload_id = %workload_id, kind = %gvk.kind, name, error = %e, "failed to apply workload document");
            return Ok(vec![status_message(
                workload_id,
                WorkloadStatus::Failed,
                Some(format!("{}/{name}: {e}", gvk.kind)),
            )]);
        }
    }

    info!(workload_id = %workload_id, documents = documents.len(), "submitted workload");
    Ok(vec![status_message(workload_id, WorkloadStatus::Pending, None)])
}

/// Delete a workload's objects using its stored manifest.
pub async fn delete<R: Repository>(
    client: &Client,
    repository: &R,
    workload_id: Uuid,
) -> Result<Vec<Envelope>> {
    let Some(manifest) = repository.take_workload_manifest(workload_id).await? else {
        info!(workload_id = %workload_id, "workload already gone");
        return Ok(vec![status_message(
            workload_id,
            WorkloadStatus::Deleted,
            Some(NOT_FOUND_REASON.to_string()),
        )]);
    };

    for document in manifest_documents(&manifest) {
        let Some(gvk) = document_gvk(&document) else {
            continue;
        };
        let Some(name) = document
            .get("metadata")
            .and_then(|metadata| metadata.get("name"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let api = dynamic_api(client, &gvk, document_namespace(&document));
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => {
                warn!(workload_id = %workload_id, kind = %gvk.kind, name, error = %e, "failed to delete workload document");
                return Ok(vec![status_message(
                    workload_id,
                    WorkloadStatus::DeleteFailed,
                    Some(format!("{}/{name}: {e}", gvk.kind)),
                )]);
            }
        }
    }

    info!(workload_id = %workload_id, "deleted workload");
    Ok(vec![status_message(workload_id, WorkloadStatus::Deleted, None)])
}
