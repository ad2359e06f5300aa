//! Project namespace reconciliation.
//!
//! Creation failures are reported back as FAILED status messages; creation
//! success is never reported here — the watcher observes the namespace
//! reaching the `Active` phase and reports it then. Deletion is idempotent:
//! a namespace that is missing, or whose project-id label does not match,
//! counts as already gone so re-delivered delete messages settle cleanly.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};
use uuid::Uuid;

use super::{KUEUE_MANAGED_LABEL, PROJECT_ID_LABEL};
use crate::error::Result;
use crate::message::Envelope;
use crate::status::ProjectResourceStatus;
use crate::watch::stream::{ResourceEvent, WatchEventKind};

/// Reason reported when a delete request finds no matching namespace.
pub const NOT_FOUND_REASON: &str = "Project namespace not found";

/// Build the namespace manifest. Explicit extras win over the base labels
/// and annotations.
pub fn build_namespace(
    name: &str,
    project_id: Uuid,
    extra_labels: &BTreeMap<String, String>,
    extra_annotations: &BTreeMap<String, String>,
) -> Namespace {
    let mut labels = BTreeMap::new();
    labels.insert(PROJECT_ID_LABEL.to_string(), project_id.to_string());
    labels.insert(KUEUE_MANAGED_LABEL.to_string(), "true".to_string());
    for (key, value) in extra_labels {
        labels.insert(key.clone(), value.clone());
    }

    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            annotations: if extra_annotations.is_empty() {
                None
            } else {
                Some(extra_annotations.clone())
            },
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

fn status_message(
    project_id: Uuid,
    status: ProjectResourceStatus,
    reason: Option<String>,
) -> Envelope {
    Envelope::ProjectNamespaceStatus {
        project_id,
        status,
        reason,
    }
}

/// Create the project namespace.
pub async fn create(
    client: &Client,
    name: &str,
    project_id: Uuid,
    extra_labels: &BTreeMap<String, String>,
    extra_annotations: &BTreeMap<String, String>,
) -> Result<Vec<Envelope>> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = build_namespace(name, project_id, extra_labels, extra_annotations);
    match api.create(&PostParams::default(), &namespace).await {
        Ok(_) => {
            info!(namespace = name, project_id = %project_id, "created project namespace");
            Ok(Vec::new())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => {
            // re-delivered create; the watcher will still report its phase
            info!(namespace = name, "project namespace already exists");
            Ok(Vec::new())
        }
        Err(e) => {
            warn!(namespace = name, error = %e, "failed to create project namespace");
            Ok(vec![status_message(
                project_id,
                ProjectResourceStatus::Failed,
                Some(e.to_string()),
            )])
        }
    }
}

/// Whether a delete request should proceed or the target counts as gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDisposition {
    /// Namespace missing, or its project-id label is absent or different:
    /// not ours to delete, report DELETED.
    AlreadyGone,
    /// Namespace exists and belongs to the project.
    Proceed,
}

/// Decide the delete disposition from the namespace actually stored.
pub fn classify_delete(existing: Option<&Namespace>, project_id: Uuid) -> DeleteDisposition {
    let Some(namespace) = existing else {
        return DeleteDisposition::AlreadyGone;
    };
    let label = namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(PROJECT_ID_LABEL));
    match label {
        Some(value) if *value == project_id.to_string() => DeleteDisposition::Proceed,
        _ => DeleteDisposition::AlreadyGone,
    }
}

/// Delete the project namespace, idempotently.
pub async fn delete(client: &Client, name: &str, project_id: Uuid) -> Result<Vec<Envelope>> {
    let api: Api<Namespace> = Api::all(client.clone());

    let existing = match api.get(name).await {
        Ok(namespace) => Some(namespace),
        Err(kube::Error::Api(e)) if e.code == 404 => None,
        Err(e) => {
            warn!(namespace = name, error = %e, "failed to read namespace before delete");
            return Ok(vec![status_message(
                project_id,
                ProjectResourceStatus::DeleteFailed,
                Some(e.to_string()),
            )]);
        }
    };

    match classify_delete(existing.as_ref(), project_id) {
        DeleteDisposition::AlreadyGone => {
            info!(namespace = name, project_id = %project_id, "namespace already gone");
            Ok(vec![status_message(
                project_id,
                ProjectResourceStatus::Deleted,
                Some(NOT_FOUND_REASON.to_string()),
            )])
        }
        DeleteDisposition::Proceed => match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace = name, "namespace deletion requested");
                // terminal DELETED arrives via the watcher
                Ok(Vec::new())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(vec![status_message(
                project_id,
                ProjectResourceStatus::Deleted,
                Some(NOT_FOUND_REASON.to_string()),
            )]),
            Err(e) => {
                warn!(namespace = name, error = %e, "failed to delete namespace");
                Ok(vec![status_message(
                    project_id,
                    ProjectResourceStatus::DeleteFailed,
                    Some(e.to_string()),
                )])
            }
        },
    }
}

/// Translate an observed namespace event into a status message.
///
/// Events for namespaces without a parseable project-id label belong to
/// unrelated cluster resources and are ignored.
pub fn event_status(event: &ResourceEvent<Namespace>) -> Option<Envelope> {
    let project_id = event
        .object
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(PROJECT_ID_LABEL))
        .and_then(|value| Uuid::parse_str(value).ok())?;

    let message = match event.kind {
        WatchEventKind::Deleted => {
            status_message(project_id, ProjectResourceStatus::Deleted, None)
        }
        WatchEventKind::Applied => {
            let phase = event
                .object
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref());
            match phase {
                Some("Active") => status_message(project_id, ProjectResourceStatus::Synced, None),
                Some("Terminating") => {
                    status_message(project_id, ProjectResourceStatus::Deleting, None)
                }
                other => status_message(
                    project_id,
                    ProjectResourceStatus::Failed,
                    Some(format!(
                        "unrecognized namespace phase: {}",
                        other.unwrap_or("<none>")
                    )),
                ),
            }
        }
    };
    Some(message)
}
